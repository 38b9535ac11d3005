use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use seqvault::block_file::LINE_WIDTH;
use seqvault::{fasta, snapshot, AliasQuery, AliasRecord, Compressor, RepoConfig, Repository};
use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

mod layout;
mod logging;
mod stats;

#[derive(Parser, Debug)]
#[command(name = "seqvault")]
#[command(version, about = "Non-redundant, append-only repository of sequences and aliases")]
struct Cli {
    /// Directory holding repository instances (defaults to the platform data directory).
    #[arg(long, env = "SEQREPO_ROOT_DIR")]
    root_directory: Option<PathBuf>,

    /// Instance name under the root directory, or a path to an instance directory.
    #[arg(long, default_value = "master")]
    instance_name: String,

    /// Increase logging verbosity (use together with RUST_LOG for fine control).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors; hides progress bars.
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum CompressorArg {
    /// External `bgzip` (SEQREPO_BGZIP_PATH, PATH or /usr/bin/bgzip)
    Bgzip,
    /// Built-in BGZF encoder
    Native,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty instance
    Init,

    /// Load sequences from FASTA files (`-` reads stdin; .gz/.bgz accepted)
    Load {
        /// Namespace for aliases taken from deflines
        #[arg(short, long)]
        namespace: String,

        #[arg(required = true)]
        fasta_files: Vec<PathBuf>,

        #[arg(long, value_enum, default_value_t = CompressorArg::Bgzip)]
        compressor: CompressorArg,
    },

    /// Print a sequence (or a slice of it) by `namespace:alias` or alias
    Fetch {
        identifier: String,

        /// Zero-based start (inclusive)
        #[arg(long)]
        start: Option<u64>,

        /// Zero-based end (exclusive)
        #[arg(long)]
        end: Option<u64>,
    },

    /// List every identifier of the sequence an identifier names
    Translate {
        identifier: String,

        /// Only list these namespaces
        #[arg(short, long = "target-namespace")]
        target_namespaces: Vec<String>,
    },

    /// Write sequences as FASTA, optionally limited to a namespace or aliases
    Export {
        #[arg(short, long)]
        namespace: Option<String>,

        aliases: Vec<String>,
    },

    /// Write the current aliases of each sequence, one tab-separated line per sequence
    ExportAliases {
        /// Only sequences with an alias in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Show instance statistics
    ShowStatus,

    /// Create a read-only snapshot (relative names are placed in the root directory)
    Snapshot { destination: PathBuf },

    /// List the instances in the root directory
    ListLocalInstances,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet)?;

    let instance_dir =
        layout::resolve_instance_dir(cli.root_directory.as_deref(), &cli.instance_name)
            .with_context(|| format!("Failed to resolve instance {}", cli.instance_name))?;
    let config = RepoConfig::from_env().context("Invalid configuration in environment")?;

    match cli.cmd {
        Command::Init => {
            let repo = Repository::init(&instance_dir, config)
                .with_context(|| format!("Failed to initialize {}", instance_dir.display()))?;
            println!("Initialized {}", repo.root().display());
            Ok(())
        }

        Command::Load {
            namespace,
            fasta_files,
            compressor,
        } => {
            if layout::check_instance_dir(&instance_dir)? != layout::InstanceState::LooksValid {
                return Err(anyhow!(
                    "{}: initialize the instance first (seqvault init)",
                    instance_dir.display()
                ));
            }
            let config = match compressor {
                CompressorArg::Native => config.with_compressor(Compressor::Native),
                CompressorArg::Bgzip => config,
            }
            .with_writeable(true);
            let repo = open(&instance_dir, config)?;
            load(&repo, &namespace, &fasta_files, cli.quiet)
        }

        Command::Fetch {
            identifier,
            start,
            end,
        } => {
            let repo = open(&instance_dir, config)?;
            let (namespace, alias) = seqvault::parse_identifier(&identifier);
            let seq = repo
                .fetch(alias, namespace, start, end)
                .with_context(|| format!("Failed to fetch {identifier}"))?;
            println!("{seq}");
            Ok(())
        }

        Command::Translate {
            identifier,
            target_namespaces,
        } => {
            let repo = open(&instance_dir, config)?;
            let targets: Vec<&str> = target_namespaces.iter().map(String::as_str).collect();
            for id in repo
                .translate_identifier(&identifier, &targets)
                .with_context(|| format!("Failed to translate {identifier}"))?
            {
                println!("{id}");
            }
            Ok(())
        }

        Command::Export { namespace, aliases } => {
            let repo = open(&instance_dir, config)?;
            export(&repo, namespace.as_deref(), &aliases)
        }

        Command::ExportAliases { namespace } => {
            let repo = open(&instance_dir, config)?;
            export_aliases(&repo, namespace.as_deref())
        }

        Command::ShowStatus => {
            let repo = open(&instance_dir, config)?;
            let status = stats::compute(&repo)?;
            stats::print(&status);
            Ok(())
        }

        Command::Snapshot { destination } => {
            let dst = if destination.is_absolute() {
                destination
            } else {
                instance_dir
                    .parent()
                    .map(|p| p.join(&destination))
                    .unwrap_or(destination)
            };
            let s = snapshot::snapshot(&instance_dir, &dst).with_context(|| {
                format!(
                    "Failed to snapshot {} to {}",
                    instance_dir.display(),
                    dst.display()
                )
            })?;
            println!(
                "Snapshot {}: {} containers linked, {} indexes copied, {} directories",
                dst.display(),
                s.linked,
                s.copied,
                s.dirs
            );
            Ok(())
        }

        Command::ListLocalInstances => {
            let root = layout::root_dir(cli.root_directory.as_deref())?;
            println!("Local instances ({}):", root.display());
            for name in layout::list_instances(&root)? {
                println!("  {name}");
            }
            Ok(())
        }
    }
}

fn open(dir: &Path, config: RepoConfig) -> Result<Repository> {
    Repository::open(dir, config)
        .with_context(|| format!("Failed to open repository in {}", dir.display()))
}

fn load(repo: &Repository, namespace: &str, files: &[PathBuf], quiet: bool) -> Result<()> {
    let files_bar = ProgressBar::new(files.len() as u64);
    files_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files {msg}")?
            .progress_chars("##-"),
    );
    if quiet {
        files_bar.set_draw_target(ProgressDrawTarget::hidden());
    }

    let (mut seen, mut seqs_added, mut aliases_added) = (0u64, 0u64, 0u64);
    repo.scoped(|repo| -> Result<()> {
        for path in files {
            files_bar.set_message(path.display().to_string());
            let reader = fasta::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            tracing::info!(path = %path.display(), "loading");

            for rec in reader {
                let (defline, seq) =
                    rec.with_context(|| format!("Failed to read {}", path.display()))?;
                let aliases = fasta::parse_defline(&defline, namespace);
                fasta::validate_aliases(&aliases)
                    .with_context(|| format!("{}: bad defline {defline:?}", path.display()))?;
                let (s, a) = repo.store(&seq, aliases)?;
                seen += 1;
                seqs_added += s;
                aliases_added += a;
                if seen % 1000 == 0 {
                    files_bar.set_message(format!(
                        "sequences: {seqs_added}/{seen} added/seen; aliases: {aliases_added} added"
                    ));
                }
            }
            files_bar.inc(1);
        }
        Ok(())
    })?;
    files_bar.finish_and_clear();

    println!("sequences: {seqs_added}/{seen} added/seen; aliases: {aliases_added} added");
    Ok(())
}

fn export(repo: &Repository, namespace: Option<&str>, aliases: &[String]) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());

    if aliases.is_empty() && namespace.is_none() {
        for row in repo.iter()? {
            let (rec, seq, arecs) = row?;
            write_fasta(&mut out, &rec.seq_id, &seq, &arecs)?;
        }
    } else {
        let mut groups: BTreeMap<String, Vec<AliasRecord>> = BTreeMap::new();
        let mut queries = Vec::new();
        if aliases.is_empty() {
            queries.push(AliasQuery::new());
        }
        for alias in aliases {
            queries.push(AliasQuery::new().alias(alias.as_str()));
        }
        for q in queries {
            let q = match namespace {
                Some(ns) => q.namespace(ns),
                None => q,
            };
            for rec in repo.aliases().find(&q)? {
                groups.entry(rec.seq_id.clone()).or_default().push(rec);
            }
        }
        for (seq_id, arecs) in groups {
            let seq = repo.sequences().fetch(&seq_id, None, None)?;
            write_fasta(&mut out, &seq_id, &seq, &arecs)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn write_fasta(out: &mut impl Write, seq_id: &str, seq: &str, arecs: &[AliasRecord]) -> Result<()> {
    let mut ids: Vec<(&str, &str)> = arecs
        .iter()
        .map(|a| (a.namespace.as_str(), a.alias.as_str()))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    let header: Vec<String> = ids.iter().map(|(ns, a)| format!("{ns}:{a}")).collect();
    if header.is_empty() {
        writeln!(out, ">{seq_id}")?;
    } else {
        writeln!(out, ">{}", header.join(" "))?;
    }
    for line in seq.as_bytes().chunks(LINE_WIDTH) {
        out.write_all(line)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn export_aliases(repo: &Repository, namespace: Option<&str>) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    let mut groups: BTreeMap<String, Vec<AliasRecord>> = BTreeMap::new();
    for rec in repo.aliases().find(&AliasQuery::new())? {
        groups.entry(rec.seq_id.clone()).or_default().push(rec);
    }

    for arecs in groups.values() {
        if let Some(ns) = namespace {
            if !arecs.iter().any(|a| a.namespace == ns) {
                continue;
            }
        }
        let mut ids: Vec<String> = arecs.iter().map(AliasRecord::identifier).collect();
        // digest identifiers first
        ids.sort_by_key(|id| (!id.starts_with("ga4gh:"), id.clone()));
        writeln!(out, "{}", ids.join("\t"))?;
    }
    out.flush()?;
    Ok(())
}
