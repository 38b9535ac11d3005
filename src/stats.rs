use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use seqvault::{AliasIndexStats, Repository, SequenceStoreStats};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct Status {
    pub dir: PathBuf,
    pub disk_bytes: u64,
    pub sequence_schema: Option<u64>,
    pub alias_schema: Option<u64>,
    pub sequences: SequenceStoreStats,
    pub aliases: AliasIndexStats,
}

pub fn compute(repo: &Repository) -> Result<Status> {
    Ok(Status {
        dir: repo.root().to_path_buf(),
        disk_bytes: disk_usage(repo.root())?,
        sequence_schema: repo.sequences().schema_version()?,
        alias_schema: repo.aliases().schema_version()?,
        sequences: repo
            .sequences()
            .stats()
            .context("failed to read sequence stats")?,
        aliases: repo.aliases().stats().context("failed to read alias stats")?,
    })
}

fn disk_usage(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if entry.file_type().is_file() {
            total = total.saturating_add(entry.metadata()?.len());
        }
    }
    Ok(total)
}

pub fn print(s: &Status) {
    let schema = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());

    println!("seqvault {}", env!("CARGO_PKG_VERSION"));
    println!("instance directory:   {}, {}", s.dir.display(), format_size(s.disk_bytes));
    println!(
        "schemas:              sequences {}, aliases {}",
        schema(s.sequence_schema),
        schema(s.alias_schema)
    );
    println!();

    println!("Sequences:");
    println!("  sequences:          {}", s.sequences.n_sequences);
    println!("  residues:           {}", s.sequences.total_length);
    println!("  files:              {}", s.sequences.n_files);
    println!("  added:              {}", time_range(s.sequences.time_range));
    println!();

    println!("Aliases:");
    println!("  aliases:            {}", s.aliases.count);
    println!("  current:            {}", s.aliases.current_count);
    println!("  namespaces:         {}", s.aliases.distinct_namespaces);
    println!("  sequences:          {}", s.aliases.distinct_sequences);
    println!("  added:              {}", time_range(s.aliases.time_range));
}

fn time_range(r: Option<(DateTime<Utc>, DateTime<Utc>)>) -> String {
    match r {
        Some((lo, hi)) => format!(
            "{} .. {}",
            lo.format("%Y-%m-%d %H:%M:%S"),
            hi.format("%Y-%m-%d %H:%M:%S")
        ),
        None => "-".to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= TIB {
        format!("{:.2} TiB", b / TIB)
    } else if b >= GIB {
        format!("{:.2} GiB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MiB", b / MIB)
    } else if b >= KIB {
        format!("{:.2} KiB", b / KIB)
    } else {
        format!("{} B", bytes)
    }
}
