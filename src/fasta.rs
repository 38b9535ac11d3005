//! FASTA input for bulk loading: a record reader, defline parsing and alias
//! validation.

use crate::error::{Error, Result};
use flate2::read::MultiGzDecoder;
use noodles::fasta::{self, record::Definition};
use regex::Regex;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

static NCBI_DEFLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(ref)\|([^|]+)").expect("static regex"));
static INVALID_ALIAS_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-+./_\w]").expect("static regex"));

/// `(header, sequence)` records from FASTA text. Lines before the first
/// header are ignored; whitespace inside sequence lines is dropped.
pub struct FastaReader<R> {
    inner: fasta::io::Reader<R>,
    definition: Definition,
    started: bool,
}

impl<R: BufRead> FastaReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: fasta::io::Reader::new(reader),
            definition: Definition::default(),
            started: false,
        }
    }

    fn skip_preamble(&mut self) -> io::Result<()> {
        let src = self.inner.get_mut();
        let mut line = Vec::new();
        loop {
            match src.fill_buf()?.first() {
                None | Some(b'>') => return Ok(()),
                Some(_) => {
                    line.clear();
                    src.read_until(b'\n', &mut line)?;
                }
            }
        }
    }

    fn read_record(&mut self) -> io::Result<Option<(String, String)>> {
        if !self.started {
            self.started = true;
            self.skip_preamble()?;
        }
        if self.inner.read_definition(&mut self.definition)? == 0 {
            return Ok(None);
        }
        let header = match self.definition.description() {
            Some(desc) => format!("{} {desc}", self.definition.name()),
            None => self.definition.name().to_string(),
        };

        let mut seq = Vec::new();
        self.inner.read_sequence(&mut seq)?;
        seq.retain(|b| !b.is_ascii_whitespace());
        let seq = String::from_utf8(seq)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Some((header, seq)))
    }
}

impl<R: BufRead> Iterator for FastaReader<R> {
    type Item = io::Result<(String, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Open a FASTA file; `-` is stdin and `.gz`/`.bgz` files are decompressed.
pub fn open(path: &Path) -> io::Result<FastaReader<Box<dyn BufRead>>> {
    let reader: Box<dyn BufRead> = if path.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        let f = File::open(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz" | "bgz") => Box::new(BufReader::new(MultiGzDecoder::new(f))),
            _ => Box::new(BufReader::new(f)),
        }
    };
    Ok(FastaReader::new(reader))
}

/// Aliases named by a defline. NCBI-style `ref|AC|` pairs become `refseq`
/// aliases; otherwise the first word is an alias in `namespace`.
pub fn parse_defline(defline: &str, namespace: &str) -> Vec<(String, String)> {
    let first = defline.split_whitespace().next().unwrap_or("");
    let first = first.strip_prefix('>').unwrap_or(first);

    let ncbi: Vec<(String, String)> = NCBI_DEFLINE_RE
        .captures_iter(first)
        .map(|c| ("refseq".to_string(), c[2].to_string()))
        .collect();
    if ncbi.is_empty() {
        vec![(namespace.to_string(), first.to_string())]
    } else {
        ncbi
    }
}

/// Reject aliases with characters outside `[-+./_\w]`, and unversioned
/// RefSeq or Ensembl accessions.
pub fn validate_aliases(aliases: &[(String, String)]) -> Result<()> {
    for (namespace, alias) in aliases {
        if INVALID_ALIAS_CHARS_RE.is_match(alias) {
            return Err(Error::InvalidAlias(format!(
                "{namespace}:{alias} contains an invalid character"
            )));
        }
        let unversioned = !alias.contains('.');
        let needs_version = if namespace.starts_with("Ensembl") {
            alias.starts_with("ENS")
        } else {
            matches!(namespace.as_str(), "NCBI" | "refseq")
        };
        if needs_version && unversioned {
            return Err(Error::InvalidAlias(format!(
                "{namespace} alias {alias} is unversioned"
            )));
        }
    }
    Ok(())
}
