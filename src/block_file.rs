//! One sequence container: FASTA text, BGZF-compressed, with samtools-style
//! `.fai` and htslib `.gzi` companions for random access.
//!
//! A container is written once through [`BlockSequenceWriter`] and read any
//! number of times through [`BlockSequenceReader`]. A path is never both.

use crate::error::{Error, Result};
use crate::tool::Bgzip;
use noodles::bgzf;
use noodles::fasta::fai;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::num::NonZero;
use std::path::{Path, PathBuf};

pub const LINE_WIDTH: usize = 100;
pub const CONTAINER_SUFFIX: &str = ".fa.bgz";
pub const FAI_SUFFIX: &str = ".fai";
pub const GZI_SUFFIX: &str = ".gzi";

const LINE_BASES: NonZero<u64> = match NonZero::new(LINE_WIDTH as u64) {
    Some(n) => n,
    None => panic!("zero line width"),
};
// residues plus the newline
const LINE_STRIDE: NonZero<u64> = LINE_BASES.saturating_add(1);

/// How a closed container gets block-compressed.
#[derive(Debug, Clone)]
pub enum Codec {
    /// Shell out to a version-checked `bgzip`.
    Bgzip(Bgzip),
    /// In-process BGZF encoder.
    Native,
}

pub fn fai_path(path: &Path) -> PathBuf {
    with_suffix(path, FAI_SUFFIX)
}

pub fn gzi_path(path: &Path) -> PathBuf {
    with_suffix(path, GZI_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Residues are printable ASCII, and never `>` so a line cannot turn into a
/// header.
pub fn check_residues(seq: &str) -> Result<()> {
    match seq.bytes().position(|b| !b.is_ascii_graphic() || b == b'>') {
        None => Ok(()),
        Some(i) => {
            let c = seq[i..].chars().next().unwrap_or_default();
            Err(Error::InvalidArgument(format!(
                "invalid residue {c:?} at offset {i}"
            )))
        }
    }
}

enum State {
    Open(BufWriter<File>),
    Closed,
    Failed(String),
}

pub struct BlockSequenceWriter {
    path: PathBuf,
    plain_path: PathBuf,
    codec: Codec,
    state: State,
    added: HashSet<String>,
    fai: Vec<fai::Record>,
    // uncompressed bytes written so far
    offset: u64,
}

impl BlockSequenceWriter {
    /// Start a new container. Refuses to touch any existing file.
    pub fn create(path: &Path, codec: Codec) -> Result<Self> {
        let plain_path = path
            .to_str()
            .and_then(|s| s.strip_suffix(".bgz"))
            .map(PathBuf::from)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("path must end with .bgz: {}", path.display()))
            })?;

        for p in [path.to_path_buf(), fai_path(path), gzi_path(path), plain_path.clone()] {
            if p.exists() {
                return Err(Error::AlreadyExists(p));
            }
        }

        let f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&plain_path)?;
        tracing::debug!(path = %path.display(), "opened for writing");

        Ok(Self {
            path: path.to_path_buf(),
            plain_path,
            codec,
            state: State::Open(BufWriter::new(f)),
            added: HashSet::new(),
            fai: Vec::new(),
            offset: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.added.len()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
    }

    /// Append one record. A key already written to this file is ignored.
    pub fn append(&mut self, key: &str, seq: &str) -> Result<()> {
        let State::Open(out) = &mut self.state else {
            return Err(Error::InvalidArgument(format!(
                "{} is already closed",
                self.path.display()
            )));
        };
        if self.added.contains(key) {
            return Ok(());
        }
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(Error::InvalidArgument(format!("invalid sequence key {key:?}")));
        }
        check_residues(seq)?;

        let header = format!(">{key}\n");
        out.write_all(header.as_bytes())?;
        let start = self.offset + header.len() as u64;
        let mut end = start;
        for line in seq.as_bytes().chunks(LINE_WIDTH) {
            out.write_all(line)?;
            out.write_all(b"\n")?;
            end += line.len() as u64 + 1;
        }
        self.offset = end;
        self.fai.push(fai::Record::new(
            key,
            seq.len() as u64,
            start,
            LINE_BASES,
            LINE_STRIDE,
        ));
        self.added.insert(key.to_string());
        tracing::debug!(key, len = seq.len(), "added sequence");
        Ok(())
    }

    /// Compress, index, and freeze the container. Calling it again after
    /// success is a no-op; after a failure it reports that failure again.
    pub fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Closed => Ok(()),
            State::Failed(reason) => {
                let err = Error::corrupt(&self.path, format!("close failed earlier: {reason}"));
                self.state = State::Failed(reason);
                Err(err)
            }
            State::Open(out) => self.finish(out).inspect_err(|e| {
                self.state = State::Failed(e.to_string());
            }),
        }
    }

    fn finish(&self, mut out: BufWriter<File>) -> Result<()> {
        out.flush()?;
        let f = out.into_inner().map_err(|e| e.into_error())?;
        f.sync_all()?;
        drop(f);

        let compressed = match &self.codec {
            Codec::Bgzip(tool) => tool.compress(&self.plain_path)?,
            Codec::Native => {
                let gz = with_suffix(&self.plain_path, ".gz");
                compress(&self.plain_path, &gz)?;
                fs::remove_file(&self.plain_path)?;
                gz
            }
        };
        fs::rename(&compressed, &self.path)?;

        fai::fs::write(fai_path(&self.path), &fai::Index::from(self.fai.clone()))?;
        bgzf::gzi::fs::write(gzi_path(&self.path), &block_index(&self.path)?)?;

        for p in [self.path.clone(), fai_path(&self.path), gzi_path(&self.path)] {
            set_readonly(&p)?;
        }

        tracing::info!(path = %self.path.display(), n = self.added.len(), "container written");
        Ok(())
    }
}

impl Drop for BlockSequenceWriter {
    fn drop(&mut self) {
        if matches!(self.state, State::Open(_)) {
            tracing::error!(
                path = %self.path.display(),
                "container writer was not explicitly closed; closing now"
            );
            if let Err(e) = self.close() {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "closing dropped writer failed"
                );
            }
        } else if let State::Failed(reason) = &self.state {
            tracing::error!(path = %self.path.display(), %reason, "container was never completed");
        }
    }
}

fn compress(src: &Path, dst: &Path) -> Result<()> {
    let mut input = BufReader::new(File::open(src)?);
    let out = OpenOptions::new().write(true).create_new(true).open(dst)?;
    let mut w = bgzf::io::Writer::new(BufWriter::new(out));
    io::copy(&mut input, &mut w)?;
    let out = w.finish()?.into_inner().map_err(|e| e.into_error())?;
    out.sync_all()?;
    Ok(())
}

/// `.gzi` entries: (compressed, uncompressed) start of every block but the
/// first.
fn block_index(path: &Path) -> Result<bgzf::gzi::Index> {
    let corrupt = |e: io::Error| Error::corrupt(path, e.to_string());
    let mut r = bgzf::io::Reader::new(BufReader::new(File::open(path)?));
    let mut entries = Vec::new();
    let mut upos = 0u64;
    loop {
        let n = r.fill_buf().map_err(corrupt)?.len();
        if n == 0 {
            break;
        }
        let cpos = r.virtual_position().compressed();
        if cpos > 0 {
            entries.push((cpos, upos));
        }
        upos += n as u64;
        r.consume(n);
    }
    Ok(bgzf::gzi::Index::from(entries))
}

fn set_readonly(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)?;
    Ok(())
}

/// Uncompressed file offset of residue `i`.
fn residue_offset(rec: &fai::Record, i: u64) -> u64 {
    let bases = rec.line_base_count().get();
    rec.position() + (i / bases) * rec.line_width().get() + i % bases
}

/// Random-access reader over a closed container.
pub struct BlockSequenceReader {
    path: PathBuf,
    index: HashMap<String, fai::Record>,
    data: Mutex<bgzf::io::IndexedReader<BufReader<File>>>,
}

impl BlockSequenceReader {
    pub fn open(path: &Path) -> Result<Self> {
        let fai_file = fai_path(path);
        let records =
            fai::fs::read(&fai_file).map_err(|e| Error::corrupt(&fai_file, e.to_string()))?;
        let gzi_file = gzi_path(path);
        let blocks =
            bgzf::gzi::fs::read(&gzi_file).map_err(|e| Error::corrupt(&gzi_file, e.to_string()))?;
        let file = File::open(path).map_err(|e| Error::corrupt(path, e.to_string()))?;

        let index = Vec::from(records)
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            index,
            data: Mutex::new(bgzf::io::IndexedReader::new(BufReader::new(file), blocks)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    pub fn len_of(&self, key: &str) -> Option<u64> {
        self.index.get(key).map(fai::Record::length)
    }

    /// Residues `[start, end)` of `key`; missing bounds mean the whole
    /// sequence, and bounds past the end are clamped.
    pub fn fetch(&self, key: &str, start: Option<u64>, end: Option<u64>) -> Result<String> {
        let rec = self
            .index
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("{key} in {}", self.path.display())))?;

        let end = end.unwrap_or(rec.length()).min(rec.length());
        let start = start.unwrap_or(0).min(end);
        if start == end {
            return Ok(String::new());
        }

        let ustart = residue_offset(rec, start);
        let want = residue_offset(rec, end - 1) + 1 - ustart;
        let corrupt = |e: io::Error| Error::corrupt(&self.path, e.to_string());

        let mut raw = Vec::with_capacity(want as usize);
        {
            let mut data = self.data.lock();
            data.seek(SeekFrom::Start(ustart)).map_err(corrupt)?;
            (&mut *data).take(want).read_to_end(&mut raw).map_err(corrupt)?;
        }
        if raw.len() as u64 != want {
            return Err(Error::corrupt(&self.path, "unexpected end of data"));
        }
        raw.retain(|&b| b != b'\n' && b != b'\r');

        String::from_utf8(raw).map_err(|e| Error::corrupt(&self.path, e.to_string()))
    }
}
