//! Many block-compressed containers plus one metadata index.
//!
//! Writes go to a single open container per session; the session's metadata
//! rows live in an uncommitted redb transaction until [`SequenceStore::commit`]
//! closes the container and commits the rows, in that order.

use crate::block_file::{BlockSequenceReader, BlockSequenceWriter, Codec, CONTAINER_SUFFIX};
use crate::cache::Cache;
use crate::config::{Compressor, RepoConfig};
use crate::db::{self, IndexDb};
use crate::error::{Error, Result};
use crate::records::{alphabet_of, SequenceRecord};
use crate::schema::{SEQINFO, SEQUENCE_SCHEMA_VERSION};
use crate::tool::Bgzip;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redb::{ReadableTable, ReadableTableMetadata, WriteTransaction};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SEQUENCES_DB: &str = "db.redb";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceStoreStats {
    pub n_sequences: u64,
    pub total_length: u64,
    pub n_files: u64,
    /// Oldest and newest `added`; None for an empty store.
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

struct WriteSession {
    relpath: String,
    writer: BlockSequenceWriter,
    tx: WriteTransaction,
}

pub struct SequenceStore {
    root: PathBuf,
    db: IndexDb,
    writeable: bool,
    compressor: Compressor,
    codec: Mutex<Option<Codec>>,
    session: Mutex<Option<WriteSession>>,
    readers: Cache<PathBuf, Arc<BlockSequenceReader>>,
    metadata: Cache<String, SequenceRecord>,
}

impl SequenceStore {
    pub fn open(root: &Path, config: &RepoConfig) -> Result<Self> {
        if config.writeable {
            fs::create_dir_all(root)?;
        }
        let db = db::open_index(
            &root.join(SEQUENCES_DB),
            config.writeable,
            "sequence store",
            SEQUENCE_SCHEMA_VERSION,
            |tx| {
                tx.open_table(SEQINFO)?;
                Ok(())
            },
        )?;

        let store = Self {
            root: root.to_path_buf(),
            db,
            writeable: config.writeable,
            compressor: config.compressor.clone(),
            codec: Mutex::new(None),
            session: Mutex::new(None),
            readers: Cache::new(config.fd_cache),
            metadata: Cache::new(config.metadata_cache),
        };
        info!(
            readers = %store.readers.size(),
            metadata = %store.metadata.size(),
            "sequence store caches"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn writeable(&self) -> bool {
        self.writeable
    }

    pub fn schema_version(&self) -> Result<Option<u64>> {
        db::schema_version(&self.db)
    }

    /// True once `store` has accepted `seq_id`, committed or not.
    pub fn contains(&self, seq_id: &str) -> Result<bool> {
        Ok(self.lookup(seq_id)?.0.is_some())
    }

    pub fn fetch_metadata(&self, seq_id: &str) -> Result<SequenceRecord> {
        let key = seq_id.to_string();
        if let Some(rec) = self.metadata.get(&key) {
            return Ok(rec);
        }
        let (rec, committed) = self.lookup(seq_id)?;
        let rec = rec.ok_or_else(|| Error::NotFound(format!("sequence {seq_id}")))?;
        if committed {
            self.metadata.insert(key, rec.clone());
        }
        Ok(rec)
    }

    /// Sequence text, or the half-open slice `[start, end)` of it.
    pub fn fetch(&self, seq_id: &str, start: Option<u64>, end: Option<u64>) -> Result<String> {
        let rec = self.fetch_metadata(seq_id)?;

        let in_session = self
            .session
            .lock()
            .as_ref()
            .is_some_and(|s| s.relpath == rec.relpath);
        if in_session {
            warn!(relpath = %rec.relpath, "read from the open container; committing first");
            self.commit()?;
        }

        let reader = self.reader(&self.root.join(&rec.relpath))?;
        reader.fetch(seq_id, start, end)
    }

    /// Append `seq` under `seq_id` to the open session. No-op if present.
    pub fn store(&self, seq_id: &str, seq: &str) -> Result<String> {
        if !self.writeable {
            return Err(Error::ReadOnly);
        }

        let mut guard = self.session.lock();
        let session = match guard.take() {
            Some(s) => s,
            None => self.open_session()?,
        };
        let s = guard.insert(session);

        let mut seqinfo = s.tx.open_table(SEQINFO)?;
        if seqinfo.get(seq_id)?.is_some() {
            debug!(seq_id, "sequence already stored");
            return Ok(seq_id.to_string());
        }

        s.writer.append(seq_id, seq)?;
        let rec = SequenceRecord {
            seq_id: seq_id.to_string(),
            length: seq.len() as u64,
            alphabet: alphabet_of(seq),
            added: Utc::now(),
            relpath: s.relpath.clone(),
        };
        seqinfo.insert(seq_id, rec.encode().as_slice())?;
        debug!(seq_id, length = rec.length, relpath = %rec.relpath, "stored sequence");
        Ok(seq_id.to_string())
    }

    /// Close the open container, then commit its metadata. No-op when idle.
    pub fn commit(&self) -> Result<()> {
        let Some(mut s) = self.session.lock().take() else {
            return Ok(());
        };
        let n = s.writer.len();
        s.writer.close()?;
        s.tx.commit()?;
        info!(relpath = %s.relpath, sequences = n, "committed sequences");
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Every record with its text, ordered by seq_id. Each call is a fresh
    /// traversal; text is read lazily per record.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<(SequenceRecord, String)>> + '_> {
        let records = self.records()?;
        Ok(records.into_iter().map(move |rec| {
            let seq = self.fetch(&rec.seq_id, None, None)?;
            Ok((rec, seq))
        }))
    }

    pub fn stats(&self) -> Result<SequenceStoreStats> {
        let mut stats = SequenceStoreStats::default();
        let mut files = HashSet::new();
        for rec in self.records()? {
            stats.n_sequences += 1;
            stats.total_length += rec.length;
            stats.time_range = Some(match stats.time_range {
                None => (rec.added, rec.added),
                Some((lo, hi)) => (lo.min(rec.added), hi.max(rec.added)),
            });
            files.insert(rec.relpath);
        }
        stats.n_files = files.len() as u64;
        Ok(stats)
    }

    /// Number of stored sequences, pending ones included.
    pub fn len(&self) -> Result<u64> {
        let session = self.session.lock();
        match session.as_ref() {
            Some(s) => Ok(s.tx.open_table(SEQINFO)?.len()?),
            None => Ok(self.db.begin_read()?.open_table(SEQINFO)?.len()?),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Record for `seq_id` and whether it is already committed.
    fn lookup(&self, seq_id: &str) -> Result<(Option<SequenceRecord>, bool)> {
        let session = self.session.lock();
        match session.as_ref() {
            Some(s) => {
                let rec = get_record(&s.tx.open_table(SEQINFO)?, seq_id)?;
                let committed = match &rec {
                    Some(r) => r.relpath != s.relpath,
                    None => false,
                };
                Ok((rec, committed))
            }
            None => {
                let rec = get_record(&self.db.begin_read()?.open_table(SEQINFO)?, seq_id)?;
                Ok((rec, true))
            }
        }
    }

    fn records(&self) -> Result<Vec<SequenceRecord>> {
        let session = self.session.lock();
        match session.as_ref() {
            Some(s) => all_records(&s.tx.open_table(SEQINFO)?),
            None => all_records(&self.db.begin_read()?.open_table(SEQINFO)?),
        }
    }

    fn reader(&self, path: &Path) -> Result<Arc<BlockSequenceReader>> {
        self.readers.get_or_try_insert_with(path.to_path_buf(), || {
            debug!(path = %path.display(), "opening container");
            BlockSequenceReader::open(path).map(Arc::new)
        })
    }

    fn codec(&self) -> Result<Codec> {
        let mut codec = self.codec.lock();
        if let Some(c) = codec.as_ref() {
            return Ok(c.clone());
        }
        let c = match &self.compressor {
            Compressor::Native => Codec::Native,
            Compressor::Bgzip { exe } => {
                let tool = Bgzip::locate(exe.as_deref())?;
                info!(exe = %tool.exe().display(), version = tool.version(), "using bgzip");
                Codec::Bgzip(tool)
            }
        };
        Ok(codec.insert(c).clone())
    }

    fn open_session(&self) -> Result<WriteSession> {
        let codec = self.codec()?;
        let now = Utc::now();
        let reldir = now.format("%Y/%m%d/%H%M").to_string();
        let relpath = format!(
            "{reldir}/{}.{:06}{CONTAINER_SUFFIX}",
            now.timestamp(),
            now.timestamp_subsec_micros()
        );
        fs::create_dir_all(self.root.join(&reldir))?;
        let writer = BlockSequenceWriter::create(&self.root.join(&relpath), codec)?;
        let tx = self.db.begin_write()?;
        info!(%relpath, "opened write session");
        Ok(WriteSession {
            relpath,
            writer,
            tx,
        })
    }
}

impl Drop for SequenceStore {
    fn drop(&mut self) {
        if let Some(s) = self.session.get_mut().take() {
            error!(
                relpath = %s.relpath,
                sequences = s.writer.len(),
                "sequence store dropped with uncommitted sequences; discarding their metadata"
            );
            if let Err(e) = s.tx.abort() {
                error!("abort failed: {e}");
            }
        }
    }
}

fn get_record<T>(table: &T, seq_id: &str) -> Result<Option<SequenceRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(seq_id)? {
        Some(v) => Ok(Some(SequenceRecord::decode(seq_id, v.value())?)),
        None => Ok(None),
    }
}

fn all_records<T>(table: &T) -> Result<Vec<SequenceRecord>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for row in table.iter()? {
        let (k, v) = row?;
        out.push(SequenceRecord::decode(k.value(), v.value())?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSize;
    use std::num::NonZeroUsize;

    fn cfg() -> RepoConfig {
        RepoConfig::writeable().with_compressor(Compressor::Native)
    }

    #[test]
    fn store_then_fetch_across_commit() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::open(dir.path(), &cfg()).unwrap();
        assert!(store.is_empty().unwrap());

        store.store("q1", "ACGTACGT").unwrap();
        assert!(store.contains("q1").unwrap());
        assert!(!store.contains("q2").unwrap());
        assert!(store.has_pending());

        // reading the open container commits it first
        assert_eq!(store.fetch("q1", Some(2), Some(5)).unwrap(), "GTA");
        assert!(!store.has_pending());

        let rec = store.fetch_metadata("q1").unwrap();
        assert_eq!(rec.length, 8);
        assert_eq!(rec.alphabet, "ACGT");
        assert!(rec.relpath.ends_with(CONTAINER_SUFFIX));
        assert!(dir.path().join(&rec.relpath).is_file());
    }

    #[test]
    fn duplicate_store_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::open(dir.path(), &cfg()).unwrap();
        store.store("q1", "AAAA").unwrap();
        store.commit().unwrap();
        store.store("q1", "AAAA").unwrap();
        store.commit().unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.stats().unwrap().n_files, 1);
    }

    #[test]
    fn sessions_write_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::open(dir.path(), &cfg()).unwrap();
        store.store("a", "AC").unwrap();
        store.store("b", "GGT").unwrap();
        store.commit().unwrap();
        store.store("c", "T").unwrap();
        store.commit().unwrap();
        store.commit().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.n_sequences, 3);
        assert_eq!(stats.total_length, 6);
        assert_eq!(stats.n_files, 2);
        let (lo, hi) = stats.time_range.unwrap();
        assert!(lo <= hi);

        let got: Vec<(String, String)> = store
            .iter()
            .unwrap()
            .map(|r| r.map(|(rec, s)| (rec.seq_id, s)))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            got,
            vec![
                ("a".to_string(), "AC".to_string()),
                ("b".to_string(), "GGT".to_string()),
                ("c".to_string(), "T".to_string()),
            ]
        );
    }

    #[test]
    fn read_only_rejects_store_and_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sequences");
        assert!(matches!(
            SequenceStore::open(&root, &RepoConfig::read_only()),
            Err(Error::NotFound(_))
        ));

        {
            let store = SequenceStore::open(&root, &cfg()).unwrap();
            store.store("q1", "ACGT").unwrap();
            store.commit().unwrap();
        }

        let ro = SequenceStore::open(&root, &RepoConfig::read_only()).unwrap();
        assert!(matches!(ro.store("q2", "TT"), Err(Error::ReadOnly)));
        assert!(!ro.contains("q2").unwrap());
        assert_eq!(ro.fetch("q1", None, None).unwrap(), "ACGT");
        assert!(matches!(ro.fetch("nope", None, None), Err(Error::NotFound(_))));
    }

    #[test]
    fn drop_discards_uncommitted_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SequenceStore::open(dir.path(), &cfg()).unwrap();
            store.store("kept", "AAA").unwrap();
            store.commit().unwrap();
            store.store("lost", "CCC").unwrap();
        }
        let store = SequenceStore::open(dir.path(), &cfg()).unwrap();
        assert!(store.contains("kept").unwrap());
        assert!(!store.contains("lost").unwrap());
    }

    #[test]
    fn bounded_reader_cache() {
        let dir = tempfile::tempdir().unwrap();
        let config = cfg()
            .with_fd_cache(CacheSize::Bounded(NonZeroUsize::new(1).unwrap()))
            .with_metadata_cache(CacheSize::Disabled);
        let store = SequenceStore::open(dir.path(), &config).unwrap();
        for (id, seq) in [("a", "AAAA"), ("b", "CCCC"), ("c", "GGGG")] {
            store.store(id, seq).unwrap();
            store.commit().unwrap();
        }
        for (id, seq) in [("a", "AAAA"), ("b", "CCCC"), ("c", "GGGG"), ("a", "AAAA")] {
            assert_eq!(store.fetch(id, None, None).unwrap(), seq);
            assert_eq!(store.readers.len(), 1);
            assert_eq!(store.metadata.len(), 0);
        }
    }
}
