//! The repository: content-addressed sequences plus namespaced aliases under
//! one root directory.
//!
//! ```text
//! <root>/LOCK                 writer lock
//! <root>/aliases.redb         alias index
//! <root>/sequences/db.redb    sequence metadata
//! <root>/sequences/YYYY/MMDD/HHMM/<ts>.fa.bgz{,.fai,.gzi}
//! ```

use crate::aliasdb::{AliasIndex, AliasQuery, ALIASES_DB};
use crate::block_file;
use crate::config::RepoConfig;
use crate::db;
use crate::digest::SequenceDigests;
use crate::error::{Error, Result};
use crate::records::{AliasRecord, SequenceRecord};
use crate::seqstore::SequenceStore;
use crate::translate;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

pub const SEQUENCES_DIR: &str = "sequences";
pub const LOCK_FILE: &str = "LOCK";

/// `namespace:alias` separator.
pub const NS_SEP: char = ':';

/// Split `ns:alias` at the first separator; a bare alias has no namespace.
pub fn parse_identifier(identifier: &str) -> (Option<&str>, &str) {
    match identifier.split_once(NS_SEP) {
        Some((ns, alias)) => (Some(ns), alias),
        None => (None, identifier),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Pending {
    sequences: u64,
    residues: u64,
    aliases: u64,
}

pub struct Repository {
    root: PathBuf,
    config: RepoConfig,
    sequences: SequenceStore,
    aliases: AliasIndex,
    pending: Mutex<Pending>,
    _lock: Option<File>,
}

impl Repository {
    /// Open an existing repository, or create one when writeable.
    pub fn open(root: &Path, config: RepoConfig) -> Result<Self> {
        let lock = if config.writeable {
            fs::create_dir_all(root)?;
            Some(db::lock_exclusive(&root.join(LOCK_FILE))?)
        } else {
            if !root.is_dir() {
                return Err(Error::NotFound(format!("repository {}", root.display())));
            }
            None
        };

        let sequences = SequenceStore::open(&root.join(SEQUENCES_DIR), &config)?;
        let aliases = AliasIndex::open(&root.join(ALIASES_DB), config.writeable)?;
        info!(root = %root.display(), writeable = config.writeable, "opened repository");

        Ok(Self {
            root: root.to_path_buf(),
            config,
            sequences,
            aliases,
            pending: Mutex::new(Pending::default()),
            _lock: lock,
        })
    }

    /// Create a repository in an empty (or missing) directory.
    pub fn init(root: &Path, config: RepoConfig) -> Result<Self> {
        if root.exists() && fs::read_dir(root)?.next().is_some() {
            return Err(Error::AlreadyExists(root.to_path_buf()));
        }
        Self::open(root, config.with_writeable(true))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn sequences(&self) -> &SequenceStore {
        &self.sequences
    }

    pub fn aliases(&self) -> &AliasIndex {
        &self.aliases
    }

    /// Store `seq` and attach `aliases` to it.
    ///
    /// Returns (sequences added, aliases added). Storing known content or a
    /// known alias adds nothing.
    pub fn store<I, N, A>(&self, seq: &str, aliases: I) -> Result<(u64, u64)>
    where
        I: IntoIterator<Item = (N, A)>,
        N: AsRef<str>,
        A: AsRef<str>,
    {
        if !self.config.writeable {
            return Err(Error::ReadOnly);
        }

        let seq: Cow<'_, str> = if self.config.upcase {
            Cow::Owned(seq.to_ascii_uppercase())
        } else {
            Cow::Borrowed(seq)
        };
        block_file::check_residues(&seq)?;
        let digests = SequenceDigests::compute(&seq);
        let seq_id = digests.seq_id();
        let short = seq_id.get(..10).unwrap_or(seq_id);
        let thresholds = self.config.commit_thresholds;

        let mut n_seqs = 0;
        if !self.sequences.contains(seq_id)? {
            info!(seq_id = short, residues = seq.len(), "storing sequence");
            if seq.len() as u64 > thresholds.residues {
                debug!("precommit for large sequence");
                self.commit()?;
            }
            self.sequences.store(seq_id, &seq)?;
            let digest_aliases = digests.aliases();
            for (namespace, alias) in &digest_aliases {
                self.aliases.store_alias(seq_id, namespace, alias)?;
            }
            let mut p = self.pending.lock();
            p.sequences += 1;
            p.residues += seq.len() as u64;
            p.aliases += digest_aliases.len() as u64;
            n_seqs = 1;
        } else {
            debug!(seq_id = short, "sequence exists");
        }

        let existing: HashSet<(String, String)> = self
            .aliases
            .find(&AliasQuery::new().seq_id(seq_id))?
            .map(|r| (r.namespace, r.alias))
            .collect();
        let new: BTreeSet<(String, String)> = aliases
            .into_iter()
            .map(|(ns, a)| translate::normalize(ns.as_ref(), a.as_ref()))
            .filter(|pair| !existing.contains(pair))
            .collect();
        if !new.is_empty() {
            info!(seq_id = short, n = new.len(), "new aliases");
            for (namespace, alias) in &new {
                self.aliases.store_alias(seq_id, namespace, alias)?;
            }
        }
        let n_aliases = new.len() as u64;

        let over = {
            let mut p = self.pending.lock();
            p.aliases += n_aliases;
            p.sequences > thresholds.sequences
                || p.aliases > thresholds.aliases
                || p.residues > thresholds.residues
        };
        if over {
            let p = *self.pending.lock();
            info!(
                sequences = p.sequences,
                aliases = p.aliases,
                residues = p.residues,
                "hit commit thresholds"
            );
            self.commit()?;
        }
        Ok((n_seqs, n_aliases))
    }

    /// Text of the one sequence `alias` names, or its `[start, end)` slice.
    pub fn fetch(
        &self,
        alias: &str,
        namespace: Option<&str>,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<String> {
        let seq_id = self.unique_seq_id(alias, namespace)?;
        self.sequences.fetch(&seq_id, start, end)
    }

    /// Fetch by `namespace:alias`, e.g. `refseq:NM_000059.3`.
    pub fn fetch_uri(&self, uri: &str, start: Option<u64>, end: Option<u64>) -> Result<String> {
        match parse_identifier(uri) {
            (Some(ns), alias) if !ns.is_empty() && !alias.is_empty() => {
                self.fetch(alias, Some(ns), start, end)
            }
            _ => Err(Error::InvalidArgument(format!(
                "expected namespace{NS_SEP}alias, got {uri:?}"
            ))),
        }
    }

    /// True if `ns:alias` (or a bare alias in any namespace) is current.
    pub fn contains_identifier(&self, identifier: &str) -> Result<bool> {
        let (namespace, alias) = parse_identifier(identifier);
        Ok(self.aliases.find(&query(alias, namespace))?.next().is_some())
    }

    /// Lazy handle on the sequence `identifier` names.
    pub fn sequence(&self, identifier: &str) -> Result<SequenceHandle<'_>> {
        let (namespace, alias) = parse_identifier(identifier);
        let seq_id = self.unique_seq_id(alias, namespace)?;
        let record = self.sequences.fetch_metadata(&seq_id)?;
        Ok(SequenceHandle { repo: self, record })
    }

    /// Every `ns:alias` of the sequence `alias` names, optionally limited to
    /// `target_namespaces` (empty means all).
    pub fn translate_alias(
        &self,
        alias: &str,
        namespace: Option<&str>,
        target_namespaces: &[&str],
    ) -> Result<Vec<String>> {
        let seq_id = self.unique_seq_id(alias, namespace)?;
        Ok(self
            .aliases
            .find(&AliasQuery::new().seq_id(seq_id))?
            .filter(|r| {
                target_namespaces.is_empty() || target_namespaces.contains(&r.namespace.as_str())
            })
            .map(|r| r.identifier())
            .collect())
    }

    pub fn translate_identifier(
        &self,
        identifier: &str,
        target_namespaces: &[&str],
    ) -> Result<Vec<String>> {
        let (namespace, alias) = parse_identifier(identifier);
        self.translate_alias(alias, namespace, target_namespaces)
    }

    /// Commit sequences, then aliases.
    pub fn commit(&self) -> Result<()> {
        self.sequences.commit()?;
        self.aliases.commit()?;
        let p = std::mem::take(&mut *self.pending.lock());
        if p.sequences + p.aliases > 0 {
            info!(
                sequences = p.sequences,
                residues = p.residues,
                aliases = p.aliases,
                "committed"
            );
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.sequences.has_pending() || self.aliases.has_pending()
    }

    /// Run `f`, then commit whether or not it succeeded.
    pub fn scoped<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let out = f(self);
        let committed = self.commit();
        match (out, committed) {
            (Ok(v), Ok(())) => Ok(v),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(c)) => {
                error!("commit after failure also failed: {c}");
                Err(e)
            }
        }
    }

    /// Every sequence with its text and current aliases, ordered by seq_id.
    pub fn iter(
        &self,
    ) -> Result<impl Iterator<Item = Result<(SequenceRecord, String, Vec<AliasRecord>)>> + '_> {
        Ok(self.sequences.iter()?.map(move |row| {
            let (rec, seq) = row?;
            let aliases = self
                .aliases
                .find(&AliasQuery::new().seq_id(rec.seq_id.as_str()))?
                .collect();
            Ok((rec, seq, aliases))
        }))
    }

    fn unique_seq_id(&self, alias: &str, namespace: Option<&str>) -> Result<String> {
        let seq_ids: BTreeSet<String> = self
            .aliases
            .find(&query(alias, namespace))?
            .map(|r| r.seq_id)
            .collect();
        let mut it = seq_ids.into_iter();
        match (it.next(), it.len()) {
            (Some(seq_id), 0) => Ok(seq_id),
            (None, _) => Err(Error::NotFound(format!(
                "alias {alias} (namespace: {})",
                namespace.unwrap_or("any")
            ))),
            (Some(_), more) => Err(Error::Ambiguous {
                alias: alias.to_string(),
                namespace: namespace.unwrap_or("any").to_string(),
                n: more + 1,
            }),
        }
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        let p = *self.pending.get_mut();
        if self.has_pending() {
            error!(
                sequences = p.sequences,
                aliases = p.aliases,
                "repository dropped without commit; discarding pending work"
            );
        }
    }
}

fn query(alias: &str, namespace: Option<&str>) -> AliasQuery {
    let q = AliasQuery::new().alias(alias);
    match namespace {
        Some(ns) => q.namespace(ns),
        None => q,
    }
}

/// A resolved sequence; text is read on demand.
pub struct SequenceHandle<'a> {
    repo: &'a Repository,
    record: SequenceRecord,
}

impl SequenceHandle<'_> {
    pub fn seq_id(&self) -> &str {
        &self.record.seq_id
    }

    pub fn record(&self) -> &SequenceRecord {
        &self.record
    }

    pub fn len(&self) -> u64 {
        self.record.length
    }

    pub fn is_empty(&self) -> bool {
        self.record.length == 0
    }

    pub fn slice(&self, start: u64, end: u64) -> Result<String> {
        if start > end {
            return Err(Error::InvalidArgument(format!("slice {start}..{end}")));
        }
        self.repo
            .sequences
            .fetch(&self.record.seq_id, Some(start), Some(end))
    }

    pub fn text(&self) -> Result<String> {
        self.repo.sequences.fetch(&self.record.seq_id, None, None)
    }

    /// Current aliases as `ns:alias`.
    pub fn aliases(&self) -> Result<Vec<String>> {
        Ok(self
            .repo
            .aliases
            .find(&AliasQuery::new().seq_id(self.record.seq_id.as_str()))?
            .map(|r| r.identifier())
            .collect())
    }
}

impl std::fmt::Debug for SequenceHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceHandle")
            .field("seq_id", &self.record.seq_id)
            .field("len", &self.record.length)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommitThresholds, Compressor};

    fn writeable() -> RepoConfig {
        RepoConfig::writeable().with_compressor(Compressor::Native)
    }

    #[test]
    fn identifiers_split_at_first_colon() {
        assert_eq!(parse_identifier("refseq:NM_1.2"), (Some("refseq"), "NM_1.2"));
        assert_eq!(parse_identifier("NM_1.2"), (None, "NM_1.2"));
        assert_eq!(parse_identifier("a:b:c"), (Some("a"), "b:c"));
    }

    #[test]
    fn init_refuses_non_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stray"), b"x").unwrap();
        assert!(matches!(
            Repository::init(dir.path(), writeable()),
            Err(Error::AlreadyExists(_))
        ));

        let fresh = dir.path().join("fresh");
        let config = RepoConfig::read_only().with_compressor(Compressor::Native);
        let repo = Repository::init(&fresh, config).unwrap();
        assert!(repo.config().writeable);
        assert!(fresh.join(LOCK_FILE).is_file());
        assert!(fresh.join(ALIASES_DB).is_file());
    }

    #[test]
    fn second_writer_is_locked_out() {
        let dir = tempfile::tempdir().unwrap();
        let first = Repository::open(dir.path(), writeable()).unwrap();
        assert!(Repository::open(dir.path(), writeable()).is_err());
        drop(first);
        assert!(Repository::open(dir.path(), writeable()).is_ok());
    }

    #[test]
    fn readers_share_the_repository() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = Repository::open(dir.path(), writeable()).unwrap();
            repo.store("ACGTTGCA", [("t", "x")]).unwrap();
            repo.commit().unwrap();
        }
        let a = Repository::open(dir.path(), RepoConfig::read_only()).unwrap();
        let b = Repository::open(dir.path(), RepoConfig::read_only()).unwrap();
        assert_eq!(a.fetch("x", Some("t"), None, None).unwrap(), "ACGTTGCA");
        assert_eq!(b.fetch("x", Some("t"), Some(2), Some(5)).unwrap(), "GTT");
        assert!(matches!(a.store("AAAA", [("t", "y")]), Err(Error::ReadOnly)));
    }

    #[test]
    fn rejects_residues_outside_printable_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), writeable()).unwrap();
        for seq in ["ACGT\n>evil\nTT", "ACGT\u{e9}", "AC\tGT"] {
            assert!(
                matches!(repo.store(seq, [("t", "bad")]), Err(Error::InvalidArgument(_))),
                "{seq:?}"
            );
        }
        assert!(!repo.has_pending());
        assert!(matches!(repo.sequence("t:bad"), Err(Error::NotFound(_))));
    }

    #[test]
    fn thresholds_trigger_commits() {
        let dir = tempfile::tempdir().unwrap();
        let config = writeable().with_commit_thresholds(CommitThresholds {
            sequences: 1,
            aliases: 1_000,
            residues: 1_000,
        });
        let repo = Repository::open(dir.path(), config).unwrap();
        repo.store("AAAA", [("t", "a")]).unwrap();
        assert!(repo.has_pending());
        repo.store("CCCC", [("t", "c")]).unwrap();
        assert!(!repo.has_pending());
        assert_eq!(repo.sequences().stats().unwrap().n_files, 1);
    }

    #[test]
    fn large_sequence_forces_precommit() {
        let dir = tempfile::tempdir().unwrap();
        let config = writeable().with_commit_thresholds(CommitThresholds {
            sequences: 100,
            aliases: 1_000,
            residues: 8,
        });
        let repo = Repository::open(dir.path(), config).unwrap();
        repo.store("ACGT", [("t", "small")]).unwrap();
        // the pending small one is committed before the big one is written
        repo.store("ACGTACGTACGT", [("t", "big")]).unwrap();
        repo.commit().unwrap();
        assert_eq!(repo.sequences().stats().unwrap().n_files, 2);
    }

    #[test]
    fn scoped_commits_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), writeable()).unwrap();
        let out: Result<()> = repo.scoped(|r| {
            r.store("GATTACA", [("film", "gattaca")])?;
            Err(Error::InvalidArgument("stop".into()))
        });
        assert!(out.is_err());
        assert!(!repo.has_pending());
        assert_eq!(repo.fetch("gattaca", None, None, None).unwrap(), "GATTACA");
    }

    #[test]
    fn handle_reads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::open(dir.path(), writeable()).unwrap();
        repo.store("ACGTTGCA", [("t", "x")]).unwrap();
        repo.commit().unwrap();

        let h = repo.sequence("t:x").unwrap();
        assert_eq!(h.len(), 8);
        assert!(!h.is_empty());
        assert_eq!(h.slice(2, 5).unwrap(), "GTT");
        assert_eq!(h.slice(8, 8).unwrap(), "");
        assert!(h.slice(5, 2).is_err());
        assert_eq!(h.text().unwrap(), "ACGTTGCA");
        assert!(h.aliases().unwrap().contains(&"t:x".to_string()));
        assert!(matches!(repo.sequence("t:y"), Err(Error::NotFound(_))));
    }
}
