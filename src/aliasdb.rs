//! Index of (seq_id, namespace, alias) triples with current/historical rows.
//!
//! Tables (see `schema`): `aliases` holds every row ever written, `current`
//! maps each current (namespace, alias) to its row, `seq_to_aliases` lists
//! row ids per sequence, and `by_alias`/`by_namespace` key row ids by alias
//! and by namespace. Rows are never deleted; reassignment flips the old row
//! to not-current.

use crate::codec::{u64_list_pack, u64_list_unpack};
use crate::db::{self, IndexDb};
use crate::error::{Error, Result};
use crate::records::AliasRecord;
use crate::schema::{
    ALIAS_SCHEMA_VERSION, ALIASES, BY_ALIAS, BY_NAMESPACE, CURRENT, KEY_NEXT_ALIAS_ID, META,
    SEQ_TO_ALIASES,
};
use crate::translate;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use redb::{ReadableTable, WriteTransaction};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, error, info};

pub const ALIASES_DB: &str = "aliases.redb";

/// Selection for [`AliasIndex::find`]. Unset fields match everything.
///
/// A value containing `%` is a pattern where `%` matches any run of
/// characters (possibly empty); otherwise it must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasQuery {
    pub seq_id: Option<String>,
    pub namespace: Option<String>,
    pub alias: Option<String>,
    pub current_only: bool,
}

impl Default for AliasQuery {
    fn default() -> Self {
        Self {
            seq_id: None,
            namespace: None,
            alias: None,
            current_only: true,
        }
    }
}

impl AliasQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seq_id(mut self, seq_id: impl Into<String>) -> Self {
        self.seq_id = Some(seq_id.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Include rows that have been reassigned away.
    pub fn with_history(mut self) -> Self {
        self.current_only = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasIndexStats {
    pub count: u64,
    pub current_count: u64,
    pub distinct_sequences: u64,
    pub distinct_namespaces: u64,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

pub struct AliasIndex {
    db: IndexDb,
    writeable: bool,
    pending: Mutex<Option<WriteTransaction>>,
}

impl AliasIndex {
    pub fn open(path: &Path, writeable: bool) -> Result<Self> {
        let db = db::open_index(path, writeable, "alias index", ALIAS_SCHEMA_VERSION, |tx| {
            tx.open_table(ALIASES)?;
            tx.open_table(CURRENT)?;
            tx.open_table(SEQ_TO_ALIASES)?;
            tx.open_table(BY_ALIAS)?;
            tx.open_table(BY_NAMESPACE)?;
            Ok(())
        })?;
        Ok(Self {
            db,
            writeable,
            pending: Mutex::new(None),
        })
    }

    pub fn writeable(&self) -> bool {
        self.writeable
    }

    pub fn schema_version(&self) -> Result<Option<u64>> {
        db::schema_version(&self.db)
    }

    /// True if any row, current or not, names `seq_id`.
    pub fn contains(&self, seq_id: &str) -> Result<bool> {
        self.with_view(|v| v.contains(seq_id))
    }

    /// Matching rows ordered by (seq_id, namespace, alias), each followed by
    /// its external forms (e.g. `NCBI` rows are repeated as `refseq`).
    pub fn find(&self, query: &AliasQuery) -> Result<std::vec::IntoIter<AliasRecord>> {
        let filter = Filter::new(query)?;
        let mut found = self.with_view(|v| v.find(&filter))?;
        found.sort_by(|a, b| {
            (&a.seq_id, &a.namespace, &a.alias, a.alias_id)
                .cmp(&(&b.seq_id, &b.namespace, &b.alias, b.alias_id))
        });

        let mut out = Vec::with_capacity(found.len());
        for rec in found {
            let external: Vec<AliasRecord> = translate::to_external(&rec.namespace, &rec.alias)
                .into_iter()
                .map(|(namespace, alias)| AliasRecord {
                    namespace,
                    alias,
                    ..rec.clone()
                })
                .collect();
            out.push(rec);
            out.extend(external);
        }
        Ok(out.into_iter())
    }

    /// Associate `namespace:alias` with `seq_id`; returns the row id.
    ///
    /// Storing an existing current association returns its id unchanged. An
    /// alias currently pointing elsewhere is reassigned: the old row stays as
    /// history and a new current row is written.
    pub fn store_alias(&self, seq_id: &str, namespace: &str, alias: &str) -> Result<u64> {
        if !self.writeable {
            return Err(Error::ReadOnly);
        }
        let (namespace, alias) = translate::normalize(namespace, alias);

        let mut guard = self.pending.lock();
        let tx = match guard.take() {
            Some(tx) => tx,
            None => self.db.begin_write()?,
        };
        let tx = guard.insert(tx);
        insert_alias(tx, seq_id, &namespace, &alias)
    }

    pub fn commit(&self) -> Result<()> {
        if let Some(tx) = self.pending.lock().take() {
            tx.commit()?;
            info!("committed aliases");
        }
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    pub fn stats(&self) -> Result<AliasIndexStats> {
        self.with_view(|v| v.stats())
    }

    /// Run `f` against pending rows if a write is open, else committed ones.
    fn with_view<R>(&self, f: impl FnOnce(&dyn AliasView) -> Result<R>) -> Result<R> {
        let pending = self.pending.lock();
        match pending.as_ref() {
            Some(tx) => f(&Tables {
                aliases: tx.open_table(ALIASES)?,
                current: tx.open_table(CURRENT)?,
                by_seq: tx.open_table(SEQ_TO_ALIASES)?,
                by_alias: tx.open_table(BY_ALIAS)?,
                by_namespace: tx.open_table(BY_NAMESPACE)?,
            }),
            None => {
                let tx = self.db.begin_read()?;
                f(&Tables {
                    aliases: tx.open_table(ALIASES)?,
                    current: tx.open_table(CURRENT)?,
                    by_seq: tx.open_table(SEQ_TO_ALIASES)?,
                    by_alias: tx.open_table(BY_ALIAS)?,
                    by_namespace: tx.open_table(BY_NAMESPACE)?,
                })
            }
        }
    }
}

impl Drop for AliasIndex {
    fn drop(&mut self) {
        if let Some(tx) = self.pending.get_mut().take() {
            error!("alias index dropped with uncommitted aliases; discarding them");
            if let Err(e) = tx.abort() {
                error!("abort failed: {e}");
            }
        }
    }
}

fn insert_alias(tx: &WriteTransaction, seq_id: &str, namespace: &str, alias: &str) -> Result<u64> {
    let mut meta = tx.open_table(META)?;
    let mut aliases = tx.open_table(ALIASES)?;
    let mut current = tx.open_table(CURRENT)?;
    let mut by_seq = tx.open_table(SEQ_TO_ALIASES)?;
    let mut by_alias = tx.open_table(BY_ALIAS)?;
    let mut by_namespace = tx.open_table(BY_NAMESPACE)?;
    let key = (namespace, alias);

    // Runs at most twice: a reassignment removes the conflicting current row.
    loop {
        let existing = current.get(key)?.map(|v| v.value());
        let Some(old_id) = existing else {
            break;
        };
        let old = load_alias(&aliases, old_id)?;
        if old.seq_id == seq_id {
            debug!(seq_id, namespace, alias, "duplicate alias");
            return Ok(old_id);
        }
        debug!(seq_id, namespace, alias, previous = %old.seq_id, "reassigning alias");
        let retired = AliasRecord {
            is_current: false,
            ..old
        };
        aliases.insert(old_id, retired.encode().as_slice())?;
        current.remove(key)?;
    }

    let id = meta.get(KEY_NEXT_ALIAS_ID)?.map_or(1, |v| v.value());
    meta.insert(KEY_NEXT_ALIAS_ID, id + 1)?;

    let rec = AliasRecord {
        alias_id: id,
        seq_id: seq_id.to_string(),
        namespace: namespace.to_string(),
        alias: alias.to_string(),
        added: Utc::now(),
        is_current: true,
    };
    aliases.insert(id, rec.encode().as_slice())?;
    current.insert(key, id)?;
    by_alias.insert((alias, id), ())?;
    by_namespace.insert((namespace, id), ())?;

    let mut ids = by_seq
        .get(seq_id)?
        .map(|v| u64_list_unpack(v.value()))
        .unwrap_or_default();
    ids.push(id);
    by_seq.insert(seq_id, u64_list_pack(&ids).as_slice())?;

    debug!(alias_id = id, seq_id, namespace, alias, "stored alias");
    Ok(id)
}

fn load_alias<T>(aliases: &T, id: u64) -> Result<AliasRecord>
where
    T: ReadableTable<u64, &'static [u8]>,
{
    let v = aliases
        .get(id)?
        .ok_or_else(|| Error::CorruptRecord(format!("alias row {id} is referenced but missing")))?;
    AliasRecord::decode(id, v.value())
}

enum Selector {
    Exact(String),
    // text before the first `%`, and the whole pattern
    Pattern(String, Regex),
}

impl Selector {
    fn new(s: &str) -> Result<Self> {
        let Some((prefix, _)) = s.split_once('%') else {
            return Ok(Selector::Exact(s.to_string()));
        };
        let body: Vec<String> = s.split('%').map(regex::escape).collect();
        Regex::new(&format!("^(?s:{})$", body.join(".*")))
            .map(|re| Selector::Pattern(prefix.to_string(), re))
            .map_err(|e| Error::InvalidArgument(format!("bad pattern {s:?}: {e}")))
    }

    fn exact(&self) -> Option<&str> {
        match self {
            Selector::Exact(s) => Some(s),
            Selector::Pattern(..) => None,
        }
    }

    /// Every match starts with this.
    fn prefix(&self) -> &str {
        match self {
            Selector::Exact(s) | Selector::Pattern(s, _) => s,
        }
    }

    fn matches(&self, s: &str) -> bool {
        match self {
            Selector::Exact(e) => e == s,
            Selector::Pattern(_, re) => re.is_match(s),
        }
    }
}

fn with_prefix(sel: &Option<Selector>) -> Option<&Selector> {
    sel.as_ref().filter(|s| !s.prefix().is_empty())
}

/// Row ids from a `(text, alias_id)` table whose text matches `sel`, found by
/// scanning only the keys that share its literal prefix.
fn keyed_ids<T>(table: &T, sel: &Selector) -> Result<Vec<u64>>
where
    T: ReadableTable<(&'static str, u64), ()>,
{
    let prefix = sel.prefix();
    let mut ids = Vec::new();
    for row in table.range((prefix, 0u64)..)? {
        let (k, _) = row?;
        let (text, id) = k.value();
        if !text.starts_with(prefix) || (sel.exact().is_some() && text != prefix) {
            break;
        }
        if sel.matches(text) {
            ids.push(id);
        }
    }
    Ok(ids)
}

struct Filter {
    seq_id: Option<Selector>,
    namespace: Option<Selector>,
    alias: Option<Selector>,
    current_only: bool,
}

impl Filter {
    fn new(q: &AliasQuery) -> Result<Self> {
        let (namespace, alias) = match (&q.namespace, &q.alias) {
            (Some(ns), Some(a)) => {
                let (ns, a) = translate::normalize(ns, a);
                (Some(ns), Some(a))
            }
            (Some(ns), None) => (
                Some(
                    translate::internal_namespace(ns)
                        .map(str::to_string)
                        .unwrap_or_else(|| ns.clone()),
                ),
                None,
            ),
            (None, a) => (None, a.clone()),
        };
        Ok(Self {
            seq_id: q.seq_id.as_deref().map(Selector::new).transpose()?,
            namespace: namespace.as_deref().map(Selector::new).transpose()?,
            alias: alias.as_deref().map(Selector::new).transpose()?,
            current_only: q.current_only,
        })
    }

    fn accepts(&self, rec: &AliasRecord) -> bool {
        let ok = |sel: &Option<Selector>, s: &str| sel.as_ref().is_none_or(|sel| sel.matches(s));
        (!self.current_only || rec.is_current)
            && ok(&self.seq_id, &rec.seq_id)
            && ok(&self.namespace, &rec.namespace)
            && ok(&self.alias, &rec.alias)
    }
}

trait AliasView {
    fn contains(&self, seq_id: &str) -> Result<bool>;
    fn find(&self, filter: &Filter) -> Result<Vec<AliasRecord>>;
    fn stats(&self) -> Result<AliasIndexStats>;
}

struct Tables<A, C, S, L, N> {
    aliases: A,
    current: C,
    by_seq: S,
    by_alias: L,
    by_namespace: N,
}

impl<A, C, S, L, N> AliasView for Tables<A, C, S, L, N>
where
    A: ReadableTable<u64, &'static [u8]>,
    C: ReadableTable<(&'static str, &'static str), u64>,
    S: ReadableTable<&'static str, &'static [u8]>,
    L: ReadableTable<(&'static str, u64), ()>,
    N: ReadableTable<(&'static str, u64), ()>,
{
    fn contains(&self, seq_id: &str) -> Result<bool> {
        Ok(self.by_seq.get(seq_id)?.is_some())
    }

    fn find(&self, filter: &Filter) -> Result<Vec<AliasRecord>> {
        let exact_seq = filter.seq_id.as_ref().and_then(Selector::exact);
        let exact_key = match (&filter.namespace, &filter.alias) {
            (Some(ns), Some(a)) if filter.current_only => ns.exact().zip(a.exact()),
            _ => None,
        };

        let mut out = Vec::new();
        let mut keep = |rec: AliasRecord| {
            if filter.accepts(&rec) {
                out.push(rec);
            }
        };

        if let Some(seq_id) = exact_seq {
            let ids = self
                .by_seq
                .get(seq_id)?
                .map(|v| u64_list_unpack(v.value()))
                .unwrap_or_default();
            for id in ids {
                keep(load_alias(&self.aliases, id)?);
            }
        } else if let Some(key) = exact_key {
            if let Some(id) = self.current.get(key)?.map(|v| v.value()) {
                keep(load_alias(&self.aliases, id)?);
            }
        } else if let Some(sel) = with_prefix(&filter.alias) {
            for id in keyed_ids(&self.by_alias, sel)? {
                keep(load_alias(&self.aliases, id)?);
            }
        } else if let Some(sel) = with_prefix(&filter.namespace) {
            for id in keyed_ids(&self.by_namespace, sel)? {
                keep(load_alias(&self.aliases, id)?);
            }
        } else {
            for row in self.aliases.iter()? {
                let (k, v) = row?;
                keep(AliasRecord::decode(k.value(), v.value())?);
            }
        }
        Ok(out)
    }

    fn stats(&self) -> Result<AliasIndexStats> {
        let mut stats = AliasIndexStats::default();
        let mut seqs = HashSet::new();
        let mut namespaces = HashSet::new();
        for row in self.aliases.iter()? {
            let (k, v) = row?;
            let rec = AliasRecord::decode(k.value(), v.value())?;
            stats.count += 1;
            stats.current_count += u64::from(rec.is_current);
            stats.time_range = Some(match stats.time_range {
                None => (rec.added, rec.added),
                Some((lo, hi)) => (lo.min(rec.added), hi.max(rec.added)),
            });
            seqs.insert(rec.seq_id);
            namespaces.insert(rec.namespace);
        }
        stats.distinct_sequences = seqs.len() as u64;
        stats.distinct_namespaces = namespaces.len() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn open(dir: &tempfile::TempDir) -> AliasIndex {
        AliasIndex::open(&dir.path().join(ALIASES_DB), true).unwrap()
    }

    fn rows(it: impl Iterator<Item = AliasRecord>) -> Vec<(u64, String, String, String, bool)> {
        it.map(|r| (r.alias_id, r.seq_id, r.namespace, r.alias, r.is_current))
            .collect()
    }

    #[test]
    fn duplicates_and_reassignment() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);

        assert_eq!(db.store_alias("q1", "A", "1").unwrap(), 1);
        assert_eq!(db.store_alias("q1", "A", "1").unwrap(), 1);
        assert_eq!(db.store_alias("q1", "A", "2").unwrap(), 2);
        assert_eq!(db.store_alias("q1", "B", "1").unwrap(), 3);
        // reassignment keeps the old row as history
        assert_eq!(db.store_alias("q2", "A", "1").unwrap(), 4);

        let mut all = rows(db.find(&AliasQuery::new().with_history()).unwrap());
        all.sort();
        let s = |v: &str| v.to_string();
        assert_eq!(
            all,
            vec![
                (1, s("q1"), s("A"), s("1"), false),
                (2, s("q1"), s("A"), s("2"), true),
                (3, s("q1"), s("B"), s("1"), true),
                (4, s("q2"), s("A"), s("1"), true),
            ]
        );

        let current = rows(db.find(&AliasQuery::new().namespace("A").alias("1")).unwrap());
        assert_eq!(current, vec![(4, s("q2"), s("A"), s("1"), true)]);
    }

    #[test]
    fn pending_rows_are_visible_and_survive_commit() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open(&dir);
            db.store_alias("q1", "en", "rose").unwrap();
            assert!(db.has_pending());
            assert!(db.contains("q1").unwrap());
            db.commit().unwrap();
            assert!(!db.has_pending());
            db.store_alias("q9", "en", "lost").unwrap();
        }
        let db = AliasIndex::open(&dir.path().join(ALIASES_DB), false).unwrap();
        assert!(db.contains("q1").unwrap());
        assert!(!db.contains("q9").unwrap());
        assert!(matches!(db.store_alias("q2", "en", "x"), Err(Error::ReadOnly)));
    }

    #[test]
    fn find_orders_and_expands_external_forms() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.store_alias("q2", "refseq", "NM_01.1").unwrap();
        db.store_alias("q1", "VMC", "GS_abc").unwrap();
        db.store_alias("q1", "MD5", "ffff").unwrap();

        let got: Vec<(String, String, String)> = db
            .find(&AliasQuery::new())
            .unwrap()
            .map(|r| (r.seq_id, r.namespace, r.alias))
            .collect();
        let t = |a: &str, b: &str, c: &str| (a.to_string(), b.to_string(), c.to_string());
        assert_eq!(
            got,
            vec![
                t("q1", "MD5", "ffff"),
                t("q1", "VMC", "GS_abc"),
                t("q1", "sha512t24u", "abc"),
                t("q1", "ga4gh", "SQ.abc"),
                t("q2", "NCBI", "NM_01.1"),
                t("q2", "refseq", "NM_01.1"),
            ]
        );
    }

    #[test]
    fn external_namespaces_in_queries() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.store_alias("q1", "VMC", "GS_abc").unwrap();
        db.store_alias("q2", "NCBI", "NM_01.1").unwrap();

        let by_ga4gh: Vec<String> = db
            .find(&AliasQuery::new().namespace("ga4gh").alias("SQ.abc"))
            .unwrap()
            .map(|r| r.seq_id)
            .collect();
        assert_eq!(by_ga4gh, vec!["q1"; 3]);

        for ns in ["refseq", "RefSeq", "NCBI"] {
            let hit = db
                .find(&AliasQuery::new().namespace(ns).alias("NM_01.1"))
                .unwrap()
                .next()
                .unwrap();
            assert_eq!(hit.seq_id, "q2");
        }
    }

    #[test]
    fn percent_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.store_alias("q1", "NCBI", "NM_000551.3").unwrap();
        db.store_alias("q2", "NCBI", "NM_000551.4").unwrap();
        db.store_alias("q3", "NCBI", "NP_000542.1").unwrap();
        db.store_alias("q4", "LRG", "LRG_1").unwrap();

        let ids = |q: AliasQuery| -> Vec<String> {
            let mut v: Vec<String> = db.find(&q).unwrap().map(|r| r.seq_id).collect();
            v.dedup();
            v
        };
        assert_eq!(ids(AliasQuery::new().alias("NM_000551%")), vec!["q1", "q2"]);
        assert_eq!(ids(AliasQuery::new().alias("%.1")), vec!["q3"]);
        assert_eq!(ids(AliasQuery::new().namespace("N%")), vec!["q1", "q2", "q3"]);
        // `_` and `.` are literal
        assert!(ids(AliasQuery::new().alias("NM_0005_1%")).is_empty());
        assert_eq!(ids(AliasQuery::new().seq_id("q%").alias("LRG%")), vec!["q4"]);
        // case-sensitive
        assert!(ids(AliasQuery::new().alias("nm_%")).is_empty());
    }

    #[test]
    fn history_by_alias_and_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        db.store_alias("q1", "A", "1").unwrap();
        db.store_alias("q1", "A", "10").unwrap();
        db.store_alias("q1", "B", "1").unwrap();
        db.store_alias("q2", "A", "1").unwrap();
        db.store_alias("q3", "AB", "2").unwrap();
        db.commit().unwrap();

        let ids =
            |q: AliasQuery| -> Vec<u64> { db.find(&q).unwrap().map(|r| r.alias_id).collect() };
        assert_eq!(ids(AliasQuery::new().namespace("A").alias("1").with_history()), vec![1, 4]);
        assert_eq!(ids(AliasQuery::new().alias("1").with_history()), vec![1, 3, 4]);
        assert_eq!(ids(AliasQuery::new().alias("1")), vec![3, 4]);
        assert_eq!(ids(AliasQuery::new().namespace("A").with_history()), vec![1, 2, 4]);
        assert_eq!(ids(AliasQuery::new().namespace("A%")), vec![2, 4, 5]);

        // every row is keyed once by alias and once by namespace
        let tx = db.db.begin_read().unwrap();
        let by_alias = tx.open_table(BY_ALIAS).unwrap();
        let by_namespace = tx.open_table(BY_NAMESPACE).unwrap();
        let keys = |t: &redb::ReadOnlyTable<(&'static str, u64), ()>| -> Vec<(String, u64)> {
            t.iter()
                .unwrap()
                .map(|row| {
                    let (k, _) = row.unwrap();
                    let (text, id) = k.value();
                    (text.to_string(), id)
                })
                .collect()
        };
        let k = |t: &str, id: u64| (t.to_string(), id);
        assert_eq!(
            keys(&by_alias),
            vec![k("1", 1), k("1", 3), k("1", 4), k("10", 2), k("2", 5)]
        );
        assert_eq!(
            keys(&by_namespace),
            vec![k("A", 1), k("A", 2), k("A", 4), k("AB", 5), k("B", 3)]
        );
    }

    #[test]
    fn stats_count_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir);
        assert_eq!(db.stats().unwrap(), AliasIndexStats::default());

        db.store_alias("q1", "en", "rose").unwrap();
        db.store_alias("q1", "fr", "rose").unwrap();
        db.store_alias("q2", "en", "rose").unwrap();
        db.commit().unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.current_count, 2);
        assert_eq!(stats.distinct_sequences, 2);
        assert_eq!(stats.distinct_namespaces, 2);
        assert!(stats.time_range.is_some());
        assert_eq!(db.schema_version().unwrap(), Some(ALIAS_SCHEMA_VERSION));
    }
}
