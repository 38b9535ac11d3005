use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Capacity of a cache: off, bounded with LRU eviction, or unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSize {
    Disabled,
    Bounded(NonZeroUsize),
    Unbounded,
}

impl CacheSize {
    /// `0` disables, `none` means unbounded, anything else bounds the cache.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") {
            return Some(CacheSize::Unbounded);
        }
        let n: usize = s.parse().ok()?;
        Some(NonZeroUsize::new(n).map_or(CacheSize::Disabled, CacheSize::Bounded))
    }
}

impl std::fmt::Display for CacheSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheSize::Disabled => f.write_str("disabled"),
            CacheSize::Bounded(n) => write!(f, "{n}"),
            CacheSize::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Thread-safe cache; most recently used entries live at the back.
pub struct Cache<K, V> {
    size: CacheSize,
    map: Mutex<IndexMap<K, V>>,
}

impl<K: Hash + Eq, V: Clone> Cache<K, V> {
    pub fn new(size: CacheSize) -> Self {
        Self {
            size,
            map: Mutex::new(IndexMap::new()),
        }
    }

    pub fn size(&self) -> CacheSize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.map.lock();
        let i = map.get_index_of(key)?;
        let last = map.len() - 1;
        map.move_index(i, last);
        map.get_index(last).map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let cap = match self.size {
            CacheSize::Disabled => return,
            CacheSize::Bounded(n) => Some(n.get()),
            CacheSize::Unbounded => None,
        };
        let mut map = self.map.lock();
        map.shift_remove(&key);
        map.insert(key, value);
        if let Some(cap) = cap {
            while map.len() > cap {
                map.shift_remove_index(0);
            }
        }
    }

    /// Cached value, or the result of `load` (cached unless disabled).
    pub fn get_or_try_insert_with<E>(
        &self,
        key: K,
        load: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E>
    where
        K: Clone,
    {
        if let Some(v) = self.get(&key) {
            return Ok(v);
        }
        // Loaded outside the lock; a racing loader just replaces the entry.
        let v = load()?;
        self.insert(key, v.clone());
        Ok(v)
    }
}
