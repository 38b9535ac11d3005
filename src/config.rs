use crate::cache::CacheSize;
use crate::error::{Error, Result};
use crate::tool::BGZIP_ENV;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub const FD_CACHE_ENV: &str = "SEQREPO_FD_CACHE_MAXSIZE";
pub const METADATA_CACHE_ENV: &str = "SEQREPO_LRU_CACHE_MAXSIZE";

/// How closed containers get compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressor {
    /// External `bgzip`; `None` searches `PATH`.
    Bgzip { exe: Option<PathBuf> },
    /// In-process BGZF encoder; no external tool needed.
    Native,
}

impl Default for Compressor {
    fn default() -> Self {
        Compressor::Bgzip { exe: None }
    }
}

/// Auto-commit once any pending count since the last commit exceeds its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitThresholds {
    pub sequences: u64,
    pub aliases: u64,
    pub residues: u64,
}

impl Default for CommitThresholds {
    fn default() -> Self {
        Self {
            sequences: 20_000,
            aliases: 60_000,
            residues: 1_000_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub writeable: bool,
    /// Upper-case sequences before hashing and storing.
    pub upcase: bool,
    /// Open container readers kept per sequence store.
    pub fd_cache: CacheSize,
    /// Sequence metadata records kept per sequence store.
    pub metadata_cache: CacheSize,
    pub compressor: Compressor,
    pub commit_thresholds: CommitThresholds,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            writeable: false,
            upcase: true,
            fd_cache: CacheSize::Disabled,
            metadata_cache: CacheSize::Bounded(
                NonZeroUsize::new(1_000_000).unwrap_or(NonZeroUsize::MIN),
            ),
            compressor: Compressor::default(),
            commit_thresholds: CommitThresholds::default(),
        }
    }
}

impl RepoConfig {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn writeable() -> Self {
        Self {
            writeable: true,
            ..Self::default()
        }
    }

    /// Defaults overridden by `SEQREPO_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|k| std::env::var(k).ok())
    }

    /// Apply overrides from any key lookup (the environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup(FD_CACHE_ENV) {
            self.fd_cache = parse_cache_size(FD_CACHE_ENV, &v)?;
        }
        if let Some(v) = lookup(METADATA_CACHE_ENV) {
            self.metadata_cache = parse_cache_size(METADATA_CACHE_ENV, &v)?;
        }
        if let Some(v) = lookup(BGZIP_ENV) {
            if let Compressor::Bgzip { exe } = &mut self.compressor {
                *exe = Some(PathBuf::from(v));
            }
        }
        Ok(self)
    }

    pub fn with_writeable(mut self, writeable: bool) -> Self {
        self.writeable = writeable;
        self
    }

    pub fn with_upcase(mut self, upcase: bool) -> Self {
        self.upcase = upcase;
        self
    }

    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_fd_cache(mut self, size: CacheSize) -> Self {
        self.fd_cache = size;
        self
    }

    pub fn with_metadata_cache(mut self, size: CacheSize) -> Self {
        self.metadata_cache = size;
        self
    }

    pub fn with_commit_thresholds(mut self, t: CommitThresholds) -> Self {
        self.commit_thresholds = t;
        self
    }
}

fn parse_cache_size(name: &str, value: &str) -> Result<CacheSize> {
    CacheSize::parse(value).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "{name} must be a valid int, none, or not set; currently it is {value}"
        ))
    })
}
