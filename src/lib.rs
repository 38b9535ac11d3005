//! seqvault: a non-redundant, append-only repository of sequences and their
//! namespaced aliases.
//!
//! Sequences are stored once per content digest in block-compressed FASTA
//! containers; aliases map `namespace:alias` to a digest, keeping history
//! when an alias moves. See [`Repository`] for the entry point.

pub mod aliasdb;
pub mod block_file;
pub mod cache;
mod codec;
pub mod config;
mod db;
pub mod digest;
pub mod error;
pub mod fasta;
pub mod records;
pub mod repo;
mod schema;
pub mod seqstore;
pub mod snapshot;
pub mod tool;
pub mod translate;

pub use aliasdb::{AliasIndex, AliasIndexStats, AliasQuery};
pub use cache::CacheSize;
pub use config::{CommitThresholds, Compressor, RepoConfig};
pub use error::{Error, Result};
pub use records::{AliasRecord, SequenceRecord};
pub use repo::{parse_identifier, Repository, SequenceHandle};
pub use seqstore::{SequenceStore, SequenceStoreStats};
