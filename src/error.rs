use std::path::PathBuf;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("alias {alias} (namespace: {namespace}) is ambiguous: {n} sequences match")]
    Ambiguous {
        alias: String,
        namespace: String,
        n: usize,
    },

    #[error("cannot write -- opened read-only")]
    ReadOnly,

    #[error("upgrade required: {what} schema version is {found:?} and code expects {expected}")]
    SchemaMismatch {
        what: &'static str,
        found: Option<u64>,
        expected: u64,
    },

    #[error("already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{tool} is unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("{tool} {found} is too old; >= {required} is required")]
    ToolVersionTooOld {
        tool: String,
        found: String,
        required: String,
    },

    #[error("corrupt resource {}: {reason}", .path.display())]
    CorruptResource { path: PathBuf, reason: String },

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("invalid alias: {0}")]
    InvalidAlias(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] redb::Error),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CorruptResource {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

// redb reports failures through one error type per operation; fold them all
// into `Error::Index` so `?` works inside transactions.
macro_rules! index_error_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Error {
                fn from(e: $t) -> Self {
                    Error::Index(e.into())
                }
            }
        )*
    };
}

index_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
