use crate::error::{Error, Result};
use crate::schema::{KEY_SCHEMA_VERSION, META};
use fs2::FileExt;
use redb::{
    Database, ReadOnlyDatabase, ReadTransaction, ReadableDatabase, ReadableTable, WriteTransaction,
};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// An index file, either owned by the single writer or opened read-only.
/// Read-only opens share the file with any number of other readers, in this
/// process or others, and work on files with no write permission.
pub enum IndexDb {
    Writer(Database),
    Reader(ReadOnlyDatabase),
}

impl IndexDb {
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(match self {
            IndexDb::Writer(db) => db.begin_read()?,
            IndexDb::Reader(db) => db.begin_read()?,
        })
    }

    pub fn begin_write(&self) -> Result<WriteTransaction> {
        match self {
            IndexDb::Writer(db) => Ok(db.begin_write()?),
            IndexDb::Reader(_) => Err(Error::ReadOnly),
        }
    }
}

/// Open one redb index file.
///
/// Writable opens create the file and, if it has no schema yet, run `create`
/// and stamp `expected` as its version. Read-only opens never create. Either
/// way the stored version must equal `expected`.
pub fn open_index(
    path: &Path,
    writeable: bool,
    what: &'static str,
    expected: u64,
    create: impl FnOnce(&WriteTransaction) -> Result<()>,
) -> Result<IndexDb> {
    let db = if writeable {
        let db = Database::create(path)?;
        init_schema(&db, what, expected, create)?;
        IndexDb::Writer(db)
    } else {
        if !path.is_file() {
            return Err(Error::NotFound(format!("{what} index {}", path.display())));
        }
        IndexDb::Reader(ReadOnlyDatabase::open(path)?)
    };

    let found = schema_version(&db)?;
    if found != Some(expected) {
        return Err(Error::SchemaMismatch {
            what,
            found,
            expected,
        });
    }
    Ok(db)
}

fn init_schema(
    db: &Database,
    what: &'static str,
    expected: u64,
    create: impl FnOnce(&WriteTransaction) -> Result<()>,
) -> Result<()> {
    let tx = db.begin_write()?;
    let existing = {
        let meta = tx.open_table(META)?;
        meta.get(KEY_SCHEMA_VERSION)?.map(|v| v.value())
    };
    match existing {
        Some(_) => tx.abort()?,
        None => {
            create(&tx)?;
            {
                let mut meta = tx.open_table(META)?;
                meta.insert(KEY_SCHEMA_VERSION, expected)?;
            }
            tx.commit()?;
            tracing::info!(what, version = expected, "initialized index schema");
        }
    }
    Ok(())
}

/// Stored schema version; None for a file that was never initialized.
pub fn schema_version(db: &IndexDb) -> Result<Option<u64>> {
    let tx = db.begin_read()?;
    let meta = match tx.open_table(META) {
        Ok(t) => t,
        Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(meta.get(KEY_SCHEMA_VERSION)?.map(|v| v.value()))
}

/// Take the single-writer lock for a repository directory. The lock lives as
/// long as the returned file.
pub fn lock_exclusive(lock_path: &Path) -> Result<File> {
    let f = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)?;

    f.try_lock_exclusive().map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("repository is locked (in use?): {}", lock_path.display()),
        ))
    })?;

    Ok(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redb::TableDefinition;

    const T: TableDefinition<&str, u64> = TableDefinition::new("t");

    fn create(tx: &WriteTransaction) -> Result<()> {
        tx.open_table(T)?;
        Ok(())
    }

    #[test]
    fn stamps_and_checks_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.redb");

        let db = open_index(&path, true, "test", 3, create).unwrap();
        assert_eq!(schema_version(&db).unwrap(), Some(3));
        drop(db);

        let db = open_index(&path, false, "test", 3, create).unwrap();
        drop(db);

        let err = open_index(&path, false, "test", 4, create).err().unwrap();
        assert!(matches!(
            err,
            Error::SchemaMismatch {
                found: Some(3),
                expected: 4,
                ..
            }
        ));
        // writable opens do not silently upgrade either
        assert!(open_index(&path, true, "test", 4, create).is_err());
    }

    #[test]
    fn read_only_open_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.redb");
        assert!(matches!(
            open_index(&path, false, "test", 1, create),
            Err(Error::NotFound(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn readers_share_a_frozen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.redb");
        drop(open_index(&path, true, "test", 1, create).unwrap());

        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&path, perms).unwrap();

        let a = open_index(&path, false, "test", 1, create).unwrap();
        let b = open_index(&path, false, "test", 1, create).unwrap();
        assert_eq!(schema_version(&a).unwrap(), Some(1));
        assert_eq!(schema_version(&b).unwrap(), Some(1));
        assert!(matches!(a.begin_write(), Err(Error::ReadOnly)));
    }

    #[test]
    fn second_writer_lock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("LOCK");
        let _held = lock_exclusive(&lock).unwrap();
        assert!(lock_exclusive(&lock).is_err());
    }
}
