use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use seqvault::aliasdb::ALIASES_DB;
use seqvault::repo::SEQUENCES_DIR;
use seqvault::seqstore::SEQUENCES_DB;
use std::fs;
use std::path::{Path, PathBuf};

fn is_name_only(s: &str) -> bool {
    !s.contains('/') && !s.contains('\\')
}

pub fn default_root_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "seqvault", "seqvault")
        .ok_or_else(|| anyhow!("Unable to determine platform data directory"))?;
    Ok(proj.data_dir().to_path_buf())
}

pub fn root_dir(root: Option<&Path>) -> Result<PathBuf> {
    match root {
        Some(r) => Ok(r.to_path_buf()),
        None => default_root_dir(),
    }
}

/// Instance directory: `<root>/<name>` for a bare name, else the path as given.
pub fn resolve_instance_dir(root: Option<&Path>, instance: &str) -> Result<PathBuf> {
    if !is_name_only(instance) {
        return Ok(PathBuf::from(instance));
    }
    Ok(root_dir(root)?.join(instance))
}

/// Names of the instances directly under `root`, sorted. Directories that
/// are empty or hold something else are left out; a missing root has none.
pub fn list_instances(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(root)
        .with_context(|| format!("Failed to read directory {}", root.display()))?;
    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Ok(InstanceState::LooksValid) = check_instance_dir(&path) {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Expected index files inside an instance directory.
pub fn expected_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(ALIASES_DB), dir.join(SEQUENCES_DIR).join(SEQUENCES_DB))
}

/// Missing or empty directories are new instances; anything else must
/// already hold both indexes.
pub fn check_instance_dir(dir: &Path) -> Result<InstanceState> {
    if !dir.exists() {
        return Ok(InstanceState::Empty);
    }
    if !dir.is_dir() {
        return Err(anyhow!("{} exists but is not a directory", dir.display()));
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    if entries.next().is_none() {
        return Ok(InstanceState::Empty);
    }

    let (aliases, sequences) = expected_paths(dir);
    if aliases.is_file() && sequences.is_file() {
        Ok(InstanceState::LooksValid)
    } else {
        Err(anyhow!(
            "{} exists but does not look like a seqvault instance (expected {} and {})",
            dir.display(),
            ALIASES_DB,
            Path::new(SEQUENCES_DIR).join(SEQUENCES_DB).display()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Directory is missing or empty.
    Empty,
    /// Directory holds both index files.
    LooksValid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_paths() {
        let root = Path::new("/data/seqvault");
        assert_eq!(
            resolve_instance_dir(Some(root), "master").unwrap(),
            root.join("master")
        );
        assert_eq!(
            resolve_instance_dir(Some(root), "/elsewhere/x").unwrap(),
            PathBuf::from("/elsewhere/x")
        );
    }

    #[test]
    fn instance_states() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_instance_dir(&dir.path().join("nope")).unwrap(), InstanceState::Empty);
        assert_eq!(check_instance_dir(dir.path()).unwrap(), InstanceState::Empty);

        fs::write(dir.path().join("stray.txt"), b"x").unwrap();
        assert!(check_instance_dir(dir.path()).is_err());

        fs::create_dir(dir.path().join(SEQUENCES_DIR)).unwrap();
        fs::write(dir.path().join(ALIASES_DB), b"").unwrap();
        fs::write(dir.path().join(SEQUENCES_DIR).join(SEQUENCES_DB), b"").unwrap();
        assert_eq!(check_instance_dir(dir.path()).unwrap(), InstanceState::LooksValid);
    }

    #[test]
    fn lists_only_valid_instances() {
        let root = tempfile::tempdir().unwrap();
        assert!(list_instances(&root.path().join("missing")).unwrap().is_empty());

        for name in ["master", "2024-01-05"] {
            let (aliases, sequences) = expected_paths(&root.path().join(name));
            fs::create_dir_all(sequences.parent().unwrap()).unwrap();
            fs::write(aliases, b"").unwrap();
            fs::write(sequences, b"").unwrap();
        }
        fs::create_dir(root.path().join("empty")).unwrap();
        fs::create_dir(root.path().join("junk")).unwrap();
        fs::write(root.path().join("junk").join("x"), b"x").unwrap();
        fs::write(root.path().join("file.txt"), b"x").unwrap();

        assert_eq!(
            list_instances(root.path()).unwrap(),
            vec!["2024-01-05".to_string(), "master".to_string()]
        );
    }
}
