//! Process-wide registry of open queue paths

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StorageError;

static OPEN_PATHS: LazyLock<Mutex<HashSet<PathBuf>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Ownership of one storage path
///
/// Only one guard per canonical path can exist at a time. The path is
/// released when the guard is dropped.
#[derive(Debug)]
pub struct QueueGuard {
    path: PathBuf,
}

impl QueueGuard {
    /// Claim `path`, failing if another guard already holds it
    pub fn acquire(path: &Path) -> Result<Self, StorageError> {
        let path = canonical(path)?;
        let mut open = OPEN_PATHS.lock();
        if !open.insert(path.clone()) {
            return Err(StorageError::SingleInstanceViolation(
                path.display().to_string(),
            ));
        }
        debug!(path = %path.display(), "Claimed queue path");
        Ok(Self { path })
    }

    /// The claimed canonical path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        OPEN_PATHS.lock().remove(&self.path);
        debug!(path = %self.path.display(), "Released queue path");
    }
}

// The database file may not exist yet, so only its directory is canonicalized.
fn canonical(path: &Path) -> Result<PathBuf, StorageError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .ok_or_else(|| StorageError::io(format!("not a file path: {}", path.display())))?;
    Ok(std::fs::canonicalize(parent)?.join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_claim_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("root.redb");

        let guard = QueueGuard::acquire(&path).unwrap();
        assert!(matches!(
            QueueGuard::acquire(&path),
            Err(StorageError::SingleInstanceViolation(_))
        ));

        // Same file reached through a different spelling
        let dotted = temp.path().join(".").join("root.redb");
        assert!(QueueGuard::acquire(&dotted).is_err());

        drop(guard);
        assert!(QueueGuard::acquire(&path).is_ok());
    }
}
