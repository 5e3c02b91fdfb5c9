use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

use tempfile::NamedTempFile;

use crate::error::PersistenceError;

/// Replace `path` with `bytes` via a sibling temp file and a rename, so a
/// reader sees either the old contents or the new ones.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PersistenceError::new(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PersistenceError::new(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PersistenceError::new(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PersistenceError::new(path, e.error))?;
    Ok(())
}

/// Metadata snapshot used to tell whether a file changed since it was read.
/// `write_atomic` renames a fresh file into place, so on unix the inode alone
/// changes on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    inode: u64,
}

/// `None` when the file does not exist or cannot be stat'ed.
pub fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::metadata(path).ok()?;
    #[cfg(unix)]
    let inode = std::os::unix::fs::MetadataExt::ino(&meta);
    #[cfg(not(unix))]
    let inode = 0;
    Some(FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
        inode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_missing_parent_and_replaces() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("file.txt");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");

        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");

        // Only the target remains; no temp files left behind.
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_file_stamp_changes_on_rewrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("file.txt");
        assert_eq!(file_stamp(&path), None);

        write_atomic(&path, b"same").unwrap();
        let first = file_stamp(&path).unwrap();
        assert_eq!(file_stamp(&path), Some(first));

        // Same length, written back to back.
        write_atomic(&path, b"diff").unwrap();
        assert_ne!(file_stamp(&path), Some(first));
    }
}
