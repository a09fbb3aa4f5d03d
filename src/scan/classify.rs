//! Pre-scan classification: stat/type checks that short-circuit a task
//! before any hashing or signature scanning happens.

use crate::core::types::labels;
use std::path::Path;

/// What to do with a task after looking at its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Directories are skipped without a result entry.
    Skip,
    /// Special files get a minimal result with this label and no hashes.
    Special(&'static str),
    /// Zero-byte regular file: labelled `empty`, `filesize` 0, no scan.
    Empty,
    /// Regular file with content: hash and scan it.
    Scan(u64),
}

/// Classify a file by metadata only. The symlink check uses `lstat`
/// semantics so links are reported rather than followed.
pub fn classify(path: &Path) -> std::io::Result<Classification> {
    let meta = std::fs::symlink_metadata(path)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        return Ok(Classification::Special(labels::SYMBOLIC_LINK));
    }
    if file_type.is_dir() {
        return Ok(Classification::Skip);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileTypeExt;
        if file_type.is_socket() {
            return Ok(Classification::Special(labels::SOCKET));
        }
        if file_type.is_fifo() {
            return Ok(Classification::Special(labels::FIFO));
        }
        if file_type.is_block_device() {
            return Ok(Classification::Special(labels::BLOCK_DEVICE));
        }
        if file_type.is_char_device() {
            return Ok(Classification::Special(labels::CHARACTER_DEVICE));
        }
    }
    if meta.len() == 0 {
        return Ok(Classification::Empty);
    }
    Ok(Classification::Scan(meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        std::fs::write(&path, b"data").unwrap();
        assert_eq!(classify(&path).unwrap(), Classification::Scan(4));
    }

    #[test]
    fn test_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(classify(&path).unwrap(), Classification::Empty);
    }

    #[test]
    fn test_directory_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(classify(dir.path()).unwrap(), Classification::Skip);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"data").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert_eq!(
            classify(&link).unwrap(),
            Classification::Special(labels::SYMBOLIC_LINK)
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("dangling");
        std::os::unix::fs::symlink("/nonexistent/target", &link).unwrap();
        assert_eq!(
            classify(&link).unwrap(),
            Classification::Special(labels::SYMBOLIC_LINK)
        );
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(classify(Path::new("/nonexistent/file")).is_err());
    }
}
