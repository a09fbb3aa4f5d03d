//! Hash calculation utilities.

use crate::core::error::{Error, Result};
use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::Sha256;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Buffer size for reading files (10 MB).
const BUFFER_SIZE: usize = 10 * 1024 * 1024;

/// Hash results for a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    /// File size in bytes.
    pub size: u64,
}

/// Calculate MD5, SHA-1 and SHA-256 of a file in a single pass.
pub fn hash_file(path: &Path) -> Result<FileHashes> {
    let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
    let metadata = file.metadata().map_err(|e| Error::file_read(path, e))?;
    let size = metadata.len();

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut md5_hasher = Md5::new();
    let mut sha1_hasher = Sha1::new();
    let mut sha256_hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| Error::file_read(path, e))?;
        if bytes_read == 0 {
            break;
        }
        md5_hasher.update(&buffer[..bytes_read]);
        sha1_hasher.update(&buffer[..bytes_read]);
        sha256_hasher.update(&buffer[..bytes_read]);
    }

    Ok(FileHashes {
        md5: hex::encode(md5_hasher.finalize()),
        sha1: hex::encode(sha1_hasher.finalize()),
        sha256: hex::encode(sha256_hasher.finalize()),
        size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_hash_known_vectors() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();

        let hashes = hash_file(file.path()).unwrap();
        assert_eq!(hashes.md5, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(hashes.sha1, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_eq!(
            hashes.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(hashes.size, 5);
    }

    #[test]
    fn test_hash_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let hashes = hash_file(file.path()).unwrap();
        assert_eq!(hashes.size, 0);
        assert_eq!(hashes.md5, "d41d8cd98f00b204e9800998ecf8427e");
    }
}
