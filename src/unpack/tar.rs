//! tar unpacker.
//!
//! A tar archive is a plain concatenation of entries, so a stream cut
//! halfway can still yield data: an entry error after at least one
//! successful extraction truncates the claimed range instead of failing the
//! candidate. The reader is wrapped in a byte counter so the consumed
//! length is known exactly even though the `tar` crate drives all reads.

use crate::core::types::{label_set, LabelSet};
use crate::unpack::{input_size, UnpackFailure, UnpackResult, Unpacked};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const BLOCK: usize = 512;

/// Read wrapper that counts bytes consumed, observable from outside the
/// borrow the archive holds.
struct CountingReader<R> {
    inner: R,
    bytes: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    fn new(inner: R) -> (Self, Arc<AtomicU64>) {
        let bytes = Arc::new(AtomicU64::new(0));
        (
            Self {
                inner,
                bytes: Arc::clone(&bytes),
            },
            bytes,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(dst)?;
        self.bytes.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

pub fn unpack(input: &Path, offset: u64, unpack_dir: &Path) -> UnpackResult {
    let filesize = input_size(input, offset)?;
    let mut file = File::open(input)
        .map_err(|e| UnpackFailure::rejected(offset, format!("cannot open input: {e}")))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| UnpackFailure::rejected(offset, e.to_string()))?;

    let (reader, counter) = CountingReader::new(file);
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(false);
    archive.set_preserve_mtime(false);

    let mut produced: Vec<(PathBuf, LabelSet)> = Vec::new();
    let mut any_unpacked = false;
    // consumed range as of the last successfully extracted entry
    let mut unpacked_size: u64 = 0;
    let mut entry_failure: Option<String> = None;

    {
        let entries = match archive.entries() {
            Ok(entries) => entries,
            Err(e) => {
                return Err(UnpackFailure::rejected(offset, format!("not a valid tar file: {e}")))
            }
        };

        for entry in entries {
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    entry_failure = Some(e.to_string());
                    break;
                }
            };
            let entry_type = entry.header().entry_type();
            // don't unpack block devices, character devices or FIFOs
            if entry_type.is_block_special()
                || entry_type.is_character_special()
                || entry_type.is_fifo()
            {
                continue;
            }

            let rel_path = match entry.path() {
                Ok(path) => path.to_path_buf(),
                Err(e) => {
                    entry_failure = Some(e.to_string());
                    break;
                }
            };
            match entry.unpack_in(unpack_dir) {
                Ok(true) => {}
                Ok(false) => continue, // path escaped the target directory
                Err(e) => {
                    entry_failure = Some(e.to_string());
                    let _ = std::fs::remove_file(unpack_dir.join(&rel_path));
                    break;
                }
            }
            any_unpacked = true;
            unpacked_size = counter.load(Ordering::Relaxed);

            let unpacked_path = unpack_dir.join(&rel_path);
            if entry_type.is_symlink() {
                produced.push((unpacked_path, label_set(["symbolic link"])));
            } else if entry_type.is_dir() {
                restore_access(&unpacked_path);
            } else {
                restore_access(&unpacked_path);
                produced.push((unpacked_path, LabelSet::new()));
            }
        }
    }

    if !any_unpacked {
        let reason = entry_failure.unwrap_or_else(|| "not a valid tar file".to_string());
        return Err(UnpackFailure::rejected(offset, reason));
    }

    let mut reader = archive.into_inner();
    if entry_failure.is_none() {
        // The iterator has read the two terminating zero blocks.
        unpacked_size = counter.load(Ordering::Relaxed);
        // GNU tar pads archives with additional all-zero blocks depending on
        // the blocking factor; fold them into the consumed range.
        if unpacked_size % BLOCK as u64 == 0 {
            let mut block = [0u8; BLOCK];
            while offset + unpacked_size + BLOCK as u64 <= filesize {
                match reader.read(&mut block) {
                    Ok(n) if n == BLOCK && block == [0u8; BLOCK] => {
                        unpacked_size += BLOCK as u64;
                    }
                    _ => break,
                }
            }
        }
    }

    let mut result = Unpacked::new(unpacked_size);
    result.files = produced;
    if offset == 0 && unpacked_size == filesize {
        result.labels = label_set(["tar", "archive"]);
    }
    Ok(result)
}

/// tar can apply restrictive modes during extraction; restore something
/// sensible so children can be scanned and cleaned up.
#[cfg(unix)]
fn restore_access(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = path.symlink_metadata() {
        if !meta.file_type().is_symlink() {
            let mut perms = meta.permissions();
            perms.set_mode(perms.mode() | 0o700);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
}

#[cfg(not(unix))]
fn restore_access(path: &Path) {
    if let Ok(meta) = path.symlink_metadata() {
        if !meta.file_type().is_symlink() {
            let mut perms = meta.permissions();
            perms.set_readonly(false);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
}
