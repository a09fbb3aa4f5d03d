//! Sliding-window scanner.
//!
//! Reads the file in overlapping chunks, turns anchor hits into candidate
//! `(offset, signature)` pairs and hands each batch to the carving engine.
//! The overlap between consecutive chunks equals the registry's deepest
//! intra-offset plus the longest pattern, so an anchor straddling a chunk
//! boundary is always seen whole in the next chunk.

use crate::core::error::{Error, Result};
use crate::scan::dispatch::{Candidate, CarveEngine};
use crate::signatures::SignatureRegistry;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Default sliding-window chunk size (2 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

pub struct WindowScanner<'a> {
    registry: &'a SignatureRegistry,
    chunk_size: usize,
}

impl<'a> WindowScanner<'a> {
    pub fn new(registry: &'a SignatureRegistry, chunk_size: usize) -> Self {
        // the scan cannot make progress unless each chunk reaches past the
        // overlap carried into the next one
        let chunk_size = chunk_size.max(registry.overlap() + 1);
        Self {
            registry,
            chunk_size,
        }
    }

    /// Scan `path` (of known size), driving `engine` with candidate batches.
    /// Returns the text-probe verdict: true if no non-printable byte was
    /// seen in any scanned chunk.
    pub fn scan(&self, path: &Path, filesize: u64, engine: &mut CarveEngine) -> Result<bool> {
        let mut file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let mut buf = vec![0u8; self.chunk_size];
        let mut candidates: Vec<Candidate> = Vec::new();
        let overlap = self.registry.overlap() as u64;
        let mut pos = engine.last_unpacked;
        let mut is_text = true;

        while pos < filesize {
            let want = ((filesize - pos).min(self.chunk_size as u64)) as usize;
            file.seek(SeekFrom::Start(pos))
                .map_err(|e| Error::file_read(path, e))?;
            file.read_exact(&mut buf[..want])
                .map_err(|e| Error::file_read(path, e))?;
            let chunk = &buf[..want];

            // latched text probe: once binary, always binary
            if is_text {
                is_text = chunk.iter().all(|&b| is_printable(b));
            }

            candidates.clear();
            for (sig_index, position) in self.registry.find_anchors(chunk) {
                let signature = self.registry.get(sig_index);
                let anchor = pos + position as u64;
                // the purported format would start before byte 0
                if anchor < signature.intra_offset {
                    continue;
                }
                candidates.push(Candidate {
                    offset: anchor - signature.intra_offset,
                    sig_index,
                });
            }
            candidates.sort_by(|a, b| {
                a.offset.cmp(&b.offset).then_with(|| {
                    self.registry
                        .get(a.sig_index)
                        .key
                        .cmp(self.registry.get(b.sig_index).key)
                })
            });
            candidates.dedup();
            engine.process_batch(&candidates)?;

            let read_head = pos + want as u64;
            if read_head >= filesize {
                break;
            }
            pos = if engine.last_unpacked > read_head {
                // the dispatcher carved past everything read so far
                engine.last_unpacked
            } else {
                read_head - overlap
            };
        }

        Ok(is_text)
    }
}

/// Printable in the text-probe sense: ASCII graphic characters, space and
/// the usual whitespace control characters.
fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7e | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Task;
    use crate::scan::queue::JoinableQueue;
    use crate::unpack::test_fixtures::minimal_png;
    use crate::utils::logging::ScanLog;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        staging_root: PathBuf,
        file_path: PathBuf,
        temp_dir: PathBuf,
        log: ScanLog,
        queue: JoinableQueue<Task>,
        filesize: u64,
    }

    fn fixture(contents: &[u8]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let staging_root = dir.path().to_path_buf();
        let unpack = staging_root.join("unpack");
        let logs = staging_root.join("logs");
        std::fs::create_dir_all(&unpack).unwrap();
        std::fs::create_dir_all(&logs).unwrap();
        let file_path = unpack.join("input.bin");
        std::fs::write(&file_path, contents).unwrap();
        Fixture {
            staging_root,
            file_path,
            temp_dir: std::env::temp_dir(),
            log: ScanLog::open(&logs.join("unpack.log")).unwrap(),
            queue: JoinableQueue::new(),
            filesize: contents.len() as u64,
            _dir: dir,
        }
    }

    fn run_scan(
        fx: &Fixture,
        registry: &SignatureRegistry,
        chunk_size: usize,
    ) -> (Vec<(u64, u64)>, bool) {
        let mut engine = CarveEngine::new(
            registry,
            &fx.queue,
            &fx.log,
            &fx.staging_root,
            &fx.temp_dir,
            &fx.file_path,
            fx.filesize,
        );
        let scanner = WindowScanner::new(registry, chunk_size);
        let is_text = scanner.scan(&fx.file_path, fx.filesize, &mut engine).unwrap();
        (engine.unpacked_ranges.clone(), is_text)
    }

    #[test]
    fn test_text_probe_printable() {
        let fx = fixture(&b"plain printable text\nwith lines\n".repeat(8));
        let registry = SignatureRegistry::new();
        let (ranges, is_text) = run_scan(&fx, &registry, DEFAULT_CHUNK_SIZE);
        assert!(ranges.is_empty());
        assert!(is_text);
    }

    #[test]
    fn test_text_probe_latches_binary() {
        let mut data = b"printable".to_vec();
        data.push(0x00);
        data.extend_from_slice(b"more printable text afterwards");
        let fx = fixture(&data);
        let registry = SignatureRegistry::new();
        let (_, is_text) = run_scan(&fx, &registry, DEFAULT_CHUNK_SIZE);
        assert!(!is_text);
    }

    #[test]
    fn test_pattern_straddling_chunk_boundary_is_found() {
        // place a PNG so its 8-byte magic straddles the first chunk boundary
        let registry = SignatureRegistry::with_keys(&["png"]);
        let chunk_size = 64;
        let png = minimal_png();
        let mut data = vec![b'A'; chunk_size - 3];
        data.extend_from_slice(&png);
        let png_offset = (chunk_size - 3) as u64;
        let fx = fixture(&data);

        let (ranges, _) = run_scan(&fx, &registry, chunk_size);
        assert_eq!(ranges, vec![(png_offset, png_offset + png.len() as u64)]);
    }

    #[test]
    fn test_candidate_before_file_start_is_rejected() {
        // a bare ustar magic at offset 4: candidate offset would be negative
        let mut data = vec![0u8; 600];
        data[4..10].copy_from_slice(&[b'u', b's', b't', b'a', b'r', 0x00]);
        let fx = fixture(&data);
        let registry = SignatureRegistry::with_keys(&["tar_posix"]);
        let (ranges, _) = run_scan(&fx, &registry, DEFAULT_CHUNK_SIZE);
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_gzip_in_garbage_is_carved() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"buried payload").unwrap();
        let member = encoder.finish().unwrap();

        // leading bytes chosen to contain no registered anchor
        let mut data = vec![0x01u8; 16];
        data.extend_from_slice(&member);
        let fx = fixture(&data);
        let registry = SignatureRegistry::new();
        let (ranges, is_text) = run_scan(&fx, &registry, DEFAULT_CHUNK_SIZE);
        assert_eq!(ranges, vec![(16, 16 + member.len() as u64)]);
        assert!(!is_text);
    }
}
