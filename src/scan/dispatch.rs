//! Dispatch & carving engine: orders candidates, invokes unpackers,
//! reconciles verdicts, carves consumed ranges and feeds extracted children
//! back into the work queue.

use crate::core::error::Result;
use crate::core::types::{relative_to, LabelSet, Task, UnpackReport};
use crate::scan::queue::JoinableQueue;
use crate::signatures::SignatureRegistry;
use crate::unpack::run_unpacker;
use crate::utils::fsutil::{allocate_unpack_dir, remove_dir_forced};
use crate::utils::logging::ScanLog;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A possible format start emitted by the sliding-window scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Byte offset in the file where the format would start.
    pub offset: u64,
    /// Index into the registry's signature table.
    pub sig_index: usize,
}

/// Per-file carving state.
pub struct CarveEngine<'a> {
    registry: &'a SignatureRegistry,
    queue: &'a JoinableQueue<Task>,
    log: &'a ScanLog,
    staging_root: &'a Path,
    temp_dir: &'a Path,
    file_path: &'a Path,
    filesize: u64,
    /// End of the last carved range; candidates below this are inside
    /// already-claimed data. Monotonically non-decreasing.
    pub last_unpacked: u64,
    /// Committed extraction-directory counters, per signature key.
    counters: HashMap<&'static str, u64>,
    /// Carved `[start, end)` intervals, in carve order.
    pub unpacked_ranges: Vec<(u64, u64)>,
    /// Reports in the order extractions succeeded.
    pub reports: Vec<UnpackReport>,
    /// Labels contributed to the scanned file by whole-file extractions.
    pub parent_labels: LabelSet,
}

impl<'a> CarveEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: &'a SignatureRegistry,
        queue: &'a JoinableQueue<Task>,
        log: &'a ScanLog,
        staging_root: &'a Path,
        temp_dir: &'a Path,
        file_path: &'a Path,
        filesize: u64,
    ) -> Self {
        Self {
            registry,
            queue,
            log,
            staging_root,
            temp_dir,
            file_path,
            filesize,
            last_unpacked: 0,
            counters: HashMap::new(),
            unpacked_ranges: Vec::new(),
            reports: Vec::new(),
            parent_labels: LabelSet::new(),
        }
    }

    /// Process one batch of candidates, already deduplicated and sorted by
    /// (offset, signature key).
    pub fn process_batch(&mut self, candidates: &[Candidate]) -> Result<()> {
        for candidate in candidates {
            // inside an already-carved range
            if candidate.offset < self.last_unpacked {
                continue;
            }
            self.try_candidate(candidate)?;
        }
        Ok(())
    }

    fn try_candidate(&mut self, candidate: &Candidate) -> Result<()> {
        let signature = self.registry.get(candidate.sig_index);
        let start = self.counters.get(signature.key).copied().unwrap_or(0) + 1;
        let (unpack_dir, counter) = allocate_unpack_dir(self.file_path, signature.name, start)?;

        self.log
            .trying(self.file_path, signature.key, candidate.offset);
        let verdict = run_unpacker(
            signature.unpacker,
            self.file_path,
            candidate.offset,
            &unpack_dir,
            self.temp_dir,
        );

        let unpacked = match verdict {
            Err(failure) => {
                self.log.failure(
                    self.file_path,
                    signature.key,
                    failure.offset,
                    &failure.reason,
                );
                remove_dir_forced(&unpack_dir);
                return Ok(());
            }
            // A zero-length claim would stall the scan; reject it.
            Ok(unpacked) if unpacked.consumed == 0 => {
                self.log.failure(
                    self.file_path,
                    signature.key,
                    candidate.offset,
                    "unpacker consumed no data",
                );
                remove_dir_forced(&unpack_dir);
                return Ok(());
            }
            Ok(unpacked) => unpacked,
        };

        self.counters.insert(signature.key, counter);

        let whole_file = candidate.offset == 0 && unpacked.consumed == self.filesize;
        if whole_file {
            // The format spans the entire file: its labels describe the
            // file itself.
            self.parent_labels.extend(unpacked.labels.iter().cloned());
            if unpacked.files.is_empty() {
                remove_dir_forced(&unpack_dir);
            }
        }

        self.unpacked_ranges
            .push((candidate.offset, candidate.offset + unpacked.consumed));

        let files: Vec<PathBuf> = unpacked
            .files
            .iter()
            .map(|(path, _)| relative_to(path, &unpack_dir))
            .collect();
        let unpackdirectory = if files.is_empty() {
            None
        } else {
            Some(relative_to(&unpack_dir, self.staging_root))
        };
        self.reports.push(UnpackReport {
            offset: candidate.offset,
            signature: signature.key.to_string(),
            format: signature.name.to_string(),
            size: unpacked.consumed,
            files,
            unpackdirectory,
        });

        for (path, labels) in unpacked.files {
            self.queue.put(Task::new(path, labels));
        }

        self.log.success(
            self.file_path,
            signature.key,
            candidate.offset,
            unpacked.consumed,
        );
        self.last_unpacked = candidate.offset + unpacked.consumed;
        Ok(())
    }
}
