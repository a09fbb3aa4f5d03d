//! Worker pool and scan driver.
//!
//! The driver copies the input into the staging tree, seeds the queue with
//! the root task and spawns the workers. Each worker loops: pull a task,
//! classify, hash, scan, emit the result, acknowledge. Extracted children
//! are enqueued from inside the carving engine, which is how recursion
//! happens; the driver simply waits for the queue to drain.

use crate::core::config::ScanConfig;
use crate::core::error::{Error, Result};
use crate::core::types::{labels, FileResult, Task};
use crate::scan::classify::{classify, Classification};
use crate::scan::dispatch::CarveEngine;
use crate::scan::queue::JoinableQueue;
use crate::scan::window::{WindowScanner, DEFAULT_CHUNK_SIZE};
use crate::signatures::SignatureRegistry;
use crate::utils::hash::hash_file;
use crate::utils::logging::ScanLog;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

/// The staging tree for one run: retained afterwards, it is the deliverable.
#[derive(Debug, Clone)]
pub struct StagingDirs {
    pub root: PathBuf,
    pub unpack: PathBuf,
    pub results: PathBuf,
    pub logs: PathBuf,
}

impl StagingDirs {
    /// Create `bang-scan-<random>/{unpack,results,logs}` under `base`.
    pub fn create(base: &Path) -> Result<Self> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let root = base.join(format!("bang-scan-{}", suffix.to_lowercase()));
        let staging = Self {
            unpack: root.join("unpack"),
            results: root.join("results"),
            logs: root.join("logs"),
            root,
        };
        for dir in [&staging.root, &staging.unpack, &staging.results, &staging.logs] {
            std::fs::create_dir(dir).map_err(|e| Error::DirectoryAccess {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(staging)
    }
}

/// Everything a worker thread needs, shared behind `Arc`s.
struct WorkerContext {
    registry: Arc<SignatureRegistry>,
    queue: Arc<JoinableQueue<Task>>,
    log: Arc<ScanLog>,
    staging_root: PathBuf,
    temp_dir: PathBuf,
    chunk_size: usize,
}

/// One full scan run over one input file.
pub struct ScanJob {
    registry: Arc<SignatureRegistry>,
    staging: StagingDirs,
    temp_dir: PathBuf,
    threads: usize,
    chunk_size: usize,
    log: Arc<ScanLog>,
}

impl ScanJob {
    pub fn new(config: &ScanConfig, staging: StagingDirs) -> Result<Self> {
        Self::with_registry(config, staging, SignatureRegistry::new())
    }

    /// Build a job over a specific signature registry.
    pub fn with_registry(
        config: &ScanConfig,
        staging: StagingDirs,
        registry: SignatureRegistry,
    ) -> Result<Self> {
        let log = Arc::new(ScanLog::open(&staging.logs.join("unpack.log"))?);
        Ok(Self {
            registry: Arc::new(registry),
            temp_dir: config.temp_dir(),
            threads: config.threads.max(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            staging,
            log,
        })
    }

    /// Override the sliding-window chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn staging(&self) -> &StagingDirs {
        &self.staging
    }

    /// Copy the input into the staging tree, scan it and everything
    /// extracted from it, and return the collected manifest.
    pub fn run(&self, input: &Path) -> Result<Vec<FileResult>> {
        let file_name = input
            .file_name()
            .ok_or_else(|| Error::PathNotFound(input.to_path_buf()))?;
        let staged_input = self.staging.unpack.join(file_name);
        std::fs::copy(input, &staged_input).map_err(|e| Error::file_read(input, e))?;

        let queue = Arc::new(JoinableQueue::new());
        queue.put(Task::root(&staged_input));

        let (result_tx, result_rx) = mpsc::channel::<FileResult>();
        let mut handles = Vec::with_capacity(self.threads);
        for _ in 0..self.threads {
            let context = WorkerContext {
                registry: Arc::clone(&self.registry),
                queue: Arc::clone(&queue),
                log: Arc::clone(&self.log),
                staging_root: self.staging.root.clone(),
                temp_dir: self.temp_dir.clone(),
                chunk_size: self.chunk_size,
            };
            let tx = result_tx.clone();
            handles.push(std::thread::spawn(move || worker_loop(context, tx)));
        }
        drop(result_tx);

        // every put acknowledged means the recursion is exhausted
        queue.join();
        queue.shutdown();
        for handle in handles {
            let _ = handle.join();
        }

        let results: Vec<FileResult> = result_rx.into_iter().collect();
        self.write_manifest(&results)?;
        Ok(results)
    }

    fn write_manifest(&self, results: &[FileResult]) -> Result<()> {
        let path = self.staging.results.join("scan.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json).map_err(|e| Error::file_write(&path, e))
    }
}

fn worker_loop(context: WorkerContext, results: mpsc::Sender<FileResult>) {
    while let Some(task) = context.queue.get() {
        if let Some(result) = process_task(&context, &task) {
            emit(&result);
            let _ = results.send(result);
        }
        context.queue.task_done();
    }
}

/// Serialize one result as a single JSON line on stdout the moment it
/// completes.
fn emit(result: &FileResult) {
    match serde_json::to_string(result) {
        Ok(line) => println!("{line}"),
        Err(e) => log::warn!("could not serialize result for {:?}: {}", result.fullfilename, e),
    }
}

/// The per-task flow: classify, hash, scan, report.
fn process_task(context: &WorkerContext, task: &Task) -> Option<FileResult> {
    let path = &task.path;
    let filesize = match classify(path) {
        Ok(Classification::Skip) => return None,
        Ok(Classification::Special(label)) => {
            let mut result = FileResult::minimal(path, &context.staging_root, task.labels.clone());
            result.labels.insert(label.to_string());
            return Some(result);
        }
        Ok(Classification::Empty) => {
            let mut result = FileResult::minimal(path, &context.staging_root, task.labels.clone());
            result.labels.insert(labels::EMPTY.to_string());
            result.filesize = Some(0);
            return Some(result);
        }
        Ok(Classification::Scan(size)) => size,
        Err(e) => {
            log::warn!("cannot stat {}: {}", path.display(), e);
            return Some(FileResult::minimal(
                path,
                &context.staging_root,
                task.labels.clone(),
            ));
        }
    };

    let mut result = FileResult::minimal(path, &context.staging_root, task.labels.clone());
    result.filesize = Some(filesize);

    let hashes = match hash_file(path) {
        Ok(hashes) => hashes,
        Err(e) => {
            // surfaced as a minimal result; the worker continues
            log::warn!("hashing failed for {}: {}", path.display(), e);
            return Some(result);
        }
    };
    result.md5 = Some(hashes.md5);
    result.sha1 = Some(hashes.sha1);
    result.sha256 = Some(hashes.sha256);

    let mut engine = CarveEngine::new(
        &context.registry,
        &context.queue,
        &context.log,
        &context.staging_root,
        &context.temp_dir,
        path,
        filesize,
    );
    let scanner = WindowScanner::new(&context.registry, context.chunk_size);
    match scanner.scan(path, filesize, &mut engine) {
        Ok(is_text) => {
            let verdict = if is_text { labels::TEXT } else { labels::BINARY };
            result.labels.insert(verdict.to_string());
        }
        Err(e) => {
            log::warn!("scan failed for {}: {}", path.display(), e);
        }
    }
    result.labels.extend(engine.parent_labels.iter().cloned());
    result.unpackedfiles = engine.reports;
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_layout() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingDirs::create(dir.path()).unwrap();
        assert!(staging.root.is_dir());
        assert!(staging.unpack.is_dir());
        assert!(staging.results.is_dir());
        assert!(staging.logs.is_dir());
        let name = staging.root.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("bang-scan-"));
        assert!(name.len() > "bang-scan-".len());
    }

    #[test]
    fn test_two_runs_get_distinct_staging_roots() {
        let dir = tempfile::tempdir().unwrap();
        let first = StagingDirs::create(dir.path()).unwrap();
        let second = StagingDirs::create(dir.path()).unwrap();
        assert_ne!(first.root, second.root);
    }
}
