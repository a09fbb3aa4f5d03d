//! Logging infrastructure: console logger and the per-run unpack log.

use crate::core::error::{Error, Result};
use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Initialize the console logging system.
pub fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });
    // try_init so tests that initialize twice don't panic
    let _ = builder.try_init();
}

/// Append-only writer for the run log (`logs/unpack.log`).
///
/// Every unpack attempt is recorded here: TRYING when a candidate is
/// dispatched, then either SUCCESS with the consumed length or FAIL with the
/// unpacker's reason. Shared between workers behind a mutex.
pub struct ScanLog {
    file: Mutex<File>,
}

impl ScanLog {
    /// Open (or create) the log file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::file_write(path, e))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn trying(&self, path: &Path, signature: &str, offset: u64) {
        self.write_line(&format!(
            "TRYING {} {} at offset: {}",
            path.display(),
            signature,
            offset
        ));
    }

    pub fn failure(&self, path: &Path, signature: &str, offset: u64, reason: &str) {
        self.write_line(&format!(
            "FAIL {} {} at offset: {}: {}",
            path.display(),
            signature,
            offset,
            reason
        ));
    }

    pub fn success(&self, path: &Path, signature: &str, offset: u64, length: u64) {
        self.write_line(&format!(
            "SUCCESS {} {} at offset: {}, length: {}",
            path.display(),
            signature,
            offset,
            length
        ));
    }

    fn write_line(&self, message: &str) {
        if let Ok(mut file) = self.file.lock() {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "{} {}", timestamp, message);
        }
    }
}
