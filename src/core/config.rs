//! Scan configuration loaded from an INI file.

use crate::core::error::{Error, Result};
use configparser::ini::Ini;
use std::path::{Path, PathBuf};

/// Section holding all recognized keys.
const SECTION: &str = "configuration";

/// Runtime configuration for a scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Parent directory of the staging root. Must exist and be writable.
    pub base_unpack_directory: PathBuf,
    /// Scratch directory handed to unpackers; OS default when absent.
    pub temporary_directory: Option<PathBuf>,
    /// Number of scan workers, clamped to the CPU count.
    pub threads: usize,
}

impl ScanConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;

        let base = ini
            .get(SECTION, "baseunpackdirectory")
            .ok_or_else(|| Error::config_invalid("baseunpackdirectory", "missing"))?;
        let base_unpack_directory = PathBuf::from(base);
        validate_writable_dir(&base_unpack_directory, "baseunpackdirectory")?;

        let temporary_directory = match ini.get(SECTION, "temporarydirectory") {
            Some(tmp) => {
                let dir = PathBuf::from(tmp);
                validate_writable_dir(&dir, "temporarydirectory")?;
                Some(dir)
            }
            None => None,
        };

        let threads = match ini.get(SECTION, "threads") {
            Some(raw) => {
                let requested: i64 = raw.trim().parse().map_err(|_| {
                    Error::config_invalid("threads", format!("not an integer: {raw}"))
                })?;
                clamp_threads(requested)
            }
            None => num_cpus(),
        };

        Ok(Self {
            base_unpack_directory,
            temporary_directory,
            threads,
        })
    }

    /// Scratch directory to hand unpackers, falling back to the OS default.
    pub fn temp_dir(&self) -> PathBuf {
        self.temporary_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Clamp a requested worker count to `[1, cpus]`; zero or negative means
/// "use every CPU".
pub fn clamp_threads(requested: i64) -> usize {
    let cpus = num_cpus();
    if requested <= 0 {
        cpus
    } else {
        (requested as usize).min(cpus)
    }
}

/// Get the number of CPU cores for thread count calculation.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn validate_writable_dir(dir: &Path, key: &str) -> Result<()> {
    let meta = std::fs::metadata(dir)
        .map_err(|_| Error::config_invalid(key, format!("does not exist: {}", dir.display())))?;
    if !meta.is_dir() {
        return Err(Error::config_invalid(
            key,
            format!("not a directory: {}", dir.display()),
        ));
    }
    // Probe writability directly; permission bits lie on some filesystems.
    let probe = dir.join(format!(".bang-write-probe-{}", std::process::id()));
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => Err(Error::config_invalid(
            key,
            format!("not writable: {}", dir.display()),
        )),
    }
}
