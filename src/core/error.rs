//! Error types and result handling.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scan operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access directory: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Invalid configuration value: {key} - {message}")]
    ConfigInvalid { key: String, message: String },

    #[error("Failed to scan file: {path} - {reason}")]
    ScanError { path: PathBuf, reason: String },

    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl Error {
    /// Create a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a scan error.
    pub fn scan_error(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ScanError {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error for a specific key.
    pub fn config_invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a lock poisoned error.
    pub fn lock_poisoned(context: impl Into<String>) -> Self {
        Self::LockPoisoned {
            context: context.into(),
        }
    }

    /// Check if this error stems from startup validation rather than scanning.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } | Error::PathNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PathNotFound(PathBuf::from("/test/path"));
        assert_eq!(err.to_string(), "Path not found: /test/path");
    }

    #[test]
    fn test_configuration_errors() {
        assert!(Error::ConfigLoad("bad".into()).is_configuration());
        assert!(!Error::scan_error("/test", "reason").is_configuration());
    }
}
