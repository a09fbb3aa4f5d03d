//! Core data model shared by the scan engine and the unpackers.

use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Label vocabulary produced by the engine itself. Unpackers may attach
/// additional labels verbatim.
pub mod labels {
    pub const ROOT: &str = "root";
    pub const SYMBOLIC_LINK: &str = "symbolic link";
    pub const SOCKET: &str = "socket";
    pub const FIFO: &str = "fifo";
    pub const BLOCK_DEVICE: &str = "block device";
    pub const CHARACTER_DEVICE: &str = "character device";
    pub const EMPTY: &str = "empty";
    pub const TEXT: &str = "text";
    pub const BINARY: &str = "binary";
}

/// An unordered set of short string tags attached to a file.
///
/// A `BTreeSet` keeps serialization order deterministic across runs.
pub type LabelSet = BTreeSet<String>;

/// Build a label set from string literals.
pub fn label_set<I, S>(items: I) -> LabelSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// A unit of work on the shared queue: one file that has not been scanned yet.
#[derive(Debug, Clone)]
pub struct Task {
    /// Absolute path of the file to scan.
    pub path: PathBuf,
    /// Labels inherited from the parent extraction (or `{root}` for the input).
    pub labels: LabelSet,
}

impl Task {
    pub fn new(path: impl Into<PathBuf>, labels: LabelSet) -> Self {
        Self {
            path: path.into(),
            labels,
        }
    }

    /// The initial task for the copied input file.
    pub fn root(path: impl Into<PathBuf>) -> Self {
        Self::new(path, label_set([labels::ROOT]))
    }
}

/// One successful extraction inside a scanned file.
#[derive(Debug, Clone, Serialize)]
pub struct UnpackReport {
    /// Byte position in the parent where the carved region starts.
    pub offset: u64,
    /// Raw signature key that triggered the extraction.
    pub signature: String,
    /// Display name of the recognized format.
    #[serde(rename = "type")]
    pub format: String,
    /// Number of bytes consumed from the parent.
    pub size: u64,
    /// Extracted file paths, relative to `unpackdirectory`.
    pub files: Vec<PathBuf>,
    /// Extraction directory relative to the staging root; present iff at
    /// least one child file was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unpackdirectory: Option<PathBuf>,
}

/// The per-file manifest entry emitted when a task completes.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    /// Absolute path.
    pub fullfilename: PathBuf,
    /// Path relative to the staging root.
    pub filename: PathBuf,
    /// Final label set.
    pub labels: LabelSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Successful extractions in the order they were carved.
    pub unpackedfiles: Vec<UnpackReport>,
}

impl FileResult {
    /// A result carrying only the path and labels, for files that are not
    /// hashed or scanned (special files, I/O failures).
    pub fn minimal(fullfilename: &Path, staging_root: &Path, labels: LabelSet) -> Self {
        Self {
            fullfilename: fullfilename.to_path_buf(),
            filename: relative_to(fullfilename, staging_root),
            labels,
            filesize: None,
            md5: None,
            sha1: None,
            sha256: None,
            unpackedfiles: Vec::new(),
        }
    }
}

/// Strip `root` from the front of `path`; paths outside the staging tree are
/// returned unchanged.
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
