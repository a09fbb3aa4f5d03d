//! The recursive scan-and-carve engine.

pub mod classify;
pub mod dispatch;
pub mod queue;
pub mod window;
pub mod worker;

pub use dispatch::{Candidate, CarveEngine};
pub use queue::JoinableQueue;
pub use window::{WindowScanner, DEFAULT_CHUNK_SIZE};
pub use worker::{ScanJob, StagingDirs};
