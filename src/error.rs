//! Error types for `uiprobe`.
//!
//! Server-side failures never propagate to the embedding application; they
//! are logged where they happen. [`ServerError`] exists for the few APIs
//! that report failure to an in-process caller (the guarded constructor,
//! pool submission, report sinks).

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// A second live server was constructed in the same process.
    #[error("another automation server is live in this process")]
    InstanceLive,

    /// Job submitted to a worker pool that has been shut down.
    #[error("worker pool is shut down")]
    PoolClosed,

    /// A report sink failed to deliver a timing report.
    #[error("report delivery failed: {0}")]
    Report(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
