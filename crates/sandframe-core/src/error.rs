//! Error types for sandframe-core.
//!
//! These cover failures of the sandbox machinery itself. Faults raised by the
//! executed script never surface here: they are folded into an
//! [`ExecutionResult::Error`](crate::result::ExecutionResult) at the worker
//! boundary.

use thiserror::Error;

/// Result type for sandframe-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sandframe-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IPC communication error with worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// The worker binary could not be located.
    #[error("worker binary not found: {0}")]
    WorkerNotFound(String),

    /// A dataset violated its declared shape or column types.
    #[error("invalid dataset: {0}")]
    InvalidDataset(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// A chart could not be rasterized.
    #[error("render error: {0}")]
    Render(String),
}

impl Error {
    /// Format the error with a short recovery hint where one is known.
    pub fn with_hint(&self) -> String {
        match self {
            Error::WorkerNotFound(_) => format!(
                "{}\n  hint: build it with `cargo build -p sandframe-worker` or set SANDFRAME_WORKER_PATH",
                self
            ),
            Error::InvalidDataset(_) => format!(
                "{}\n  hint: every column needs a name, a type (numeric, text, timestamp, boolean) and values of equal length",
                self
            ),
            _ => self.to_string(),
        }
    }
}
