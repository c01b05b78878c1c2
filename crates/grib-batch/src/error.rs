//! Error types for batch resolution, per-file handles and dataset merging.

use thiserror::Error;

use crate::dataset::Axis;
use crate::task::Task;

/// Errors surfaced to callers of the batch operations.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Malformed dates or leads, rejected before any task is scheduled.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The worker pool could not be set up, or every task failed.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// No existing file in the searched window.
    #[error("no existing file found: {0}")]
    NotFound(String),

    /// An opened dataset cannot be assigned to a hypercube.
    #[error("unsupported open result: {0}")]
    UnsupportedResult(String),

    #[error("failed to merge hypercube {key}: {source}")]
    Merge {
        key: String,
        #[source]
        source: MergeError,
    },

    #[error("inventory failed for {task}: {source}")]
    Inventory {
        task: Task,
        #[source]
        source: HandleError,
    },
}

/// Errors raised by a [`DataHandle`](crate::DataHandle) or its factory.
#[derive(Error, Debug)]
pub enum HandleError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode GRIB data: {0}")]
    Decode(String),

    #[error("failed to read index file: {0}")]
    Index(String),

    #[error("invalid search pattern: {0}")]
    InvalidSearch(String),

    /// The handle has no artifact to operate on.
    #[error("file not available: {0}")]
    NotAvailable(String),

    #[error("{0}")]
    Other(String),
}

/// Errors from the structural combine of [`GridDataset`](crate::GridDataset)s.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("nothing to combine")]
    Empty,

    #[error("incompatible datasets along {axis}: {reason}")]
    Incompatible { axis: Axis, reason: String },

    #[error("cannot compare attribute '{name}': {reason}")]
    AttrCompare { name: String, reason: String },

    #[error("variable '{name}' has {actual} values, expected {expected}")]
    Shape {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// A single task whose handle could not be constructed.
///
/// Never raised; collected into [`Batch::failures`](crate::Batch::failures).
#[derive(Error, Debug)]
#[error("task {task} failed: {cause}")]
pub struct TaskResolutionFailure {
    pub task: Task,
    #[source]
    pub cause: HandleError,
}

/// Result type for batch operations.
pub type Result<T> = std::result::Result<T, BatchError>;
