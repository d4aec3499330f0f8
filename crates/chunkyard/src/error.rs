//! Error types for partitioning, result storage and dispatch.
//!
//! This module defines the central `Error` enum shared by every stage of a
//! run. Startup validation and store errors are fatal and abort the run;
//! [`Error::UnitFailure`] describes a single chunk that failed remotely and is
//! reported without stopping the remaining work.
//!
//! ## Error Cases
//! - `InvalidArgument`: malformed partition inputs (zero chunk size, negative
//!   length) or a result that does not fit the chunk it claims to answer.
//! - `ShapeMismatch`: an existing result store disagrees with the sequence
//!   set or partition of the current run.
//! - `DispatchUnavailable`: the worker pool cannot accept or finish work.
//! - `UnitFailure`: one chunk's remote execution failed.
//! - `Cancelled`: the run was aborted by the operator between completions.
//! - `Io` / `Manifest`: the on-disk store could not be read or written.

/// Opaque error produced by a worker while assigning a chunk.
pub type BoxError = Box<dyn core::error::Error + Send + Sync>;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for a chunked assignment run.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Partition inputs or a chunk write were malformed.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The store on disk was created for a different sequence set or chunk
    /// size.
    #[error("Shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    /// The work queue refused submissions or lost every worker.
    #[error("Dispatch unavailable: {context}")]
    DispatchUnavailable { context: String },

    /// A single chunk failed on its worker. Its completion bit stays unset.
    #[error("Chunk {chunk} failed: {reason}")]
    UnitFailure { chunk: usize, reason: String },

    /// The run was interrupted before all outstanding chunks completed.
    #[error("Run cancelled")]
    Cancelled,

    /// Reading or writing the result store failed.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store manifest could not be encoded or decoded.
    #[error("Store manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(context: impl Into<String>) -> Self {
        Self::DispatchUnavailable {
            context: context.into(),
        }
    }

    /// Returns `true` for errors that end the whole run.
    ///
    /// Everything except [`Error::UnitFailure`] is fatal.
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnitFailure { .. })
    }
}
