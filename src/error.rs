//! Error taxonomy and per-update result codes.
//!
//! Policy violations surface synchronously through `Result`; cross-thread
//! completion outcomes travel through the sample's stored [`UpdateResult`]
//! instead, so a request that already returned pending still observes its
//! terminal state through `completion_status`.

use thiserror::Error;

use crate::surface::SurfaceError;

/// Synchronous failures of stream-level and sample-level operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Updates may only be requested on a running stream.
    #[error("stream is not running")]
    NotRunning,
    /// The sample already has an outstanding update or producer hold.
    #[error("sample is busy")]
    Busy,
    /// The format cannot change while samples are outstanding.
    #[error("samples are still allocated")]
    SampleAlloc,
    /// Allocator properties cannot change while committed.
    #[error("allocator is already committed")]
    AlreadyCommitted,
    /// End-of-stream was already signalled, or a flush is in progress.
    #[error("end of stream already signalled")]
    AlreadyEnded,
    /// The operation requires a stopped stream.
    #[error("stream is not stopped")]
    NotStopped,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Failures of the producer delivery path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliverError {
    /// Transient: a flush is in progress; the caller redelivers after the
    /// flush ends.
    #[error("flush in progress")]
    Flushing,
    /// The target surface failed to lock or unlock mid-copy. The sample is
    /// completed with [`UpdateResult::SurfaceError`] as well.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Failures of the allocator facade's acquire path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    #[error("allocator is not committed")]
    NotCommitted,
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Outcome of the most recently attempted or completed update on a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// A frame was copied into the sample.
    Updated,
    /// The request completed without a frame (cancelled or never served).
    NoUpdate,
    /// The stream reached end-of-stream before a frame arrived.
    EndOfStream,
    /// The request is still queued or producer-held.
    Pending,
    /// The surface failed while a frame was being copied in.
    SurfaceError(SurfaceError),
}

impl UpdateResult {
    pub fn is_pending(self) -> bool {
        matches!(self, UpdateResult::Pending)
    }
}
