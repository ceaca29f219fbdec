//! Producer/consumer synchronization core for a media-stream video sink.
//!
//! A streaming source pushes decoded frames into a bounded pool of
//! externally supplied surfaces while application threads request, wait
//! for, and retrieve updated frames, without extra copies and in the
//! presence of concurrent stop, flush, end-of-stream, and format changes.
//!
//! The pieces:
//!
//! - [`VideoStream`] owns the sample pool, the FIFO update queue, and the
//!   blocking producer path ([`VideoStream::deliver`]).
//! - [`StreamSample`] is the application-visible frame slot, requested and
//!   polled through [`StreamSample::request_update`] and
//!   [`StreamSample::completion_status`].
//! - [`VideoStream::acquire`] adapts the pool to a generic buffer-exchange
//!   protocol, handing out reference-counted [`BufferLease`]s.
//! - [`Surface`], [`MediaClock`], [`StreamNotify`], and [`QualitySink`]
//!   are the black-box collaborator contracts.

pub mod allocator;
pub mod clock;
pub mod error;
pub mod event;
pub mod format;
pub mod sample;
pub mod stream;
pub mod surface;

use serde::{Deserialize, Serialize};

pub use crate::allocator::{AllocatorProperties, BufferLease};
pub use crate::clock::{MediaClock, QualityReport, QualitySink, StreamNotify, StreamTime};
pub use crate::error::{AcquireError, DeliverError, StreamError, UpdateResult};
pub use crate::event::CompletionEvent;
pub use crate::format::{FrameData, Orientation, PixelFormat, Rect, VideoFormat};
pub use crate::sample::{PollMode, SampleTimes, StreamSample, UpdateMode};
pub use crate::stream::{SourceConnection, StreamState, StreamStats, VideoStream};
pub use crate::surface::{Mapping, MemorySurface, Surface, SurfaceDesc, SurfaceError};

/// Stream construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Initial negotiated format; pool-allocated surfaces match it.
    pub format: VideoFormat,
    /// Requested pool depth. A property, not a hard capacity: the pool
    /// grows with every created sample.
    pub buffer_count: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            format: VideoFormat::default(),
            buffer_count: 1,
        }
    }
}
