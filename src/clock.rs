//! Media clock domain and black-box collaborator contracts.

use std::ops::{Add, Sub};

/// A point on the stream's shared media clock, in 100 ns units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamTime(pub i64);

impl StreamTime {
    pub const ZERO: StreamTime = StreamTime(0);
    pub const MILLISECOND: StreamTime = StreamTime(10_000);

    pub const fn from_millis(ms: i64) -> Self {
        StreamTime(ms * 10_000)
    }

    pub const fn as_hundred_ns(self) -> i64 {
        self.0
    }
}

impl Add for StreamTime {
    type Output = StreamTime;

    fn add(self, rhs: StreamTime) -> StreamTime {
        StreamTime(self.0 + rhs.0)
    }
}

impl Sub for StreamTime {
    type Output = StreamTime;

    fn sub(self, rhs: StreamTime) -> StreamTime {
        StreamTime(self.0 - rhs.0)
    }
}

/// Shared presentation clock, typically owned by the filter the stream
/// is joined to.
pub trait MediaClock: Send + Sync {
    /// Current stream time, or `None` if the clock is not running.
    fn current_time(&self) -> Option<StreamTime>;

    /// Cooperative wait until `deadline`. Implementations return early
    /// when the stream leaves the running state.
    fn wait_until(&self, deadline: StreamTime);
}

/// Upstream notification sink. All methods are invoked with the stream's
/// lock released, so implementations may take their own locks freely.
pub trait StreamNotify: Send + Sync {
    fn end_of_stream(&self);
    fn flush_begin(&self, cancel_eos: bool);
    fn flush_end(&self);
}

/// Timing-delta feedback describing how late delivered frames run
/// relative to the presentation clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityReport {
    /// How far behind the clock the frame arrived. Negative means early.
    pub late: StreamTime,
    /// Presentation time of the frame the report describes.
    pub timestamp: StreamTime,
    /// Requested data rate in permille of nominal.
    pub proportion: i32,
}

/// Receiver for quality-of-service feedback, usually the upstream source.
pub trait QualitySink: Send + Sync {
    fn notify(&self, report: QualityReport);
}

#[cfg(test)]
mod tests {
    use super::StreamTime;

    #[test]
    fn stream_time_arithmetic() {
        let t = StreamTime::from_millis(3) - StreamTime::MILLISECOND;
        assert_eq!(t, StreamTime::from_millis(2));
        assert_eq!((t + StreamTime(1)).as_hundred_ns(), 20_001);
    }
}
