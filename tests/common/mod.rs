//! Shared test fixtures: a settable clock, recording collaborators, and
//! frame builders.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use framesink::{
    FrameData, MediaClock, Orientation, PixelFormat, QualityReport, QualitySink, SourceConnection,
    StreamConfig, StreamNotify, StreamTime, VideoFormat, VideoStream,
};

/// Manually advanced media clock; `wait_until` returns immediately.
#[derive(Default)]
pub struct TestClock {
    now: Mutex<StreamTime>,
}

impl TestClock {
    pub fn set(&self, now: StreamTime) {
        *self.now.lock() = now;
    }
}

impl MediaClock for TestClock {
    fn current_time(&self) -> Option<StreamTime> {
        Some(*self.now.lock())
    }

    fn wait_until(&self, _deadline: StreamTime) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    EndOfStream,
    FlushBegin(bool),
    FlushEnd,
}

/// Records upstream notifications in arrival order.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Notification>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().clone()
    }
}

impl StreamNotify for Recorder {
    fn end_of_stream(&self) {
        self.events.lock().push(Notification::EndOfStream);
    }

    fn flush_begin(&self, cancel_eos: bool) {
        self.events.lock().push(Notification::FlushBegin(cancel_eos));
    }

    fn flush_end(&self) {
        self.events.lock().push(Notification::FlushEnd);
    }
}

#[derive(Default)]
pub struct QualityLog {
    reports: Mutex<Vec<QualityReport>>,
}

impl QualityLog {
    pub fn reports(&self) -> Vec<QualityReport> {
        self.reports.lock().clone()
    }
}

impl QualitySink for QualityLog {
    fn notify(&self, report: QualityReport) {
        self.reports.lock().push(report);
    }
}

pub const TEST_FORMAT: VideoFormat = VideoFormat {
    width: 4,
    height: 4,
    pixel: PixelFormat::Rgb32,
};

/// Routes crate logs to the test harness; `RUST_LOG` selects the level.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// A stream in the test format with a connected clock/notifier/quality
/// sink.
pub fn connected_stream() -> (VideoStream, Arc<TestClock>, Arc<Recorder>, Arc<QualityLog>) {
    init_tracing();
    let stream = VideoStream::with_config(StreamConfig {
        format: TEST_FORMAT,
        buffer_count: 1,
    });
    let clock = Arc::new(TestClock::default());
    let notify = Arc::new(Recorder::default());
    let quality = Arc::new(QualityLog::default());
    stream.connect(SourceConnection {
        clock: Arc::clone(&clock) as Arc<dyn MediaClock>,
        notify: Arc::clone(&notify) as Arc<dyn StreamNotify>,
        quality: Some(Arc::clone(&quality) as Arc<dyn QualitySink>),
    });
    (stream, clock, notify, quality)
}

/// Frame in the test format with every pixel byte set to `fill`.
pub fn solid_frame(fill: u8) -> FrameData {
    let stride = TEST_FORMAT.row_bytes();
    let data = vec![fill; stride * TEST_FORMAT.height as usize];
    FrameData::new(Bytes::from(data), stride, Orientation::TopDown)
}

/// Frame whose row `r` is filled with byte value `r`, in the given row
/// order.
pub fn row_numbered_frame(orientation: Orientation) -> FrameData {
    let stride = TEST_FORMAT.row_bytes();
    let height = TEST_FORMAT.height as usize;
    let mut data = vec![0u8; stride * height];
    for row in 0..height {
        let value = match orientation {
            // Stored rows run bottom-to-top, so the last stored row is
            // presentation row 0.
            Orientation::BottomUp => (height - 1 - row) as u8,
            Orientation::TopDown => row as u8,
        };
        data[row * stride..(row + 1) * stride].fill(value);
    }
    FrameData::new(Bytes::from(data), stride, orientation)
}
