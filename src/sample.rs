//! Application-visible sample handles and the consumer path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::clock::StreamTime;
use crate::error::{StreamError, UpdateResult};
use crate::event::CompletionEvent;
use crate::format::Rect;
use crate::stream::{SampleId, Shared, StreamCore, StreamState};
use crate::surface::Surface;

/// How a frame request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Block until the producer delivers (or the request terminates).
    Wait,
    /// Return immediately; poll with
    /// [`completion_status`](StreamSample::completion_status) or wait on
    /// the provided event.
    Async,
    /// Asynchronous, and automatically re-queued after every completed
    /// frame: live-preview consumption without further requests.
    Continuous,
}

/// Polling behavior of [`StreamSample::completion_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Report the current state without waiting.
    Poll,
    /// Withdraw a still-queued request; a producer-held sample cannot be
    /// pulled back and stays pending.
    Cancel,
    /// Wait up to the timeout for completion. Clears continuous-update.
    Wait(Duration),
}

/// Timestamps of the most recently delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTimes {
    pub start: StreamTime,
    pub end: StreamTime,
    /// Current time on the stream clock, when a clock is connected.
    pub current: Option<StreamTime>,
}

fn is_incomplete(shared: &Shared, id: SampleId) -> bool {
    shared
        .samples
        .get(&id)
        .is_some_and(|e| e.pending || e.hold_count > 0)
}

/// One reusable frame slot bound to an external surface.
///
/// Handles are cheap to clone; the sample is destroyed when the last
/// handle drops. Destruction dequeues a still-pending update and waits for
/// any producer hold to be released.
#[derive(Clone)]
pub struct StreamSample {
    inner: Arc<SampleInner>,
}

struct SampleInner {
    core: Arc<StreamCore>,
    id: SampleId,
    surface: Arc<dyn Surface>,
    region: Rect,
}

impl Drop for SampleInner {
    fn drop(&mut self) {
        self.core.destroy_sample(self.id);
    }
}

impl StreamSample {
    pub(crate) fn new(
        core: Arc<StreamCore>,
        id: SampleId,
        surface: Arc<dyn Surface>,
        region: Rect,
    ) -> Self {
        Self {
            inner: Arc::new(SampleInner {
                core,
                id,
                surface,
                region,
            }),
        }
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.inner.surface
    }

    pub fn region(&self) -> Rect {
        self.inner.region
    }

    /// Requests that the producer deliver the next frame into this sample.
    ///
    /// Fails with [`StreamError::NotRunning`] unless the stream is running
    /// and with [`StreamError::Busy`] while a previous request is still
    /// outstanding; one request per sample at a time. With no connected
    /// source, or after end-of-stream, completes immediately with
    /// [`UpdateResult::EndOfStream`] without enqueuing.
    ///
    /// `UpdateMode::Wait` blocks until the result is known; the other
    /// modes (or a provided `event`) return [`UpdateResult::Pending`] and
    /// complete through [`completion_status`](StreamSample::completion_status)
    /// or the event.
    pub fn request_update(
        &self,
        mode: UpdateMode,
        event: Option<Arc<CompletionEvent>>,
    ) -> Result<UpdateResult, StreamError> {
        let core = &self.inner.core;
        let id = self.inner.id;
        let mut shared = core.shared.lock();

        if shared.state != StreamState::Running {
            return Err(StreamError::NotRunning);
        }
        if shared.connection.is_none() || shared.eos {
            if let Some(entry) = shared.samples.get_mut(&id) {
                entry.result = UpdateResult::EndOfStream;
            }
            return Ok(UpdateResult::EndOfStream);
        }

        let completion = {
            let entry = shared
                .samples
                .get_mut(&id)
                .ok_or(StreamError::InvalidArgument("sample no longer exists"))?;
            if entry.pending || entry.hold_count > 0 {
                return Err(StreamError::Busy);
            }
            entry.continuous_update = mode == UpdateMode::Continuous;
            entry.result = UpdateResult::NoUpdate;
            entry.pending = true;
            entry.event = event.clone();
            Arc::clone(&entry.completion)
        };
        shared.queue.push_back(id);
        core.update_queued.notify_one();
        // Destruction waiters share this condvar with acquirers, so a
        // single wakeup could land on the wrong sleeper.
        core.allocator.notify_all();
        trace!(id, ?mode, "update requested");

        if mode != UpdateMode::Wait || event.is_some() {
            return Ok(UpdateResult::Pending);
        }

        while is_incomplete(&shared, id) {
            completion.wait(&mut shared);
        }
        Ok(shared
            .samples
            .get(&id)
            .map_or(UpdateResult::NoUpdate, |e| e.result))
    }

    /// Reports (and optionally waits for, or cancels) the outcome of the
    /// most recent request. Still-incomplete requests report
    /// [`UpdateResult::Pending`].
    pub fn completion_status(&self, mode: PollMode) -> UpdateResult {
        let core = &self.inner.core;
        let id = self.inner.id;
        let mut shared = core.shared.lock();

        if is_incomplete(&shared, id) {
            match mode {
                PollMode::Poll => {}
                PollMode::Cancel => {
                    if shared.samples.get(&id).is_some_and(|e| e.hold_count == 0) {
                        shared.finish_update(id);
                    }
                }
                PollMode::Wait(timeout) => {
                    let deadline = Instant::now() + timeout;
                    let completion = match shared.samples.get_mut(&id) {
                        Some(entry) => {
                            entry.continuous_update = false;
                            Arc::clone(&entry.completion)
                        }
                        None => return UpdateResult::NoUpdate,
                    };
                    while is_incomplete(&shared, id) {
                        if completion.wait_until(&mut shared, deadline).timed_out() {
                            break;
                        }
                    }
                }
            }
        }

        if is_incomplete(&shared, id) {
            UpdateResult::Pending
        } else {
            shared
                .samples
                .get(&id)
                .map_or(UpdateResult::NoUpdate, |e| e.result)
        }
    }

    /// Timestamps stamped by the most recent delivery, plus the current
    /// clock reading.
    pub fn times(&self) -> SampleTimes {
        let shared = self.inner.core.shared.lock();
        let (start, end) = shared
            .samples
            .get(&self.inner.id)
            .map_or((StreamTime::ZERO, StreamTime::ZERO), |e| {
                (e.start_time, e.end_time)
            });
        let clock = shared.connection.as_ref().map(|c| Arc::clone(&c.clock));
        drop(shared);

        SampleTimes {
            start,
            end,
            current: clock.and_then(|c| c.current_time()),
        }
    }
}
