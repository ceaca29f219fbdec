//! Stream core: sample pool, update queue, and the producer path.
//!
//! All shared state lives behind one mutex per stream. Three condition
//! variables cover the suspension points: `update_queued` parks a producer
//! waiting for a pending sample, `allocator` parks both blocked acquirers
//! and a sample destruction waiting for its producer hold to drain, and
//! each sample carries its own completion condvar for targeted wakeups.
//! Every wait re-checks its predicate in a loop; broadcast and spurious
//! wakeups are expected and harmless.
//!
//! Notifications to the upstream filter and quality sink are issued only
//! after the stream lock is released, since calling out under the lock
//! would invert lock order with the filter.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::clock::{MediaClock, QualityReport, QualitySink, StreamNotify, StreamTime};
use crate::error::{DeliverError, StreamError, UpdateResult};
use crate::event::CompletionEvent;
use crate::format::{FrameData, Rect, VideoFormat};
use crate::sample::StreamSample;
use crate::surface::{Mapping, MemorySurface, Surface, SurfaceError};
use crate::StreamConfig;

/// Filter-level stream state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    #[default]
    Stopped,
    Paused,
    Running,
}

/// Collaborator handles installed when a source connects to the sink.
pub struct SourceConnection {
    pub clock: Arc<dyn MediaClock>,
    pub notify: Arc<dyn StreamNotify>,
    pub quality: Option<Arc<dyn QualitySink>>,
}

pub(crate) type SampleId = u64;

/// Per-sample state, guarded by the owning stream's mutex.
pub(crate) struct SampleEntry {
    pub(crate) surface: Arc<dyn Surface>,
    pub(crate) region: Rect,
    pub(crate) start_time: StreamTime,
    pub(crate) end_time: StreamTime,
    /// True iff the sample sits in the update queue.
    pub(crate) pending: bool,
    /// Outstanding producer holds; a held sample is never selected as a
    /// new write target and cannot be destroyed until this drains to zero.
    pub(crate) hold_count: u32,
    pub(crate) continuous_update: bool,
    pub(crate) sync_point: bool,
    pub(crate) discontinuity: bool,
    pub(crate) event: Option<Arc<CompletionEvent>>,
    pub(crate) result: UpdateResult,
    pub(crate) completion: Arc<Condvar>,
}

pub(crate) struct Shared {
    pub(crate) state: StreamState,
    pub(crate) flushing: bool,
    pub(crate) eos: bool,
    pub(crate) committed: bool,
    pub(crate) segment_start: StreamTime,
    pub(crate) format: VideoFormat,
    pub(crate) sample_refs: usize,
    pub(crate) buffer_count: usize,
    pub(crate) connection: Option<SourceConnection>,
    pub(crate) samples: HashMap<SampleId, SampleEntry>,
    pub(crate) queue: VecDeque<SampleId>,
    next_id: SampleId,
}

impl Shared {
    /// Completes a queued update: dequeues, clears `pending`, and wakes
    /// whoever is waiting on the sample. The stored result is whatever the
    /// caller put there beforehand.
    pub(crate) fn finish_update(&mut self, id: SampleId) {
        self.queue.retain(|&queued| queued != id);
        if let Some(entry) = self.samples.get_mut(&id) {
            entry.pending = false;
            entry.completion.notify_all();
            if let Some(event) = &entry.event {
                event.set();
            }
        }
    }

    /// Drains the whole update queue, completing every entry with `result`.
    pub(crate) fn cancel_queued(&mut self, result: UpdateResult) {
        while let Some(id) = self.queue.front().copied() {
            if let Some(entry) = self.samples.get_mut(&id) {
                entry.result = result;
            }
            self.finish_update(id);
        }
    }

    /// Producer target selection: the first queued sample without an
    /// outstanding hold. O(queue length), which equals the small pool size.
    pub(crate) fn next_ready(&self) -> Option<SampleId> {
        self.queue
            .iter()
            .copied()
            .find(|id| self.samples.get(id).is_some_and(|e| e.hold_count == 0))
    }

    fn apply_format(&mut self, new: VideoFormat) -> Result<(), StreamError> {
        if new.width == 0 || new.height == 0 {
            return Err(StreamError::InvalidArgument("format dimensions must be nonzero"));
        }
        if !self.format.is_compatible(&new) && self.sample_refs > 0 {
            warn!(?new, refs = self.sample_refs, "format change with outstanding samples");
            return Err(StreamError::SampleAlloc);
        }
        self.format = new;
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct Stats {
    pub(crate) delivered: AtomicU64,
    pub(crate) discarded: AtomicU64,
    pub(crate) rejected: AtomicU64,
}

/// Snapshot of delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_delivered: u64,
    /// Frames dropped because the stream was stopped.
    pub frames_discarded: u64,
    /// Frames transiently rejected during a flush.
    pub frames_rejected: u64,
}

pub(crate) struct StreamCore {
    pub(crate) shared: Mutex<Shared>,
    /// Signalled when a sample is enqueued; the producer path waits here.
    pub(crate) update_queued: Condvar,
    /// Signalled on enqueue, decommit, and every hold-count release.
    pub(crate) allocator: Condvar,
    pub(crate) stats: CachePadded<Stats>,
}

impl StreamCore {
    /// Sample destruction, run when the last external handle drops.
    ///
    /// Blocks until any producer hold is released; the hold side signals
    /// the allocator condvar on every decrement, so this cannot deadlock
    /// against a producer mid-copy.
    pub(crate) fn destroy_sample(&self, id: SampleId) {
        let mut shared = self.shared.lock();
        if shared.samples.get(&id).is_some_and(|e| e.pending) {
            shared.finish_update(id);
        }
        while shared.samples.get(&id).is_some_and(|e| e.hold_count > 0) {
            self.allocator.wait(&mut shared);
        }
        shared.samples.remove(&id);
        shared.sample_refs = shared.sample_refs.saturating_sub(1);
        debug!(id, refs = shared.sample_refs, "sample destroyed");
    }
}

/// A frame on its way into a pending sample.
enum Payload<'a> {
    /// Externally stored rows to copy in.
    Frame(&'a FrameData),
    /// A lease previously handed out by [`VideoStream::acquire`]; if its
    /// sample is still queued the pixels are already in place.
    Lease { id: SampleId, map: Mapping },
}

fn copy_sample(
    entry: &mut SampleEntry,
    payload: &Payload<'_>,
    segment_start: StreamTime,
    start: StreamTime,
    end: StreamTime,
) -> Result<(), SurfaceError> {
    let mut mapping = entry.surface.lock(&entry.region)?;
    let row_bytes = mapping.row_bytes();
    for row in 0..mapping.rows() {
        let dst = mapping.row_mut(row);
        match payload {
            Payload::Frame(frame) => {
                if row as usize >= frame.rows() {
                    break;
                }
                let offset = frame.row_offset(row as usize);
                let len = row_bytes.min(frame.stride);
                dst[..len].copy_from_slice(&frame.data[offset..offset + len]);
            }
            Payload::Lease { map, .. } => {
                if row >= map.rows() {
                    break;
                }
                let src = map.row(row);
                let len = row_bytes.min(src.len());
                dst[..len].copy_from_slice(&src[..len]);
            }
        }
    }
    entry.surface.unlock()?;

    entry.start_time = segment_start + start;
    entry.end_time = segment_start + end;
    Ok(())
}

fn try_copy(
    shared: &mut Shared,
    payload: &Payload<'_>,
    start: StreamTime,
    end: StreamTime,
) -> Option<(SampleId, Result<(), SurfaceError>)> {
    let id = shared.next_ready()?;
    let segment_start = shared.segment_start;
    let entry = shared.samples.get_mut(&id)?;
    Some((id, copy_sample(entry, payload, segment_start, start, end)))
}

/// The media-stream sink: a pool of externally supplied surfaces, an
/// update queue, and the synchronization between a push-style producer
/// and pull-style consumers.
///
/// Cloning yields another handle to the same stream.
#[derive(Clone)]
pub struct VideoStream {
    pub(crate) core: Arc<StreamCore>,
}

impl Default for VideoStream {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoStream {
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let shared = Shared {
            state: StreamState::Stopped,
            flushing: false,
            eos: false,
            committed: false,
            segment_start: StreamTime::ZERO,
            format: config.format,
            sample_refs: 0,
            buffer_count: config.buffer_count.max(1),
            connection: None,
            samples: HashMap::new(),
            queue: VecDeque::new(),
            next_id: 0,
        };
        Self {
            core: Arc::new(StreamCore {
                shared: Mutex::new(shared),
                update_queued: Condvar::new(),
                allocator: Condvar::new(),
                stats: CachePadded::new(Stats::default()),
            }),
        }
    }

    pub fn state(&self) -> StreamState {
        self.core.shared.lock().state
    }

    /// Moves the stream between filter states.
    ///
    /// Entering `Stopped` wakes a blocked producer and aborts all queued
    /// updates; their waiters complete with the cancelled result rather
    /// than staying parked. Leaving `Stopped` clears a previous
    /// end-of-stream.
    pub fn set_state(&self, state: StreamState) {
        let mut shared = self.core.shared.lock();
        debug!(from = ?shared.state, to = ?state, "stream state change");
        if state == StreamState::Stopped {
            shared.cancel_queued(UpdateResult::NoUpdate);
            self.core.update_queued.notify_all();
        }
        if shared.state == StreamState::Stopped {
            shared.eos = false;
        }
        shared.state = state;
    }

    /// Starts a flush: delivery is transiently rejected until
    /// [`end_flush`](VideoStream::end_flush), queued updates are
    /// cancelled, and a pending end-of-stream is revoked.
    pub fn begin_flush(&self) {
        let mut shared = self.core.shared.lock();
        let cancel_eos = shared.eos;
        shared.flushing = true;
        shared.eos = false;
        shared.cancel_queued(UpdateResult::NoUpdate);
        self.core.update_queued.notify_all();
        debug!(cancel_eos, "flush begin");
        let notify = shared.connection.as_ref().map(|c| Arc::clone(&c.notify));
        drop(shared);

        if let Some(notify) = notify {
            notify.flush_begin(cancel_eos);
        }
    }

    pub fn end_flush(&self) {
        let mut shared = self.core.shared.lock();
        shared.flushing = false;
        debug!("flush end");
        let notify = shared.connection.as_ref().map(|c| Arc::clone(&c.notify));
        drop(shared);

        if let Some(notify) = notify {
            notify.flush_end();
        }
    }

    /// Signals end-of-stream from the source. Every queued update, and any
    /// update requested afterwards, completes with
    /// [`UpdateResult::EndOfStream`].
    pub fn end_of_stream(&self) -> Result<(), StreamError> {
        let mut shared = self.core.shared.lock();
        if shared.eos || shared.flushing {
            return Err(StreamError::AlreadyEnded);
        }
        shared.eos = true;
        shared.cancel_queued(UpdateResult::EndOfStream);
        debug!("end of stream");
        let notify = shared.connection.as_ref().map(|c| Arc::clone(&c.notify));
        drop(shared);

        if let Some(notify) = notify {
            notify.end_of_stream();
        }
        Ok(())
    }

    pub fn set_segment_start(&self, start: StreamTime) {
        self.core.shared.lock().segment_start = start;
    }

    pub fn segment_start(&self) -> StreamTime {
        self.core.shared.lock().segment_start
    }

    pub fn format(&self) -> VideoFormat {
        self.core.shared.lock().format
    }

    /// Changes the stream format. An incompatible change while samples are
    /// outstanding fails with [`StreamError::SampleAlloc`] and leaves the
    /// prior format in place.
    pub fn set_format(&self, format: VideoFormat) -> Result<(), StreamError> {
        self.core.shared.lock().apply_format(format)
    }

    /// Installs the source's clock, notifier, and optional quality sink.
    pub fn connect(&self, connection: SourceConnection) {
        let mut shared = self.core.shared.lock();
        debug!("source connected");
        shared.connection = Some(connection);
    }

    /// Removes the source connection. Only legal on a stopped stream.
    pub fn disconnect(&self) -> Result<(), StreamError> {
        let mut shared = self.core.shared.lock();
        if shared.state != StreamState::Stopped {
            return Err(StreamError::NotStopped);
        }
        debug!("source disconnected");
        shared.connection = None;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.core.shared.lock().connection.is_some()
    }

    pub fn buffer_count(&self) -> usize {
        self.core.shared.lock().buffer_count
    }

    pub fn stats(&self) -> StreamStats {
        let stats = &self.core.stats;
        StreamStats {
            frames_delivered: stats.delivered.load(Ordering::Relaxed),
            frames_discarded: stats.discarded.load(Ordering::Relaxed),
            frames_rejected: stats.rejected.load(Ordering::Relaxed),
        }
    }

    /// Creates a sample bound to `surface`, or to a pool-allocated
    /// system-memory surface matching the current format when `surface` is
    /// omitted. A supplied surface's dimensions become the stream format,
    /// subject to the same allocation-conflict rule as
    /// [`set_format`](VideoStream::set_format).
    pub fn create_sample(
        &self,
        surface: Option<Arc<dyn Surface>>,
        region: Option<Rect>,
    ) -> Result<StreamSample, StreamError> {
        if surface.is_none() && region.is_some() {
            return Err(StreamError::InvalidArgument("region requires a surface"));
        }

        let mut shared = self.core.shared.lock();
        let (surface, region) = match surface {
            Some(surface) => {
                let desc = surface.desc();
                let region = region.unwrap_or_else(|| Rect::with_size(desc.width, desc.height));
                if region.is_empty() || region.right > desc.width || region.bottom > desc.height {
                    return Err(StreamError::InvalidArgument("region lies outside the surface"));
                }
                shared.apply_format(VideoFormat::new(region.width(), region.height(), desc.pixel))?;
                (surface, region)
            }
            None => {
                let format = shared.format;
                let surface: Arc<dyn Surface> = Arc::new(MemorySurface::new(format));
                (surface, Rect::with_size(format.width, format.height))
            }
        };

        let id = shared.next_id;
        shared.next_id += 1;
        shared.samples.insert(
            id,
            SampleEntry {
                surface: Arc::clone(&surface),
                region,
                start_time: StreamTime::ZERO,
                end_time: StreamTime::ZERO,
                pending: false,
                hold_count: 0,
                continuous_update: false,
                sync_point: true,
                discontinuity: false,
                event: None,
                result: UpdateResult::NoUpdate,
                completion: Arc::new(Condvar::new()),
            },
        );
        shared.sample_refs += 1;
        debug!(id, refs = shared.sample_refs, "sample created");
        Ok(StreamSample::new(Arc::clone(&self.core), id, surface, region))
    }

    /// Delivers one frame into exactly one pending sample, blocking until
    /// a target exists.
    ///
    /// `start` and `end` are presentation times relative to the current
    /// segment. A stopped stream discards the frame as success; a flushing
    /// stream rejects it transiently. Delivery never buffers: if no sample
    /// wants the frame, the call waits for one instead of queuing data.
    pub fn deliver(
        &self,
        frame: FrameData,
        start: StreamTime,
        end: StreamTime,
    ) -> Result<(), DeliverError> {
        trace!(
            bytes = frame.data.len(),
            stride = frame.stride,
            start = start.as_hundred_ns(),
            "deliver"
        );
        self.deliver_inner(Payload::Frame(&frame), start, end)
    }

    /// Delivers a lease obtained from [`acquire`](VideoStream::acquire)
    /// back to the stream. If the lease's sample is still queued this is a
    /// pure completion (the pixels were written in place); otherwise its
    /// contents are copied into the next pending sample like any frame.
    pub fn deliver_lease(&self, lease: &crate::allocator::BufferLease) -> Result<(), DeliverError> {
        let (start, end) = lease.times();
        trace!(id = lease.id(), "deliver lease");
        self.deliver_inner(
            Payload::Lease {
                id: lease.id(),
                map: lease.mapping(),
            },
            start,
            end,
        )
    }

    fn deliver_inner(
        &self,
        payload: Payload<'_>,
        start: StreamTime,
        end: StreamTime,
    ) -> Result<(), DeliverError> {
        let core = &self.core;
        let shared = core.shared.lock();

        if shared.state == StreamState::Stopped {
            core.stats.discarded.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if shared.flushing {
            core.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DeliverError::Flushing);
        }

        // Hold frames that run well ahead of presentation time. This is a
        // courtesy to the shared clock, not a correctness requirement, and
        // must happen with the lock released.
        let clock = shared.connection.as_ref().map(|c| Arc::clone(&c.clock));
        drop(shared);
        if let Some(clock) = &clock {
            if let Some(now) = clock.current_time() {
                if start >= now + StreamTime::MILLISECOND {
                    clock.wait_until(start);
                }
            }
        }

        let mut shared = core.shared.lock();
        loop {
            // State may have changed while waiting.
            if shared.state == StreamState::Stopped {
                core.stats.discarded.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            if shared.flushing {
                core.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(DeliverError::Flushing);
            }

            let found = match &payload {
                // The one-shot echo of a lease the consumer asked for.
                Payload::Lease { id, .. } if shared.queue.contains(id) => Some((*id, Ok(()))),
                _ => try_copy(&mut shared, &payload, start, end),
            };

            if let Some((id, copied)) = found {
                let result = match copied {
                    Ok(()) => UpdateResult::Updated,
                    Err(e) => UpdateResult::SurfaceError(e),
                };
                let mut continuous = false;
                if let Some(entry) = shared.samples.get_mut(&id) {
                    entry.result = result;
                    continuous = entry.continuous_update && copied.is_ok();
                }
                if continuous {
                    // Stays pending; tail position keeps FIFO fairness for
                    // the next cycle.
                    shared.queue.retain(|&queued| queued != id);
                    shared.queue.push_back(id);
                } else {
                    shared.finish_update(id);
                }

                let feedback = shared.connection.as_ref().and_then(|c| {
                    c.quality
                        .as_ref()
                        .map(|q| (Arc::clone(&c.clock), Arc::clone(q)))
                });
                drop(shared);

                if copied.is_ok() {
                    core.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                if let Some((clock, quality)) = feedback {
                    if let Some(now) = clock.current_time() {
                        quality.notify(QualityReport {
                            late: now - start,
                            timestamp: start,
                            proportion: 1000,
                        });
                    }
                }
                return copied.map_err(DeliverError::from);
            }

            core.update_queued.wait(&mut shared);
        }
    }
}
