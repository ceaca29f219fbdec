//! Allocator facade: the generic get/release-buffer contract used when
//! the producer obtains buffers instead of being handed frames directly.
//!
//! [`VideoStream::acquire`] adapts the sample pool to that contract: it
//! picks the same write target the direct delivery path would, locks the
//! underlying surface, and wraps it in a reference-counted
//! [`BufferLease`]. The sample stays producer-held until every clone of
//! the lease is dropped.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::clock::StreamTime;
use crate::error::{AcquireError, StreamError};
use crate::stream::{SampleId, StreamCore, VideoStream};
use crate::surface::Mapping;

/// Pool properties reported by the allocator facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorProperties {
    pub buffer_count: usize,
    /// Size in bytes of one frame in the current format.
    pub buffer_size: usize,
}

impl VideoStream {
    /// Allows [`acquire`](VideoStream::acquire) to hand out buffers.
    ///
    /// There is nothing to materialize: the pool's samples are created by
    /// [`create_sample`](VideoStream::create_sample).
    pub fn commit(&self) {
        self.core.shared.lock().committed = true;
        debug!("allocator committed");
    }

    /// Stops handing out buffers and wakes every blocked acquirer, which
    /// then fails with [`AcquireError::NotCommitted`].
    pub fn decommit(&self) {
        self.core.shared.lock().committed = false;
        self.core.allocator.notify_all();
        debug!("allocator decommitted");
    }

    pub fn is_committed(&self) -> bool {
        self.core.shared.lock().committed
    }

    /// Requests a pool depth. Informational only (the pool is a list, not
    /// an array); rejected while committed. Returns the effective
    /// properties.
    pub fn set_allocator_properties(
        &self,
        buffer_count: usize,
    ) -> Result<AllocatorProperties, StreamError> {
        let mut shared = self.core.shared.lock();
        if shared.committed {
            return Err(StreamError::AlreadyCommitted);
        }
        shared.buffer_count = buffer_count.max(1);
        Ok(AllocatorProperties {
            buffer_count: shared.buffer_count,
            buffer_size: shared.format.frame_size(),
        })
    }

    pub fn allocator_properties(&self) -> AllocatorProperties {
        let shared = self.core.shared.lock();
        AllocatorProperties {
            buffer_count: shared.buffer_count,
            buffer_size: shared.format.frame_size(),
        }
    }

    /// Blocks until the allocator is committed and a pending, unheld
    /// sample exists, then locks its surface for direct writes and hands
    /// out a lease with a producer hold of one.
    pub fn acquire(&self) -> Result<BufferLease, AcquireError> {
        let core = Arc::clone(&self.core);
        let mut shared = core.shared.lock();
        loop {
            if !shared.committed {
                return Err(AcquireError::NotCommitted);
            }
            if let Some(id) = shared.next_ready() {
                if let Some(entry) = shared.samples.get_mut(&id) {
                    // A lock failure leaves the sample pending for retry.
                    let map = entry.surface.lock(&entry.region)?;
                    entry.sync_point = true;
                    entry.discontinuity = false;
                    entry.hold_count = 1;
                    trace!(id, "buffer acquired");
                    drop(shared);
                    return Ok(BufferLease { core, id, map });
                }
            }
            core.allocator.wait(&mut shared);
        }
    }
}

/// Generic buffer handle bound to a producer-held sample.
///
/// The lease itself is the reference count: cloning increments the
/// sample's producer hold, dropping decrements it, and when the count
/// reaches zero the surface is unlocked and the sample becomes available
/// again. Timestamps written through the lease land directly on the
/// sample. Clones share the hold but not write access: the mapping is
/// only writable through the sole remaining handle.
pub struct BufferLease {
    core: Arc<StreamCore>,
    id: SampleId,
    map: Mapping,
}

impl BufferLease {
    pub(crate) fn id(&self) -> SampleId {
        self.id
    }

    pub(crate) fn mapping(&self) -> Mapping {
        self.map
    }

    /// Mapped region bytes, `pitch() * rows`, for direct pixel writes.
    ///
    /// `None` while clones of this lease exist. The sole hold is checked
    /// under the stream lock, and the exclusive borrow of this handle
    /// rules out a concurrent clone, so two handles can never alias the
    /// mapping mutably.
    pub fn bytes_mut(&mut self) -> Option<&mut [u8]> {
        let sole_hold = {
            let shared = self.core.shared.lock();
            shared
                .samples
                .get(&self.id)
                .is_some_and(|e| e.hold_count == 1)
        };
        sole_hold.then(|| self.map.as_mut_slice())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn pitch(&self) -> usize {
        self.map.pitch()
    }

    /// Stamps presentation times onto the underlying sample.
    pub fn set_times(&self, start: StreamTime, end: StreamTime) {
        let mut shared = self.core.shared.lock();
        if let Some(entry) = shared.samples.get_mut(&self.id) {
            entry.start_time = start;
            entry.end_time = end;
        }
    }

    pub fn times(&self) -> (StreamTime, StreamTime) {
        let shared = self.core.shared.lock();
        shared
            .samples
            .get(&self.id)
            .map_or((StreamTime::ZERO, StreamTime::ZERO), |e| {
                (e.start_time, e.end_time)
            })
    }

    pub fn set_sync_point(&self, sync_point: bool) {
        let mut shared = self.core.shared.lock();
        if let Some(entry) = shared.samples.get_mut(&self.id) {
            entry.sync_point = sync_point;
        }
    }

    pub fn is_sync_point(&self) -> bool {
        self.core
            .shared
            .lock()
            .samples
            .get(&self.id)
            .is_some_and(|e| e.sync_point)
    }

    pub fn set_discontinuity(&self, discontinuity: bool) {
        let mut shared = self.core.shared.lock();
        if let Some(entry) = shared.samples.get_mut(&self.id) {
            entry.discontinuity = discontinuity;
        }
    }

    pub fn is_discontinuity(&self) -> bool {
        self.core
            .shared
            .lock()
            .samples
            .get(&self.id)
            .is_some_and(|e| e.discontinuity)
    }
}

impl Clone for BufferLease {
    fn clone(&self) -> Self {
        let mut shared = self.core.shared.lock();
        if let Some(entry) = shared.samples.get_mut(&self.id) {
            entry.hold_count += 1;
        }
        Self {
            core: Arc::clone(&self.core),
            id: self.id,
            map: self.map,
        }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        let mut shared = self.core.shared.lock();
        let released = match shared.samples.get_mut(&self.id) {
            Some(entry) => {
                entry.hold_count = entry.hold_count.saturating_sub(1);
                if entry.hold_count == 0 {
                    if let Err(error) = entry.surface.unlock() {
                        warn!(id = self.id, %error, "surface unlock failed on lease release");
                    }
                    entry.completion.notify_all();
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if released {
            trace!(id = self.id, "buffer released");
            // Wakes blocked acquirers as well as a destruction waiting for
            // the hold to drain.
            self.core.allocator.notify_all();
        }
    }
}
