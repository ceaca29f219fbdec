//! Drawable surface abstraction.
//!
//! A surface is an externally owned, fixed-size writable buffer. The sink
//! only needs three things from it: a description, an exclusive lock that
//! maps a sub-rectangle for writing, and an unlock. [`MemorySurface`] is
//! the system-memory implementation used when the pool allocates surfaces
//! itself; device-backed implementations live with their owners.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::format::{PixelFormat, Rect, VideoFormat};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface is already locked")]
    AlreadyLocked,
    #[error("surface is not locked")]
    NotLocked,
    #[error("region lies outside the surface")]
    InvalidRegion,
    #[error("surface memory was lost")]
    Lost,
}

/// Static description of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub pixel: PixelFormat,
    /// Distance in bytes between the starts of consecutive rows.
    pub pitch: usize,
}

impl SurfaceDesc {
    pub fn format(&self) -> VideoFormat {
        VideoFormat::new(self.width, self.height, self.pixel)
    }
}

/// A locked surface region.
///
/// The mapping stays valid until the owning surface's `unlock` is called;
/// the surface's lock discipline (at most one holder) makes the access
/// exclusive. Row accessors keep all pointer arithmetic in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    ptr: *mut u8,
    pitch: usize,
    rows: u32,
    row_bytes: usize,
}

// The mapping is handed to whichever thread holds the surface lock.
unsafe impl Send for Mapping {}

impl Mapping {
    /// # Safety
    ///
    /// `ptr` must stay valid for `pitch * rows` bytes of reads and writes
    /// until the surface is unlocked.
    pub unsafe fn from_raw(ptr: *mut u8, pitch: usize, rows: u32, row_bytes: usize) -> Self {
        Self {
            ptr,
            pitch,
            rows,
            row_bytes,
        }
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn len(&self) -> usize {
        self.pitch * self.rows as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn row(&self, row: u32) -> &[u8] {
        debug_assert!(row < self.rows);
        unsafe { std::slice::from_raw_parts(self.ptr.add(row as usize * self.pitch), self.row_bytes) }
    }

    pub(crate) fn row_mut(&mut self, row: u32) -> &mut [u8] {
        debug_assert!(row < self.rows);
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.add(row as usize * self.pitch), self.row_bytes)
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len()) }
    }
}

/// External drawable buffer contract.
///
/// `lock` must admit at most one holder at a time per surface and map the
/// requested region for writing; `unlock` releases it. Both are called
/// with the stream lock held, so implementations must not call back into
/// the stream.
pub trait Surface: Send + Sync {
    fn desc(&self) -> SurfaceDesc;

    fn lock(&self, region: &Rect) -> Result<Mapping, SurfaceError>;

    fn unlock(&self) -> Result<(), SurfaceError>;
}

fn align(n: usize, alignment: usize) -> usize {
    (n + alignment - 1) & !(alignment - 1)
}

/// Plain system-memory surface.
pub struct MemorySurface {
    desc: SurfaceDesc,
    data: UnsafeCell<Box<[u8]>>,
    locked: AtomicBool,
}

// Access to `data` is serialized by the `locked` flag: `lock` admits one
// holder, and `read` takes the same flag for its copy.
unsafe impl Sync for MemorySurface {}

impl MemorySurface {
    pub fn new(format: VideoFormat) -> Self {
        let pitch = align(format.row_bytes(), 4);
        Self::with_pitch(format, pitch)
    }

    pub fn with_pitch(format: VideoFormat, pitch: usize) -> Self {
        let desc = SurfaceDesc {
            width: format.width,
            height: format.height,
            pixel: format.pixel,
            pitch,
        };
        let data = vec![0u8; pitch * format.height as usize].into_boxed_slice();
        Self {
            desc,
            data: UnsafeCell::new(data),
            locked: AtomicBool::new(false),
        }
    }

    fn acquire_flag(&self) -> Result<(), SurfaceError> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(SurfaceError::AlreadyLocked);
        }
        Ok(())
    }

    /// Copy of the full surface contents. Fails if the surface is locked.
    pub fn read(&self) -> Result<Vec<u8>, SurfaceError> {
        self.acquire_flag()?;
        let copy = unsafe { (*self.data.get()).to_vec() };
        self.locked.store(false, Ordering::Release);
        Ok(copy)
    }
}

impl Surface for MemorySurface {
    fn desc(&self) -> SurfaceDesc {
        self.desc
    }

    fn lock(&self, region: &Rect) -> Result<Mapping, SurfaceError> {
        if region.is_empty() || region.right > self.desc.width || region.bottom > self.desc.height {
            return Err(SurfaceError::InvalidRegion);
        }
        self.acquire_flag()?;

        let bpp = self.desc.pixel.bytes_per_pixel();
        let offset = region.top as usize * self.desc.pitch + region.left as usize * bpp;
        let ptr = unsafe { (*self.data.get()).as_mut_ptr().add(offset) };
        Ok(unsafe {
            Mapping::from_raw(
                ptr,
                self.desc.pitch,
                region.height(),
                region.width() as usize * bpp,
            )
        })
    }

    fn unlock(&self) -> Result<(), SurfaceError> {
        if self
            .locked
            .compare_exchange(true, false, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            return Err(SurfaceError::NotLocked);
        }
        Ok(())
    }
}
