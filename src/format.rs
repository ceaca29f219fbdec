//! Frame and surface format descriptions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel layouts accepted for sink surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb555,
    Rgb565,
    Rgb24,
    Rgb32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb555 | PixelFormat::Rgb565 => 2,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Rgb32 => 4,
        }
    }
}

/// Negotiated video format: dimensions plus pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel: PixelFormat,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.pixel.bytes_per_pixel()
    }

    pub fn frame_size(&self) -> usize {
        self.row_bytes() * self.height as usize
    }

    /// Whether surfaces of `self` can keep serving a connection negotiated
    /// for `other` without reallocation: same dimensions, same depth.
    pub fn is_compatible(&self, other: &VideoFormat) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.pixel.bytes_per_pixel() == other.pixel.bytes_per_pixel()
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        VideoFormat::new(100, 100, PixelFormat::Rgb32)
    }
}

/// Sub-rectangle of a surface, in pixels. Half-open on the right/bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle covering a full `width` x `height` surface.
    pub fn with_size(width: u32, height: u32) -> Self {
        Rect::new(0, 0, width, height)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }
}

/// Row order of an incoming frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    TopDown,
    BottomUp,
}

/// One decoded frame handed to [`VideoStream::deliver`].
///
/// The payload is immutable and reference counted, so a source can keep
/// it queued elsewhere without copying. Orientation is normalized during
/// the copy into the target surface; callers pass rows exactly as stored.
///
/// [`VideoStream::deliver`]: crate::stream::VideoStream::deliver
#[derive(Debug, Clone)]
pub struct FrameData {
    pub data: Bytes,
    /// Distance in bytes between the starts of consecutive stored rows.
    pub stride: usize,
    pub orientation: Orientation,
}

impl FrameData {
    pub fn new(data: Bytes, stride: usize, orientation: Orientation) -> Self {
        Self {
            data,
            stride,
            orientation,
        }
    }

    /// Number of complete rows in the payload.
    pub fn rows(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    /// Byte offset of row `row` in top-down presentation order.
    pub(crate) fn row_offset(&self, row: usize) -> usize {
        match self.orientation {
            Orientation::TopDown => row * self.stride,
            Orientation::BottomUp => (self.rows() - 1 - row) * self.stride,
        }
    }
}
