// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared native image buffers produced upstream and sampled by the GPU.

use std::fmt;
use std::sync::Arc;

/// Pixel layout of a native buffer.
///
/// The RGB layouts sample through an ordinary 2D target; the YUV layouts
/// and the vendor range require the external target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgba8,
    Rgbx8,
    Rgb565,
    /// Planar YVU 4:2:0.
    Yv12,
    /// Semi-planar YUV 4:2:2.
    Nv16,
    /// Semi-planar YVU 4:2:0.
    Nv21,
    /// Interleaved YUV 4:2:2.
    Yuy2,
    /// Vendor-defined format code.
    Oem(u32),
}

impl PixelFormat {
    /// Whether buffers of this format must be sampled through the external
    /// texture target.
    pub fn is_external(&self) -> bool {
        match self {
            PixelFormat::Yv12 | PixelFormat::Nv16 | PixelFormat::Nv21 | PixelFormat::Yuy2 => true,
            PixelFormat::Oem(code) => (0x100..=0x1ff).contains(code),
            _ => false,
        }
    }
}

/// Platform-side handle backing an [`ImageBuffer`].
///
/// Production implementations wrap a shared-memory image allocation
/// (dma-buf, gralloc handle, IOSurface); tests substitute plain structs.
pub trait BufferHandle: Send + Sync + fmt::Debug {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> PixelFormat;
}

/// Shared reference to a producer-allocated image buffer.
///
/// Wraps the platform handle in an `Arc` for cheap cloning and caches the
/// dimensions so the hot transform path never round-trips to the platform.
#[derive(Clone)]
pub struct ImageBuffer {
    handle: Arc<dyn BufferHandle>,
    width: u32,
    height: u32,
}

impl ImageBuffer {
    /// Wraps a platform handle, querying the dimensions once.
    pub fn new(handle: Arc<dyn BufferHandle>) -> Self {
        let width = handle.width();
        let height = handle.height();
        Self {
            handle,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.handle.format()
    }

    /// The underlying platform handle.
    pub fn handle(&self) -> &Arc<dyn BufferHandle> {
        &self.handle
    }

    /// Whether two references point at the same platform allocation.
    pub fn same_buffer(&self, other: &ImageBuffer) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_format_classification() {
        assert!(PixelFormat::Yv12.is_external());
        assert!(PixelFormat::Nv16.is_external());
        assert!(PixelFormat::Nv21.is_external());
        assert!(PixelFormat::Yuy2.is_external());
        assert!(PixelFormat::Oem(0x100).is_external());
        assert!(PixelFormat::Oem(0x1ff).is_external());
        assert!(!PixelFormat::Oem(0x200).is_external());
        assert!(!PixelFormat::Rgba8.is_external());
        assert!(!PixelFormat::Rgb565.is_external());
    }
}
