// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Platform-agnostic GPU capability surface.
//!
//! The consumer never talks to a concrete graphics API. Everything it
//! needs from the platform — wrapping a native buffer in a sampleable
//! image, attaching that image to a texture object, fencing reads — is
//! expressed through [`GpuPlatform`], so the state machine can run against
//! fakes in tests and against EGL/Vulkan-style bindings in production.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::buffer::ImageBuffer;

/// Raw error code drained from the platform error state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("GPU error {code:#06x}")]
pub struct GpuError {
    pub code: u32,
}

impl GpuError {
    pub fn new(code: u32) -> Self {
        Self { code }
    }
}

/// Opaque identifier of a GPU display connection. `NONE` means no display
/// has been latched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisplayHandle(u64);

impl DisplayHandle {
    pub const NONE: DisplayHandle = DisplayHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Opaque identifier of a GPU rendering context. `NONE` means no context
/// has been latched yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

impl ContextHandle {
    pub const NONE: ContextHandle = ContextHandle(0);

    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

/// Opaque handle to a GPU-sampleable image wrapping a native buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(u64);

impl ImageHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a GPU sync fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(u64);

impl FenceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// GPU texture object identifier, supplied by the caller and never owned
/// by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureName(u32);

impl TextureName {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Binding target of the texture object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureTarget {
    /// Ordinary 2D target for RGB buffers.
    Texture2d,
    /// External target for YUV and vendor formats.
    External,
}

/// Attributes passed to image creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAttributes {
    /// Keep the image contents across binds.
    pub preserved: bool,
}

/// Capability interface over the graphics platform.
///
/// Implementations are expected to be cheap to call; every method is
/// invoked with the consumer's state lock held, on the thread that owns
/// the current GPU context.
pub trait GpuPlatform: Send + Sync {
    /// The display current on the calling thread.
    fn current_display(&self) -> DisplayHandle;

    /// The context current on the calling thread.
    fn current_context(&self) -> ContextHandle;

    /// Wraps a native buffer in a sampleable image with no associated
    /// context. Returns `None` on platform failure.
    fn create_image(
        &self,
        display: DisplayHandle,
        buffer: &ImageBuffer,
        attrs: &ImageAttributes,
    ) -> Option<ImageHandle>;

    /// Destroys an image previously returned by `create_image`.
    fn destroy_image(
        &self,
        display: DisplayHandle,
        image: ImageHandle,
    ) -> std::result::Result<(), GpuError>;

    /// Binds the texture object to the target on the current context.
    fn bind_texture(&self, target: TextureTarget, name: TextureName);

    /// Attaches an image to the texture currently bound to the target.
    fn attach_image(&self, target: TextureTarget, image: ImageHandle);

    /// Pops one pending error from the platform error state, or `None`
    /// when the state is clear. Callers drain in a loop.
    fn poll_error(&self) -> Option<GpuError>;

    /// Creates a fence on `display` that signals when commands issued so
    /// far have completed. Returns `None` on platform failure.
    fn create_fence(&self, display: DisplayHandle) -> Option<FenceHandle>;

    /// Submits all pending commands on the current context.
    fn flush(&self);
}

/// Creates GPU images from native buffers and attaches them to the
/// consumer's texture object.
pub struct ImageBinder {
    gpu: Arc<dyn GpuPlatform>,
}

impl ImageBinder {
    pub fn new(gpu: Arc<dyn GpuPlatform>) -> Self {
        Self { gpu }
    }

    /// Wraps `buffer` in a preserved, context-free image.
    ///
    /// Platform failure is logged here; the caller reports it upward as an
    /// image-creation failure.
    pub fn create_image(&self, display: DisplayHandle, buffer: &ImageBuffer) -> Option<ImageHandle> {
        let attrs = ImageAttributes { preserved: true };
        let image = self.gpu.create_image(display, buffer, &attrs);
        if image.is_none() {
            tracing::error!(
                "error creating GPU image for {}x{} buffer",
                buffer.width(),
                buffer.height()
            );
        }
        image
    }

    /// Binds the texture object and attaches `image` to it.
    ///
    /// Error state left over from earlier GPU work is drained and logged
    /// as a warning before the bind; any error raised by the bind itself
    /// is a failure.
    pub fn bind(
        &self,
        target: TextureTarget,
        name: TextureName,
        image: ImageHandle,
    ) -> std::result::Result<(), GpuError> {
        while let Some(error) = self.gpu.poll_error() {
            tracing::warn!("clearing stale GPU error before bind: {error}");
        }

        self.gpu.bind_texture(target, name);
        self.gpu.attach_image(target, image);

        let mut failure = None;
        while let Some(error) = self.gpu.poll_error() {
            tracing::error!("error attaching image {:?} to texture: {error}", image);
            failure.get_or_insert(error);
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ImageBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBinder").finish()
    }
}
