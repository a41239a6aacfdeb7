// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The texture consumer state machine.
//!
//! A [`TextureConsumer`] sits between a buffer queue fed by a producer
//! (camera, decoder, software renderer) and a GPU texture object owned by
//! the caller. Each [`TextureConsumer::update_tex_image`] call acquires
//! the oldest ready frame, wraps its buffer in a GPU image (lazily, once
//! per buffer), attaches the image to the texture, hands the previous
//! frame back to the queue, and recomputes the sampling transform.
//!
//! All state lives behind a single mutex; queue callbacks and public
//! operations are totally ordered per instance. The one exception is the
//! frame-available notification, which is forwarded to the application
//! with the lock released so the listener may immediately call back into
//! `update_tex_image`.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::{ImageBuffer, PixelFormat};
use crate::config::ConsumerConfig;
use crate::error::{Result, TexflowError};
use crate::gpu::{
    ContextHandle, DisplayHandle, GpuPlatform, ImageBinder, TextureName, TextureTarget,
};
use crate::matrix::{self, Mat4};
use crate::queue::{BufferQueue, ConsumerListener, FrameAvailableListener, QueueError};
use crate::slots::{SlotTable, SLOT_COUNT};
use crate::transform::{self, Crop};

struct ConsumerState {
    /// Dropped on abandon, severing the link to the producer side.
    queue: Option<Arc<dyn BufferQueue>>,
    slots: SlotTable,
    /// Slot whose image is attached to the texture, if any.
    current_slot: Option<usize>,
    /// Buffer backing the attached image. Duplicates the slot record for
    /// fast reads, and deliberately survives slot reclamation so
    /// accessors keep reporting the last observed frame.
    current_buffer: Option<ImageBuffer>,
    current_crop: Crop,
    current_transform: u32,
    current_scaling_mode: u32,
    current_timestamp_ns: i64,
    current_matrix: Mat4,
    /// GPU display/context latched on first use; later calls must match.
    display: DisplayHandle,
    context: ContextHandle,
    abandoned: bool,
    listener: Option<Arc<dyn FrameAvailableListener>>,
    name: String,
}

impl ConsumerState {
    fn recompute_matrix(&mut self) {
        if let Some(buffer) = &self.current_buffer {
            self.current_matrix = transform::compose(
                self.current_crop,
                self.current_transform,
                buffer.width(),
                buffer.height(),
            );
        }
    }
}

/// Consumer endpoint of a graphics buffer pipeline.
///
/// Constructed around a caller-supplied texture object name; the texture
/// itself is never owned. Dropping the consumer abandons it, releasing
/// every slot resource and disconnecting from the queue.
pub struct TextureConsumer {
    texture_name: TextureName,
    texture_target: TextureTarget,
    use_fence_sync: bool,
    gpu: Arc<dyn GpuPlatform>,
    binder: ImageBinder,
    inner: Mutex<ConsumerState>,
}

impl TextureConsumer {
    /// Creates a consumer and registers it with `queue`.
    ///
    /// The queue receives only a weak reference, so the registration does
    /// not keep the consumer alive. A connect failure is logged and the
    /// consumer is still returned; the first acquire will surface the
    /// queue's error.
    pub fn new(
        texture_name: TextureName,
        queue: Arc<dyn BufferQueue>,
        gpu: Arc<dyn GpuPlatform>,
        config: ConsumerConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let name = config.resolved_name();
        tracing::debug!("[{name}] creating texture consumer for texture {}", texture_name.raw());

        let consumer = Arc::new(Self {
            texture_name,
            texture_target: config.texture_target,
            use_fence_sync: config.use_fence_sync,
            binder: ImageBinder::new(Arc::clone(&gpu)),
            gpu,
            inner: Mutex::new(ConsumerState {
                queue: Some(Arc::clone(&queue)),
                slots: SlotTable::new(),
                current_slot: None,
                current_buffer: None,
                current_crop: Crop::default(),
                current_transform: 0,
                current_scaling_mode: 0,
                current_timestamp_ns: 0,
                current_matrix: matrix::IDENTITY,
                display: DisplayHandle::NONE,
                context: ContextHandle::NONE,
                abandoned: false,
                listener: None,
                name: name.clone(),
            }),
        });

        let listener: Weak<dyn ConsumerListener> =
            Arc::downgrade(&(Arc::clone(&consumer) as Arc<dyn ConsumerListener>));
        match queue.consumer_connect(listener) {
            Err(error) => {
                tracing::error!("[{name}] error connecting to buffer queue: {error}");
            }
            Ok(()) => queue.set_consumer_name(&name),
        }
        Ok(consumer)
    }

    /// Acquires the oldest ready frame and attaches it to the texture.
    ///
    /// Must be called on the thread whose GPU context was current the
    /// first time this consumer touched the GPU. When no frame is ready
    /// the texture is still bound to its target, so downstream sampling
    /// stays valid, and the call succeeds without changing any state.
    ///
    /// On error the previous frame remains current and, apart from a
    /// newly-installed native buffer, the acquired slot is handed back to
    /// the queue.
    pub fn update_tex_image(&self) -> Result<()> {
        let mut state = self.inner.lock();
        tracing::trace!("[{}] update_tex_image", state.name);

        if state.abandoned {
            tracing::error!("[{}] update_tex_image called on an abandoned consumer", state.name);
            return Err(TexflowError::NotInitialized);
        }

        let display = self.gpu.current_display();
        let context = self.gpu.current_context();
        if !state.display.is_none() && state.display != display {
            tracing::error!("[{}] update_tex_image: invalid current display", state.name);
            return Err(TexflowError::InvalidDisplay);
        }
        if !state.context.is_none() && state.context != context {
            tracing::error!("[{}] update_tex_image: invalid current context", state.name);
            return Err(TexflowError::InvalidContext);
        }
        state.display = display;
        state.context = context;

        let queue = state.queue.clone().ok_or(TexflowError::NotInitialized)?;

        // In asynchronous mode the queue holds at most one ready frame;
        // in synchronous mode this takes the oldest.
        let item = match queue.acquire_buffer() {
            Ok(item) => item,
            Err(QueueError::NoBufferReady) => {
                // Bind the texture anyway so unconditional downstream
                // sampling keeps reading the previous frame.
                self.gpu.bind_texture(self.texture_target, self.texture_name);
                return Ok(());
            }
            Err(error) => {
                tracing::error!("[{}] update_tex_image: acquire failed: {error}", state.name);
                return Err(error.into());
            }
        };
        let slot = item.slot;

        // A buffer in the item means the queue re-allocated this slot;
        // any image derived from the old buffer is stale.
        if let Some(buffer) = &item.buffer {
            state.slots.install(slot, buffer.clone(), self.gpu.as_ref(), display);
        }

        let image = match state.slots.image(slot) {
            Some(image) => image,
            None => {
                let Some(buffer) = state.slots.buffer(slot).cloned() else {
                    tracing::error!("[{}] buffer at slot {slot} is null", state.name);
                    self.release_quietly(&state, &queue, slot, display);
                    return Err(TexflowError::EmptySlot { slot });
                };
                match self.binder.create_image(display, &buffer) {
                    Some(image) => {
                        state.slots.set_image(slot, image);
                        image
                    }
                    None => {
                        // A stale display also lands here: image creation
                        // is guaranteed to fail on it.
                        self.release_quietly(&state, &queue, slot, display);
                        return Err(TexflowError::ImageCreationFailed { slot });
                    }
                }
            }
        };

        if let Err(error) = self.binder.bind(self.texture_target, self.texture_name, image) {
            tracing::error!(
                "[{}] error binding image for slot {slot} to texture: {error}",
                state.name
            );
            self.release_quietly(&state, &queue, slot, display);
            return Err(TexflowError::BindFailed(error));
        }

        if let Some(previous) = state.current_slot {
            if self.use_fence_sync {
                let Some(fence) = self.gpu.create_fence(display) else {
                    tracing::error!("[{}] update_tex_image: error creating fence", state.name);
                    self.release_quietly(&state, &queue, slot, display);
                    return Err(TexflowError::FenceCreationFailed);
                };
                self.gpu.flush();
                state.slots.set_fence(previous, fence);
            }

            tracing::trace!(
                "[{}] update_tex_image: slot {previous} -> slot {slot}",
                state.name
            );
            // Past every failure point; hand the old frame back.
            if let Err(error) = queue.release_buffer(previous, display, state.slots.fence(previous))
            {
                tracing::warn!(
                    "[{}] error releasing slot {previous} to the queue: {error}",
                    state.name
                );
            }
        }

        state.current_slot = Some(slot);
        state.current_buffer = state.slots.buffer(slot).cloned();
        state.current_crop = item.crop;
        state.current_transform = item.transform;
        state.current_scaling_mode = item.scaling_mode;
        state.current_timestamp_ns = item.timestamp_ns;
        state.recompute_matrix();
        Ok(())
    }

    /// Returns a slot to the queue with whatever fence it already holds,
    /// logging instead of propagating release errors.
    fn release_quietly(
        &self,
        state: &ConsumerState,
        queue: &Arc<dyn BufferQueue>,
        slot: usize,
        display: DisplayHandle,
    ) {
        if let Err(error) = queue.release_buffer(slot, display, state.slots.fence(slot)) {
            tracing::warn!("[{}] error returning slot {slot} to the queue: {error}", state.name);
        }
    }

    /// Puts the consumer into its terminal state: every slot resource is
    /// released, the queue connection is dropped, and all further
    /// operations fail with `NotInitialized`. Idempotent; also runs on
    /// drop.
    pub fn abandon(&self) {
        let mut state = self.inner.lock();
        if state.abandoned {
            return;
        }
        tracing::debug!("[{}] abandoning", state.name);
        state.abandoned = true;
        state.current_buffer = None;

        let display = state.display;
        state.slots.free_all(self.gpu.as_ref(), display);

        if let Some(queue) = state.queue.take() {
            if let Err(error) = queue.consumer_disconnect() {
                tracing::warn!("[{}] error disconnecting from buffer queue: {error}", state.name);
            }
        }
    }

    /// The sampling transform for the current frame, column-major.
    ///
    /// Identity-based until the first frame is acquired. May describe a
    /// buffer whose slot has been reclaimed; the next successful
    /// [`Self::update_tex_image`] refreshes it.
    pub fn transform_matrix(&self) -> Mat4 {
        self.inner.lock().current_matrix
    }

    /// Timestamp of the current frame in nanoseconds.
    pub fn timestamp_ns(&self) -> i64 {
        self.inner.lock().current_timestamp_ns
    }

    /// The buffer backing the current frame.
    ///
    /// After the queue reclaims slots this still reports the last
    /// observed buffer until the next successful acquire.
    pub fn current_buffer(&self) -> Option<ImageBuffer> {
        self.inner.lock().current_buffer.clone()
    }

    pub fn current_crop(&self) -> Crop {
        self.inner.lock().current_crop
    }

    /// Orientation flags of the current frame, see
    /// [`crate::transform::flags`].
    pub fn current_transform(&self) -> u32 {
        self.inner.lock().current_transform
    }

    pub fn current_scaling_mode(&self) -> u32 {
        self.inner.lock().current_scaling_mode
    }

    /// Slot index of the current frame. Diagnostic; `None` before the
    /// first acquire and after slot reclamation.
    pub fn current_slot(&self) -> Option<usize> {
        self.inner.lock().current_slot
    }

    pub fn texture_target(&self) -> TextureTarget {
        self.texture_target
    }

    pub fn texture_name(&self) -> TextureName {
        self.texture_name
    }

    /// Whether the queue blocks producers until frames are consumed.
    /// `false` once abandoned.
    pub fn is_synchronous_mode(&self) -> bool {
        let state = self.inner.lock();
        state
            .queue
            .as_ref()
            .map(|queue| queue.is_synchronous_mode())
            .unwrap_or(false)
    }

    /// Registers (or clears) the application callback fired when a
    /// producer queues a frame. The callback runs with no consumer lock
    /// held and may call [`Self::update_tex_image`] directly.
    pub fn set_frame_available_listener(
        &self,
        listener: Option<Arc<dyn FrameAvailableListener>>,
    ) {
        let mut state = self.inner.lock();
        tracing::trace!("[{}] set_frame_available_listener", state.name);
        state.listener = listener;
    }

    /// Replaces the diagnostic name, forwarding it to the queue.
    pub fn set_name(&self, name: &str) {
        let mut state = self.inner.lock();
        state.name = name.to_string();
        if let Some(queue) = &state.queue {
            queue.set_consumer_name(name);
        }
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    pub fn set_default_buffer_size(&self, width: u32, height: u32) -> Result<()> {
        let state = self.inner.lock();
        let queue = state.queue.as_ref().ok_or(TexflowError::NotInitialized)?;
        queue.set_default_buffer_size(width, height).map_err(Into::into)
    }

    pub fn set_default_buffer_format(&self, format: PixelFormat) -> Result<()> {
        let state = self.inner.lock();
        let queue = state.queue.as_ref().ok_or(TexflowError::NotInitialized)?;
        queue.set_default_buffer_format(format).map_err(Into::into)
    }

    pub fn set_consumer_usage_bits(&self, bits: u64) -> Result<()> {
        let state = self.inner.lock();
        let queue = state.queue.as_ref().ok_or(TexflowError::NotInitialized)?;
        queue.set_consumer_usage_bits(bits).map_err(Into::into)
    }

    pub fn set_transform_hint(&self, hint: u32) -> Result<()> {
        let state = self.inner.lock();
        let queue = state.queue.as_ref().ok_or(TexflowError::NotInitialized)?;
        queue.set_transform_hint(hint).map_err(Into::into)
    }

    /// One-line diagnostic snapshot of the consumer state.
    pub fn dump(&self) -> String {
        let state = self.inner.lock();
        format!(
            "[{}] texture={} abandoned={} slot={:?} crop=[{},{},{},{}] transform={:#04x} timestamp={}",
            state.name,
            self.texture_name.raw(),
            state.abandoned,
            state.current_slot,
            state.current_crop.left,
            state.current_crop.top,
            state.current_crop.right,
            state.current_crop.bottom,
            state.current_transform,
            state.current_timestamp_ns,
        )
    }
}

impl ConsumerListener for TextureConsumer {
    fn on_frame_available(&self) {
        // Copy the listener out, then call with the lock released: the
        // listener is expected to call update_tex_image.
        let listener = {
            let state = self.inner.lock();
            tracing::trace!("[{}] frame available", state.name);
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener.on_frame_available();
        }
    }

    fn on_buffers_released(&self) {
        let mut state = self.inner.lock();
        if state.abandoned {
            return;
        }
        let Some(queue) = state.queue.clone() else {
            return;
        };

        let mask = queue.released_buffers();
        tracing::debug!("[{}] buffers released, mask {mask:#010x}", state.name);
        let display = state.display;
        for slot in 0..SLOT_COUNT {
            if mask & (1u32 << slot) != 0 {
                state.slots.free(slot, self.gpu.as_ref(), display);
            }
        }
        // The current frame's metadata is left in place so accessors keep
        // answering until the next acquire.
        state.current_slot = None;
    }
}

impl Drop for TextureConsumer {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl fmt::Debug for TextureConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("TextureConsumer")
            .field("name", &state.name)
            .field("texture_name", &self.texture_name)
            .field("texture_target", &self.texture_target)
            .field("use_fence_sync", &self.use_fence_sync)
            .field("abandoned", &state.abandoned)
            .field("current_slot", &state.current_slot)
            .field("current_crop", &state.current_crop)
            .field("current_transform", &state.current_transform)
            .finish()
    }
}
