//! Shared fake implementations of the capability traits for unit tests.
//!
//! `FakeGpu` and `FakeQueue` record every call and can be scripted to
//! fail at specific points, which lets the state-machine tests exercise
//! each error path without a real graphics stack.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer::{BufferHandle, ImageBuffer, PixelFormat};
use crate::gpu::{
    ContextHandle, DisplayHandle, FenceHandle, GpuError, GpuPlatform, ImageAttributes,
    ImageHandle, TextureName, TextureTarget,
};
use crate::matrix::Mat4;
use crate::queue::{BufferItem, BufferQueue, ConsumerListener, QueueError};
use crate::transform::Crop;

/// Entry-by-entry matrix comparison with the tolerance the transform
/// pipeline is specified against.
pub(crate) fn assert_mat_eq(a: &Mat4, b: &Mat4) {
    const EPSILON: f32 = 1e-5;
    for i in 0..16 {
        assert!(
            (a[i] - b[i]).abs() < EPSILON,
            "matrices differ at index {}: {} vs {}\n  a = {:?}\n  b = {:?}",
            i,
            a[i],
            b[i],
            a,
            b
        );
    }
}

#[derive(Debug)]
struct TestBuffer {
    width: u32,
    height: u32,
}

impl BufferHandle for TestBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        PixelFormat::Nv21
    }
}

pub(crate) fn test_buffer(width: u32, height: u32) -> ImageBuffer {
    ImageBuffer::new(Arc::new(TestBuffer { width, height }))
}

struct FakeGpuState {
    current_display: DisplayHandle,
    current_context: ContextHandle,
    next_image: u64,
    next_fence: u64,
    created_images: Vec<ImageHandle>,
    destroyed_images: Vec<ImageHandle>,
    bound: Vec<(TextureTarget, TextureName)>,
    attached: Vec<ImageHandle>,
    created_fences: Vec<FenceHandle>,
    pending_errors: VecDeque<GpuError>,
    attach_errors: VecDeque<GpuError>,
    last_image_attributes: Option<ImageAttributes>,
    fail_create_image: bool,
    fail_create_fence: bool,
    fail_destroy_image: bool,
    flush_count: usize,
}

pub(crate) struct FakeGpu {
    state: Mutex<FakeGpuState>,
}

impl FakeGpu {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeGpuState {
                current_display: DisplayHandle::new(1),
                current_context: ContextHandle::new(1),
                next_image: 1,
                next_fence: 1,
                created_images: Vec::new(),
                destroyed_images: Vec::new(),
                bound: Vec::new(),
                attached: Vec::new(),
                created_fences: Vec::new(),
                pending_errors: VecDeque::new(),
                attach_errors: VecDeque::new(),
                last_image_attributes: None,
                fail_create_image: false,
                fail_create_fence: false,
                fail_destroy_image: false,
                flush_count: 0,
            }),
        })
    }

    pub fn set_current(&self, display: DisplayHandle, context: ContextHandle) {
        let mut state = self.state.lock();
        state.current_display = display;
        state.current_context = context;
    }

    /// Plants error state for the next `poll_error` drain.
    pub fn push_error(&self, error: GpuError) {
        self.state.lock().pending_errors.push_back(error);
    }

    /// Makes the next `attach_image` raise `error`.
    pub fn fail_next_attach(&self, error: GpuError) {
        self.state.lock().attach_errors.push_back(error);
    }

    pub fn fail_next_create_image(&self) {
        self.state.lock().fail_create_image = true;
    }

    pub fn fail_next_create_fence(&self) {
        self.state.lock().fail_create_fence = true;
    }

    pub fn fail_next_destroy_image(&self) {
        self.state.lock().fail_destroy_image = true;
    }

    pub fn created_images(&self) -> Vec<ImageHandle> {
        self.state.lock().created_images.clone()
    }

    pub fn destroyed(&self) -> Vec<ImageHandle> {
        self.state.lock().destroyed_images.clone()
    }

    pub fn bound(&self) -> Vec<(TextureTarget, TextureName)> {
        self.state.lock().bound.clone()
    }

    pub fn attached(&self) -> Vec<ImageHandle> {
        self.state.lock().attached.clone()
    }

    pub fn created_fences(&self) -> Vec<FenceHandle> {
        self.state.lock().created_fences.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().flush_count
    }

    pub fn last_image_attributes(&self) -> Option<ImageAttributes> {
        self.state.lock().last_image_attributes
    }
}

impl GpuPlatform for FakeGpu {
    fn current_display(&self) -> DisplayHandle {
        self.state.lock().current_display
    }

    fn current_context(&self) -> ContextHandle {
        self.state.lock().current_context
    }

    fn create_image(
        &self,
        _display: DisplayHandle,
        _buffer: &ImageBuffer,
        attrs: &ImageAttributes,
    ) -> Option<ImageHandle> {
        let mut state = self.state.lock();
        state.last_image_attributes = Some(*attrs);
        if state.fail_create_image {
            state.fail_create_image = false;
            return None;
        }
        let image = ImageHandle::new(state.next_image);
        state.next_image += 1;
        state.created_images.push(image);
        Some(image)
    }

    fn destroy_image(
        &self,
        _display: DisplayHandle,
        image: ImageHandle,
    ) -> std::result::Result<(), GpuError> {
        let mut state = self.state.lock();
        if state.fail_destroy_image {
            state.fail_destroy_image = false;
            return Err(GpuError::new(0x300b));
        }
        state.destroyed_images.push(image);
        Ok(())
    }

    fn bind_texture(&self, target: TextureTarget, name: TextureName) {
        self.state.lock().bound.push((target, name));
    }

    fn attach_image(&self, _target: TextureTarget, image: ImageHandle) {
        let mut state = self.state.lock();
        state.attached.push(image);
        while let Some(error) = state.attach_errors.pop_front() {
            state.pending_errors.push_back(error);
        }
    }

    fn poll_error(&self) -> Option<GpuError> {
        self.state.lock().pending_errors.pop_front()
    }

    fn create_fence(&self, _display: DisplayHandle) -> Option<FenceHandle> {
        let mut state = self.state.lock();
        if state.fail_create_fence {
            state.fail_create_fence = false;
            return None;
        }
        let fence = FenceHandle::new(state.next_fence);
        state.next_fence += 1;
        state.created_fences.push(fence);
        Some(fence)
    }

    fn flush(&self) {
        self.state.lock().flush_count += 1;
    }
}

/// One recorded `release_buffer` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReleasedBuffer {
    pub slot: usize,
    pub display: DisplayHandle,
    pub fence: Option<FenceHandle>,
}

#[derive(Default)]
struct FakeQueueState {
    pending: VecDeque<BufferItem>,
    releases: Vec<ReleasedBuffer>,
    released_mask: u32,
    listener: Option<Weak<dyn ConsumerListener>>,
    consumer_name: Option<String>,
    connect_count: usize,
    disconnect_count: usize,
    synchronous: bool,
    fail_acquire: Option<QueueError>,
    default_size: Option<(u32, u32)>,
    default_format: Option<PixelFormat>,
    usage_bits: Option<u64>,
    transform_hint: Option<u32>,
}

pub(crate) struct FakeQueue {
    state: Mutex<FakeQueueState>,
}

impl FakeQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeQueueState::default()),
        })
    }

    /// Queues a frame and notifies the registered consumer listener, with
    /// the queue's own lock released, exactly like a producer enqueue.
    pub fn enqueue(&self, item: BufferItem) {
        let listener = {
            let mut state = self.state.lock();
            state.pending.push_back(item);
            state.listener.clone()
        };
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.on_frame_available();
        }
    }

    /// Convenience for a plain frame in `slot` carrying `buffer`.
    pub fn enqueue_frame(&self, slot: usize, buffer: Option<ImageBuffer>) {
        self.enqueue(BufferItem {
            slot,
            buffer,
            crop: Crop::default(),
            transform: 0,
            scaling_mode: 0,
            timestamp_ns: slot as i64 * 1_000,
        });
    }

    /// Marks slots as reclaimed and fires the released callback, as the
    /// queue does after a resize or format change.
    pub fn reclaim(&self, mask: u32) {
        let listener = {
            let mut state = self.state.lock();
            state.released_mask = mask;
            state.listener.clone()
        };
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.on_buffers_released();
        }
    }

    pub fn releases(&self) -> Vec<ReleasedBuffer> {
        self.state.lock().releases.clone()
    }

    pub fn consumer_name(&self) -> Option<String> {
        self.state.lock().consumer_name.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnect_count
    }

    pub fn set_synchronous(&self, synchronous: bool) {
        self.state.lock().synchronous = synchronous;
    }

    /// Makes the next `acquire_buffer` fail with `error`.
    pub fn fail_next_acquire(&self, error: QueueError) {
        self.state.lock().fail_acquire = Some(error);
    }

    pub fn default_size(&self) -> Option<(u32, u32)> {
        self.state.lock().default_size
    }

    pub fn default_format(&self) -> Option<PixelFormat> {
        self.state.lock().default_format
    }

    pub fn usage_bits(&self) -> Option<u64> {
        self.state.lock().usage_bits
    }

    pub fn transform_hint(&self) -> Option<u32> {
        self.state.lock().transform_hint
    }
}

impl BufferQueue for FakeQueue {
    fn consumer_connect(
        &self,
        listener: Weak<dyn ConsumerListener>,
    ) -> std::result::Result<(), QueueError> {
        let mut state = self.state.lock();
        state.listener = Some(listener);
        state.connect_count += 1;
        Ok(())
    }

    fn consumer_disconnect(&self) -> std::result::Result<(), QueueError> {
        let mut state = self.state.lock();
        state.listener = None;
        state.disconnect_count += 1;
        Ok(())
    }

    fn set_consumer_name(&self, name: &str) {
        self.state.lock().consumer_name = Some(name.to_string());
    }

    fn set_default_buffer_size(
        &self,
        width: u32,
        height: u32,
    ) -> std::result::Result<(), QueueError> {
        self.state.lock().default_size = Some((width, height));
        Ok(())
    }

    fn set_default_buffer_format(
        &self,
        format: PixelFormat,
    ) -> std::result::Result<(), QueueError> {
        self.state.lock().default_format = Some(format);
        Ok(())
    }

    fn set_consumer_usage_bits(&self, bits: u64) -> std::result::Result<(), QueueError> {
        self.state.lock().usage_bits = Some(bits);
        Ok(())
    }

    fn set_transform_hint(&self, hint: u32) -> std::result::Result<(), QueueError> {
        self.state.lock().transform_hint = Some(hint);
        Ok(())
    }

    fn acquire_buffer(&self) -> std::result::Result<BufferItem, QueueError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_acquire.take() {
            return Err(error);
        }
        state.pending.pop_front().ok_or(QueueError::NoBufferReady)
    }

    fn release_buffer(
        &self,
        slot: usize,
        display: DisplayHandle,
        fence: Option<FenceHandle>,
    ) -> std::result::Result<(), QueueError> {
        self.state.lock().releases.push(ReleasedBuffer {
            slot,
            display,
            fence,
        });
        Ok(())
    }

    fn released_buffers(&self) -> u32 {
        std::mem::take(&mut self.state.lock().released_mask)
    }

    fn is_synchronous_mode(&self) -> bool {
        self.state.lock().synchronous
    }
}
