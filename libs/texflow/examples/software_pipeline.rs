//! Software Pipeline Example
//!
//! Drives a TextureConsumer end to end without any real graphics stack:
//! an in-process queue plays producer, and a logging GPU stands in for
//! the platform bindings. Run with `RUST_LOG=trace` to watch the
//! acquire/release protocol.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};

use texflow::{
    BufferHandle, BufferItem, BufferQueue, ConsumerConfig, ConsumerListener, ContextHandle,
    Crop, DisplayHandle, FenceHandle, FrameAvailableListener, GpuError, GpuPlatform,
    ImageAttributes, ImageBuffer, ImageHandle, PixelFormat, QueueError, TextureConsumer,
    TextureName, TextureTarget,
};

/// A plain heap allocation standing in for a shared graphics buffer.
#[derive(Debug)]
struct SoftwareBuffer {
    width: u32,
    height: u32,
}

impl BufferHandle for SoftwareBuffer {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> PixelFormat {
        PixelFormat::Rgba8
    }
}

/// Minimal single-producer queue: frames go in at the back, the consumer
/// acquires from the front, released slots are just logged.
struct SoftwareQueue {
    state: Mutex<QueueState>,
}

struct QueueState {
    pending: VecDeque<BufferItem>,
    listener: Option<Weak<dyn ConsumerListener>>,
}

impl SoftwareQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                listener: None,
            }),
        })
    }

    fn produce(&self, item: BufferItem) {
        let listener = {
            let mut state = self.state.lock().unwrap();
            state.pending.push_back(item);
            state.listener.clone()
        };
        // Notify with the queue unlocked, like a real producer handoff.
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.on_frame_available();
        }
    }
}

impl BufferQueue for SoftwareQueue {
    fn consumer_connect(
        &self,
        listener: Weak<dyn ConsumerListener>,
    ) -> Result<(), QueueError> {
        self.state.lock().unwrap().listener = Some(listener);
        Ok(())
    }

    fn consumer_disconnect(&self) -> Result<(), QueueError> {
        self.state.lock().unwrap().listener = None;
        Ok(())
    }

    fn set_consumer_name(&self, name: &str) {
        tracing::info!("queue consumer renamed to {name}");
    }

    fn set_default_buffer_size(&self, _width: u32, _height: u32) -> Result<(), QueueError> {
        Ok(())
    }

    fn set_default_buffer_format(&self, _format: PixelFormat) -> Result<(), QueueError> {
        Ok(())
    }

    fn set_consumer_usage_bits(&self, _bits: u64) -> Result<(), QueueError> {
        Ok(())
    }

    fn set_transform_hint(&self, _hint: u32) -> Result<(), QueueError> {
        Ok(())
    }

    fn acquire_buffer(&self) -> Result<BufferItem, QueueError> {
        self.state
            .lock()
            .unwrap()
            .pending
            .pop_front()
            .ok_or(QueueError::NoBufferReady)
    }

    fn release_buffer(
        &self,
        slot: usize,
        _display: DisplayHandle,
        fence: Option<FenceHandle>,
    ) -> Result<(), QueueError> {
        tracing::info!("slot {slot} released back to the queue (fence: {fence:?})");
        Ok(())
    }

    fn released_buffers(&self) -> u32 {
        0
    }

    fn is_synchronous_mode(&self) -> bool {
        true
    }
}

/// GPU platform that hands out sequential handles and logs every call.
struct LoggingGpu {
    next_handle: Mutex<u64>,
}

impl LoggingGpu {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_handle: Mutex::new(1),
        })
    }

    fn next(&self) -> u64 {
        let mut next = self.next_handle.lock().unwrap();
        let handle = *next;
        *next += 1;
        handle
    }
}

impl GpuPlatform for LoggingGpu {
    fn current_display(&self) -> DisplayHandle {
        DisplayHandle::new(1)
    }

    fn current_context(&self) -> ContextHandle {
        ContextHandle::new(1)
    }

    fn create_image(
        &self,
        _display: DisplayHandle,
        buffer: &ImageBuffer,
        attrs: &ImageAttributes,
    ) -> Option<ImageHandle> {
        let image = ImageHandle::new(self.next());
        tracing::info!(
            "created image {image:?} over {}x{} buffer (preserved: {})",
            buffer.width(),
            buffer.height(),
            attrs.preserved
        );
        Some(image)
    }

    fn destroy_image(
        &self,
        _display: DisplayHandle,
        image: ImageHandle,
    ) -> Result<(), GpuError> {
        tracing::info!("destroyed image {image:?}");
        Ok(())
    }

    fn bind_texture(&self, target: TextureTarget, name: TextureName) {
        tracing::info!("bound texture {} to {target:?}", name.raw());
    }

    fn attach_image(&self, _target: TextureTarget, image: ImageHandle) {
        tracing::info!("attached image {image:?}");
    }

    fn poll_error(&self) -> Option<GpuError> {
        None
    }

    fn create_fence(&self, _display: DisplayHandle) -> Option<FenceHandle> {
        Some(FenceHandle::new(self.next()))
    }

    fn flush(&self) {}
}

/// Forwards frame notifications to the render loop through a channel.
struct ChannelListener {
    sender: Mutex<mpsc::Sender<()>>,
}

impl FrameAvailableListener for ChannelListener {
    fn on_frame_available(&self) {
        let _ = self.sender.lock().unwrap().send(());
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let queue = SoftwareQueue::new();
    let gpu = LoggingGpu::new();
    let consumer = TextureConsumer::new(
        TextureName::new(42),
        queue.clone(),
        gpu.clone(),
        ConsumerConfig {
            use_fence_sync: true,
            name: Some("software-pipeline".into()),
            ..ConsumerConfig::default()
        },
    )
    .expect("config is valid");

    let (sender, receiver) = mpsc::channel();
    consumer.set_frame_available_listener(Some(Arc::new(ChannelListener {
        sender: Mutex::new(sender),
    })));

    // Producer: three 640x480 frames cycling through orientations.
    let producer_queue = queue.clone();
    let producer = std::thread::spawn(move || {
        for (slot, transform) in [
            (0, 0),
            (1, texflow::flags::ROTATE_90),
            (2, texflow::flags::ROTATE_180),
        ] {
            producer_queue.produce(BufferItem {
                slot,
                buffer: Some(ImageBuffer::new(Arc::new(SoftwareBuffer {
                    width: 640,
                    height: 480,
                }))),
                crop: Crop::new(0, 0, 640, 480),
                transform,
                scaling_mode: 0,
                timestamp_ns: slot as i64 * 16_666_667,
            });
        }
    });

    // Render loop: consume the three frames as they arrive.
    for _ in 0..3 {
        receiver.recv().expect("producer notifies");
        consumer.update_tex_image().expect("frame binds");
        let matrix = consumer.transform_matrix();
        println!("{}", consumer.dump());
        println!("  sampling matrix: {matrix:?}");
    }

    producer.join().expect("producer finished");
    consumer.abandon();
}
