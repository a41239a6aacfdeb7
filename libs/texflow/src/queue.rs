// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Consumer-side interface to the shared buffer queue.
//!
//! The queue itself lives outside this crate; the consumer drives it
//! through [`BufferQueue`] and receives callbacks through
//! [`ConsumerListener`]. The queue holds only a weak reference to its
//! listener, so the consumer owning itself never forms a cycle — dropping
//! the consumer (or calling `abandon`) is enough to sever the link.

use std::sync::Weak;

use thiserror::Error;

use crate::buffer::{ImageBuffer, PixelFormat};
use crate::gpu::{DisplayHandle, FenceHandle};
use crate::transform::Crop;

/// One acquired frame.
///
/// `buffer` is present only when the queue allocated a new native buffer
/// for this slot since the consumer last saw it; the consumer must then
/// discard any GPU image cached for the slot.
#[derive(Debug, Clone)]
pub struct BufferItem {
    pub slot: usize,
    pub buffer: Option<ImageBuffer>,
    pub crop: Crop,
    /// Orientation flags, see [`crate::transform::flags`].
    pub transform: u32,
    /// Producer scaling mode, passed through untouched.
    pub scaling_mode: u32,
    /// Frame timestamp in nanoseconds, passed through untouched.
    pub timestamp_ns: i64,
}

/// Errors reported by the buffer queue.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// No frame is waiting to be acquired.
    #[error("no buffer is ready for acquisition")]
    NoBufferReady,

    /// The queue has been abandoned by the producer side.
    #[error("buffer queue has been abandoned")]
    Abandoned,

    /// Any other queue failure, passed through to the caller unchanged.
    #[error("buffer queue error: {0}")]
    Other(String),
}

/// Callbacks from the queue into its consumer.
pub trait ConsumerListener: Send + Sync {
    /// A producer queued a frame.
    fn on_frame_available(&self);

    /// The queue reclaimed one or more slots (resize, format change).
    /// The listener asks the queue which ones via
    /// [`BufferQueue::released_buffers`].
    fn on_buffers_released(&self);
}

/// Callback sink the application registers to learn about new frames.
pub trait FrameAvailableListener: Send + Sync {
    fn on_frame_available(&self);
}

/// Consumer-side operations of the buffer queue.
pub trait BufferQueue: Send + Sync {
    /// Registers the consumer. The queue keeps only the weak reference.
    fn consumer_connect(
        &self,
        listener: Weak<dyn ConsumerListener>,
    ) -> std::result::Result<(), QueueError>;

    /// Unregisters the consumer and releases queue-side consumer state.
    fn consumer_disconnect(&self) -> std::result::Result<(), QueueError>;

    /// Sets the diagnostic name the queue uses in its own logging.
    fn set_consumer_name(&self, name: &str);

    fn set_default_buffer_size(&self, width: u32, height: u32)
        -> std::result::Result<(), QueueError>;

    fn set_default_buffer_format(&self, format: PixelFormat)
        -> std::result::Result<(), QueueError>;

    fn set_consumer_usage_bits(&self, bits: u64) -> std::result::Result<(), QueueError>;

    fn set_transform_hint(&self, hint: u32) -> std::result::Result<(), QueueError>;

    /// Moves the oldest ready frame from the queue to the consumer.
    fn acquire_buffer(&self) -> std::result::Result<BufferItem, QueueError>;

    /// Returns a slot to the queue. `fence`, when present, must be waited
    /// on before the producer writes into the buffer again; the queue owns
    /// the fence afterwards.
    fn release_buffer(
        &self,
        slot: usize,
        display: DisplayHandle,
        fence: Option<FenceHandle>,
    ) -> std::result::Result<(), QueueError>;

    /// Bitmask of slots the queue has reclaimed since the last call; bit
    /// `n` set means slot `n` no longer belongs to the consumer.
    fn released_buffers(&self) -> u32;

    fn is_synchronous_mode(&self) -> bool;
}
