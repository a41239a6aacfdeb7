// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Consumer state-machine tests, driven end to end through the fake
//! queue and fake GPU capabilities.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::PixelFormat;
use crate::config::ConsumerConfig;
use crate::consumer::TextureConsumer;
use crate::error::{ErrorKind, TexflowError};
use crate::gpu::{ContextHandle, DisplayHandle, GpuError, GpuPlatform, TextureName};
use crate::matrix;
use crate::queue::{BufferItem, FrameAvailableListener, QueueError};
use crate::testing::{test_buffer, FakeGpu, FakeQueue};
use crate::transform::{self, flags, Crop};

fn consumer(queue: &Arc<FakeQueue>, gpu: &Arc<FakeGpu>) -> Arc<TextureConsumer> {
    consumer_with(queue, gpu, ConsumerConfig::default())
}

fn consumer_with(
    queue: &Arc<FakeQueue>,
    gpu: &Arc<FakeGpu>,
    config: ConsumerConfig,
) -> Arc<TextureConsumer> {
    TextureConsumer::new(TextureName::new(7), queue.clone(), gpu.clone(), config)
        .expect("config is valid")
}

fn fenced_config() -> ConsumerConfig {
    ConsumerConfig {
        use_fence_sync: true,
        ..ConsumerConfig::default()
    }
}

#[test]
fn test_new_registers_with_queue_and_names_it() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    assert_eq!(queue.connect_count(), 1);
    let name = queue.consumer_name().expect("name pushed to queue");
    assert!(name.starts_with("unnamed-"));
    assert_eq!(consumer.name(), name);
}

#[test]
fn test_invalid_config_is_rejected_before_connecting() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let result = TextureConsumer::new(
        TextureName::new(1),
        queue.clone(),
        gpu.clone(),
        ConsumerConfig {
            use_fence_sync: true,
            allow_dequeue_current_buffer: true,
            ..ConsumerConfig::default()
        },
    );
    assert!(matches!(result, Err(TexflowError::Configuration(_))));
    assert_eq!(queue.connect_count(), 0);
}

#[test]
fn test_update_with_no_pending_frame_still_binds() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    assert!(consumer.update_tex_image().is_ok());
    // The texture is bound so unconditional downstream sampling is safe,
    // but nothing else changes.
    assert_eq!(gpu.bound().len(), 1);
    assert_eq!(consumer.current_slot(), None);
    assert_eq!(consumer.transform_matrix(), matrix::IDENTITY);
}

#[test]
fn test_update_commits_acquired_frame() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    let crop = Crop::new(0, 0, 32, 24);
    queue.enqueue(BufferItem {
        slot: 5,
        buffer: Some(test_buffer(64, 48)),
        crop,
        transform: flags::ROTATE_90,
        scaling_mode: 2,
        timestamp_ns: 123_456_789,
    });
    consumer.update_tex_image().expect("frame available");

    assert_eq!(consumer.current_slot(), Some(5));
    assert_eq!(consumer.current_crop(), crop);
    assert_eq!(consumer.current_transform(), flags::ROTATE_90);
    assert_eq!(consumer.current_scaling_mode(), 2);
    assert_eq!(consumer.timestamp_ns(), 123_456_789);
    let buffer = consumer.current_buffer().expect("buffer committed");
    assert_eq!((buffer.width(), buffer.height()), (64, 48));
    assert_eq!(
        consumer.transform_matrix(),
        transform::compose(crop, flags::ROTATE_90, 64, 48)
    );
    assert_eq!(gpu.created_images().len(), 1);
    assert_eq!(gpu.attached(), gpu.created_images());
}

#[test]
fn test_successive_frames_release_previous_slots() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    for slot in 0..3 {
        queue.enqueue_frame(slot, Some(test_buffer(16, 16)));
        consumer.update_tex_image().expect("frame available");
    }

    assert_eq!(consumer.current_slot(), Some(2));
    assert_eq!(gpu.created_images().len(), 3);

    // Slots 0 and 1 went back to the queue, in order, unfenced.
    let releases = queue.releases();
    assert_eq!(releases.len(), 2);
    assert_eq!(releases[0].slot, 0);
    assert_eq!(releases[1].slot, 1);
    assert!(releases.iter().all(|r| r.fence.is_none()));
    assert!(releases.iter().all(|r| r.display == gpu.current_display()));
}

#[test]
fn test_reclaimed_slots_are_freed_and_current_slot_reset() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    for slot in 0..3 {
        queue.enqueue(BufferItem {
            slot,
            buffer: Some(test_buffer(16, 16)),
            crop: Crop::new(1, 1, 15, 15),
            transform: flags::FLIP_HORIZONTAL,
            scaling_mode: 1,
            timestamp_ns: 42,
        });
        consumer.update_tex_image().expect("frame available");
    }

    queue.reclaim(0b111);

    assert_eq!(gpu.destroyed(), gpu.created_images());
    assert_eq!(consumer.current_slot(), None);
    // Frame metadata survives the reclaim until the next acquire.
    assert_eq!(consumer.current_crop(), Crop::new(1, 1, 15, 15));
    assert_eq!(consumer.current_transform(), flags::FLIP_HORIZONTAL);
    assert!(consumer.current_buffer().is_some());
}

#[test]
fn test_abandon_is_idempotent_and_terminal() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    queue.enqueue_frame(0, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("frame available");

    consumer.abandon();
    assert_eq!(queue.disconnect_count(), 1);
    assert_eq!(gpu.destroyed().len(), 1);
    assert!(consumer.current_buffer().is_none());

    consumer.abandon();
    assert_eq!(queue.disconnect_count(), 1);
    assert_eq!(gpu.destroyed().len(), 1);

    assert_eq!(
        consumer.update_tex_image(),
        Err(TexflowError::NotInitialized)
    );
}

#[test]
fn test_drop_abandons() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    drop(consumer);
    assert_eq!(queue.disconnect_count(), 1);
}

#[test]
fn test_update_rejects_mismatched_display_and_context() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    // First call latches the current display and context.
    consumer.update_tex_image().expect("latches context");

    gpu.set_current(DisplayHandle::new(9), ContextHandle::new(1));
    let err = consumer.update_tex_image().unwrap_err();
    assert_eq!(err, TexflowError::InvalidDisplay);
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    gpu.set_current(DisplayHandle::new(1), ContextHandle::new(9));
    assert_eq!(
        consumer.update_tex_image(),
        Err(TexflowError::InvalidContext)
    );

    gpu.set_current(DisplayHandle::new(1), ContextHandle::new(1));
    assert!(consumer.update_tex_image().is_ok());
}

#[test]
fn test_slot_without_buffer_is_bad_value() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    queue.enqueue_frame(4, None);
    let err = consumer.update_tex_image().unwrap_err();
    assert_eq!(err, TexflowError::EmptySlot { slot: 4 });
    assert_eq!(err.kind(), ErrorKind::BadValue);

    // The slot goes back to the queue and nothing was committed.
    assert_eq!(queue.releases().len(), 1);
    assert_eq!(queue.releases()[0].slot, 4);
    assert_eq!(consumer.current_slot(), None);
}

#[test]
fn test_image_creation_failure_keeps_installed_buffer() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    gpu.fail_next_create_image();
    queue.enqueue_frame(2, Some(test_buffer(8, 8)));
    assert_eq!(
        consumer.update_tex_image(),
        Err(TexflowError::ImageCreationFailed { slot: 2 })
    );
    assert_eq!(queue.releases().len(), 1);
    assert_eq!(consumer.current_slot(), None);

    // The buffer installed for the failed attempt is still there: the
    // retry needs no new allocation from the queue.
    queue.enqueue_frame(2, None);
    assert!(consumer.update_tex_image().is_ok());
    assert_eq!(consumer.current_slot(), Some(2));
}

#[test]
fn test_bind_failure_releases_acquired_slot_and_keeps_state() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer_with(&queue, &gpu, fenced_config());

    queue.enqueue_frame(0, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("first frame");
    queue.enqueue_frame(1, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("second frame");

    // Slot 0 was released fenced and keeps that fence in its record.
    let fence = queue.releases()[0].fence.expect("fenced release");

    // Re-acquire slot 0 (image still cached) but fail the attach.
    queue.enqueue_frame(0, None);
    gpu.fail_next_attach(GpuError::new(0x0502));
    let err = consumer.update_tex_image().unwrap_err();
    assert_eq!(err, TexflowError::BindFailed(GpuError::new(0x0502)));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // The failed slot went back with its existing fence; no new fence was
    // created and the previous frame is still current.
    let releases = queue.releases();
    assert_eq!(releases.last().unwrap().slot, 0);
    assert_eq!(releases.last().unwrap().fence, Some(fence));
    assert_eq!(gpu.created_fences().len(), 1);
    assert_eq!(consumer.current_slot(), Some(1));
}

#[test]
fn test_fence_handoff_on_release() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer_with(&queue, &gpu, fenced_config());

    queue.enqueue_frame(0, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("first frame");
    // No previous frame, so no fence yet.
    assert_eq!(gpu.created_fences().len(), 0);

    queue.enqueue_frame(1, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("second frame");

    // The old slot is fenced, the pipeline flushed, and the fence rides
    // along on the release.
    assert_eq!(gpu.created_fences().len(), 1);
    assert_eq!(gpu.flush_count(), 1);
    let releases = queue.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].slot, 0);
    assert_eq!(releases[0].fence, Some(gpu.created_fences()[0]));
}

#[test]
fn test_fence_creation_failure_releases_acquired_slot() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer_with(&queue, &gpu, fenced_config());

    queue.enqueue_frame(0, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("first frame");

    queue.enqueue_frame(1, Some(test_buffer(8, 8)));
    gpu.fail_next_create_fence();
    assert_eq!(
        consumer.update_tex_image(),
        Err(TexflowError::FenceCreationFailed)
    );

    // The just-acquired slot 1 went back (unfenced); slot 0 is still the
    // current frame and was never released.
    let releases = queue.releases();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].slot, 1);
    assert_eq!(releases[0].fence, None);
    assert_eq!(consumer.current_slot(), Some(0));
    assert_eq!(gpu.flush_count(), 0);
}

#[test]
fn test_acquire_errors_pass_through() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    queue.fail_next_acquire(QueueError::Abandoned);
    let err = consumer.update_tex_image().unwrap_err();
    assert_eq!(err, TexflowError::Queue(QueueError::Abandoned));
    assert_eq!(err.kind(), ErrorKind::Queue);
}

/// Listener that immediately consumes the frame it was told about, the
/// way render loops drive the consumer.
struct ChainedListener {
    consumer: Mutex<Option<Arc<TextureConsumer>>>,
    calls: AtomicUsize,
}

impl FrameAvailableListener for ChainedListener {
    fn on_frame_available(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let consumer = self.consumer.lock().clone();
        if let Some(consumer) = consumer {
            consumer.update_tex_image().expect("re-entrant update");
        }
    }
}

#[test]
fn test_listener_runs_unlocked_and_may_reenter() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    let listener = Arc::new(ChainedListener {
        consumer: Mutex::new(Some(consumer.clone())),
        calls: AtomicUsize::new(0),
    });
    consumer.set_frame_available_listener(Some(listener.clone()));

    // The enqueue notifies the consumer, which forwards to the listener
    // outside its lock; the listener's update_tex_image must not deadlock.
    queue.enqueue_frame(0, Some(test_buffer(8, 8)));

    assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    assert_eq!(consumer.current_slot(), Some(0));

    // Break the retain cycle before dropping.
    consumer.set_frame_available_listener(None);
    *listener.consumer.lock() = None;
}

#[test]
fn test_listener_is_replaceable() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    let first = Arc::new(ChainedListener {
        consumer: Mutex::new(None),
        calls: AtomicUsize::new(0),
    });
    let second = Arc::new(ChainedListener {
        consumer: Mutex::new(None),
        calls: AtomicUsize::new(0),
    });

    consumer.set_frame_available_listener(Some(first.clone()));
    queue.enqueue_frame(0, Some(test_buffer(8, 8)));

    consumer.set_frame_available_listener(Some(second.clone()));
    queue.enqueue_frame(1, Some(test_buffer(8, 8)));

    assert_eq!(first.calls.load(Ordering::SeqCst), 1);
    assert_eq!(second.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_new_allocation_for_slot_destroys_cached_image() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    queue.enqueue_frame(0, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("first allocation");
    let first_image = gpu.created_images()[0];

    // The queue re-allocated slot 0: the cached image is stale.
    queue.enqueue_frame(0, Some(test_buffer(16, 16)));
    consumer.update_tex_image().expect("second allocation");

    assert_eq!(gpu.destroyed(), vec![first_image]);
    assert_eq!(gpu.created_images().len(), 2);
}

#[test]
fn test_queue_setters_pass_through() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    consumer.set_default_buffer_size(1280, 720).unwrap();
    consumer.set_default_buffer_format(PixelFormat::Nv21).unwrap();
    consumer.set_consumer_usage_bits(0x200).unwrap();
    consumer.set_transform_hint(flags::ROTATE_270).unwrap();
    assert_eq!(queue.default_size(), Some((1280, 720)));
    assert_eq!(queue.default_format(), Some(PixelFormat::Nv21));
    assert_eq!(queue.usage_bits(), Some(0x200));
    assert_eq!(queue.transform_hint(), Some(flags::ROTATE_270));

    consumer.abandon();
    assert_eq!(
        consumer.set_default_buffer_size(640, 480),
        Err(TexflowError::NotInitialized)
    );
    assert_eq!(
        consumer.set_consumer_usage_bits(0x100),
        Err(TexflowError::NotInitialized)
    );
}

#[test]
fn test_synchronous_mode_reflects_queue_until_abandoned() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    assert!(!consumer.is_synchronous_mode());
    queue.set_synchronous(true);
    assert!(consumer.is_synchronous_mode());

    consumer.abandon();
    assert!(!consumer.is_synchronous_mode());
}

#[test]
fn test_set_name_forwards_to_queue() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);

    consumer.set_name("decoder-output");
    assert_eq!(consumer.name(), "decoder-output");
    assert_eq!(queue.consumer_name().as_deref(), Some("decoder-output"));
}

#[test]
fn test_dump_reports_current_state() {
    let queue = FakeQueue::new();
    let gpu = FakeGpu::new();
    let consumer = consumer(&queue, &gpu);
    consumer.set_name("preview");

    queue.enqueue_frame(3, Some(test_buffer(8, 8)));
    consumer.update_tex_image().expect("frame available");

    let dump = consumer.dump();
    assert!(dump.contains("[preview]"));
    assert!(dump.contains("slot=Some(3)"));
    assert!(dump.contains("abandoned=false"));
}
