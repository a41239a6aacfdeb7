// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed-size table of per-slot GPU resources.
//!
//! Slot indices are small stable integers assigned by the buffer queue,
//! so a flat array beats a map: reclaim sweeps are a linear scan and the
//! hot acquire path is a single index. Each record owns the GPU image
//! derived from its native buffer; the image must be destroyed before the
//! buffer reference is dropped.

use crate::buffer::ImageBuffer;
use crate::gpu::{DisplayHandle, FenceHandle, GpuPlatform, ImageHandle};

/// Upper bound on queue slots, matching the queue's own table.
pub const SLOT_COUNT: usize = 32;

#[derive(Debug, Default)]
struct SlotRecord {
    buffer: Option<ImageBuffer>,
    image: Option<ImageHandle>,
    fence: Option<FenceHandle>,
}

/// Per-slot resource table. All mutation happens under the consumer's
/// state lock.
#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: [SlotRecord; SLOT_COUNT],
}

impl SlotTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| SlotRecord::default()),
        }
    }

    /// Installs a freshly-allocated native buffer into `slot`, destroying
    /// the GPU image derived from the previous buffer if there was one.
    pub fn install(
        &mut self,
        slot: usize,
        buffer: ImageBuffer,
        gpu: &dyn GpuPlatform,
        display: DisplayHandle,
    ) {
        let record = &mut self.slots[slot];
        if let Some(image) = record.image.take() {
            if let Err(error) = gpu.destroy_image(display, image) {
                tracing::warn!("error destroying stale GPU image for slot {slot}: {error}");
            }
        }
        record.buffer = Some(buffer);
    }

    /// Releases everything held for `slot`. Idempotent; the slot is
    /// cleared even when image destruction fails.
    pub fn free(&mut self, slot: usize, gpu: &dyn GpuPlatform, display: DisplayHandle) {
        tracing::trace!("freeing slot {slot}");
        let record = &mut self.slots[slot];
        if let Some(image) = record.image.take() {
            if let Err(error) = gpu.destroy_image(display, image) {
                tracing::warn!("error destroying GPU image for slot {slot}: {error}");
            }
        }
        record.buffer = None;
    }

    /// Releases every slot.
    pub fn free_all(&mut self, gpu: &dyn GpuPlatform, display: DisplayHandle) {
        for slot in 0..SLOT_COUNT {
            self.free(slot, gpu, display);
        }
    }

    pub fn buffer(&self, slot: usize) -> Option<&ImageBuffer> {
        self.slots[slot].buffer.as_ref()
    }

    pub fn image(&self, slot: usize) -> Option<ImageHandle> {
        self.slots[slot].image
    }

    /// Caches the GPU image derived from the slot's buffer.
    pub fn set_image(&mut self, slot: usize, image: ImageHandle) {
        debug_assert!(
            self.slots[slot].buffer.is_some(),
            "slot {slot} has an image but no buffer"
        );
        self.slots[slot].image = Some(image);
    }

    pub fn fence(&self, slot: usize) -> Option<FenceHandle> {
        self.slots[slot].fence
    }

    pub fn set_fence(&mut self, slot: usize, fence: FenceHandle) {
        self.slots[slot].fence = Some(fence);
    }
}
