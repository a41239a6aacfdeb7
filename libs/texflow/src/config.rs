// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Consumer configuration.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Result, TexflowError};
use crate::gpu::TextureTarget;

/// Construction-time options for a [`crate::TextureConsumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Target the texture object is bound to.
    pub texture_target: TextureTarget,

    /// Fence each released slot so the producer cannot write into a
    /// buffer the GPU is still sampling.
    pub use_fence_sync: bool,

    /// Let the producer dequeue the buffer the consumer is currently
    /// sampling. Incompatible with `use_fence_sync`: a fenced release
    /// stalls exactly the dequeue this mode is meant to allow.
    pub allow_dequeue_current_buffer: bool,

    /// Diagnostic name used in log output. Generated when absent.
    pub name: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            texture_target: TextureTarget::External,
            use_fence_sync: false,
            allow_dequeue_current_buffer: false,
            name: None,
        }
    }
}

impl ConsumerConfig {
    /// Rejects option combinations the consumer cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.use_fence_sync && self.allow_dequeue_current_buffer {
            return Err(TexflowError::Configuration(
                "use_fence_sync and allow_dequeue_current_buffer are incompatible".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(process_unique_name)
    }
}

/// Generates a name unique within this process, safe under concurrent
/// construction.
fn process_unique_name() -> String {
    static NEXT_ID: AtomicU32 = AtomicU32::new(0);
    format!(
        "unnamed-{}-{}",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    )
}
