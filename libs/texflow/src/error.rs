// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Error types for texflow.
//!
//! The consumer surfaces fine-grained errors; [`TexflowError::kind`]
//! collapses them to the coarse status classes callers branch on.

use thiserror::Error;

use crate::gpu::GpuError;
use crate::queue::QueueError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TexflowError {
    /// The consumer has been abandoned; every operation is a no-op.
    #[error("consumer has been abandoned")]
    NotInitialized,

    /// The caller's current GPU display differs from the one latched at
    /// the first successful bind.
    #[error("invalid current GPU display")]
    InvalidDisplay,

    /// The caller's current GPU context differs from the one latched at
    /// the first successful bind.
    #[error("invalid current GPU context")]
    InvalidContext,

    /// The platform failed to wrap the native buffer in a GPU image.
    #[error("failed to create a GPU image for slot {slot}")]
    ImageCreationFailed { slot: usize },

    /// Attaching the GPU image to the texture object raised a GPU error.
    #[error("failed to attach GPU image to the texture: {0}")]
    BindFailed(GpuError),

    /// The platform could not create a read-completion fence.
    #[error("failed to create a read-completion fence")]
    FenceCreationFailed,

    /// The queue handed out a slot that has neither a native buffer nor a
    /// cached GPU image. This is a queue-invariant violation.
    #[error("acquired slot {slot} has no buffer installed")]
    EmptySlot { slot: usize },

    /// The consumer configuration was rejected at construction.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A buffer-queue error passed through unchanged.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Coarse classification matching the status surface of the consumer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotInitialized,
    InvalidArgument,
    BadValue,
    Queue,
}

impl TexflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TexflowError::NotInitialized => ErrorKind::NotInitialized,
            TexflowError::InvalidDisplay
            | TexflowError::InvalidContext
            | TexflowError::ImageCreationFailed { .. }
            | TexflowError::BindFailed(_)
            | TexflowError::FenceCreationFailed
            | TexflowError::Configuration(_) => ErrorKind::InvalidArgument,
            TexflowError::EmptySlot { .. } => ErrorKind::BadValue,
            TexflowError::Queue(_) => ErrorKind::Queue,
        }
    }
}

/// Result type that uses [`TexflowError`].
pub type Result<T> = std::result::Result<T, TexflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(TexflowError::NotInitialized.kind(), ErrorKind::NotInitialized);
        assert_eq!(TexflowError::InvalidDisplay.kind(), ErrorKind::InvalidArgument);
        assert_eq!(TexflowError::InvalidContext.kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            TexflowError::ImageCreationFailed { slot: 3 }.kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(TexflowError::FenceCreationFailed.kind(), ErrorKind::InvalidArgument);
        assert_eq!(TexflowError::EmptySlot { slot: 0 }.kind(), ErrorKind::BadValue);
        assert_eq!(
            TexflowError::Queue(QueueError::Abandoned).kind(),
            ErrorKind::Queue
        );
    }
}
