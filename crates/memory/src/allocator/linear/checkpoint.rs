//! Checkpoint and scoping support for the linear allocator

#[cfg(feature = "logging")]
use tracing::warn;

use super::LinearAllocator;

/// Saved cursor position
///
/// Only valid for the generation it was taken in; a reset bumps the
/// generation and turns older checkpoints stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearCheckpoint {
    pub(super) position: usize,
    pub(super) generation: u32,
}

impl LinearCheckpoint {
    /// Cursor offset at the time of the checkpoint
    pub fn position(&self) -> usize {
        self.position
    }
}

/// RAII guard that rolls the allocator back to where it was on creation
pub struct LinearScope<'a> {
    allocator: &'a LinearAllocator,
    checkpoint: LinearCheckpoint,
}

impl<'a> LinearScope<'a> {
    pub(super) fn new(allocator: &'a LinearAllocator) -> Self {
        Self {
            checkpoint: allocator.checkpoint(),
            allocator,
        }
    }

    pub fn allocator(&self) -> &'a LinearAllocator {
        self.allocator
    }
}

impl Drop for LinearScope<'_> {
    fn drop(&mut self) {
        // A reset inside the scope makes the checkpoint stale; the cursor is
        // left where it is.
        if let Err(_error) = self.allocator.restore(self.checkpoint) {
            #[cfg(feature = "logging")]
            warn!(
                position = self.checkpoint.position,
                error = %_error,
                "linear scope left the cursor in place"
            );
        }
    }
}
