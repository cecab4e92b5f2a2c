//! Capability traits shared by every allocator

use crate::allocator::AllocatorStats;

/// Memory usage reporting
pub trait MemoryUsage {
    /// Get currently used memory in bytes, including per-block overhead
    fn used_memory(&self) -> usize;

    /// Get available memory in bytes (if known)
    fn available_memory(&self) -> Option<usize>;
}

/// Bulk reclamation ("deallocate all")
pub trait Resettable {
    /// Reset allocator to its freshly constructed state
    ///
    /// # Safety
    /// - All blocks handed out before reset become invalid immediately
    /// - Caller must ensure no live references into them exist
    unsafe fn reset(&self);
}

/// Statistics access
pub trait StatisticsProvider {
    /// Get current statistics
    fn statistics(&self) -> AllocatorStats;

    /// Reset statistics
    fn reset_statistics(&self);

    /// Check if statistics collection is enabled
    fn statistics_enabled(&self) -> bool {
        true
    }
}
