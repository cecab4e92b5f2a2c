//! Pool allocator configuration

use crate::error::{MemoryError, MemoryResult};

/// Configuration for [`PoolAllocator`](super::PoolAllocator) and
/// [`LockingPoolAllocator`](super::LockingPoolAllocator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern byte for newly allocated memory (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for deallocated memory (for debugging)
    pub dealloc_pattern: Option<u8>,

    /// Use exponential backoff between CAS retries (lock-free pool)
    pub use_backoff: bool,

    /// Keep the free list address-ordered on deallocation (locking pool).
    ///
    /// Makes `deallocate` O(n) in exchange for handing out chunks in
    /// ascending address order.
    pub sorted_free: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xBB) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDD) } else { None },
            use_backoff: true,
            sorted_free: false,
        }
    }
}

impl PoolConfig {
    /// Production configuration - optimized for performance
    #[must_use]
    pub fn production() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
            use_backoff: true,
            sorted_free: false,
        }
    }

    /// Debug configuration - optimized for debugging
    #[must_use]
    pub fn debug() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
            use_backoff: false,
            sorted_free: true,
        }
    }

    /// Performance configuration - minimal overhead
    #[must_use]
    pub fn performance() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
            use_backoff: false,
            sorted_free: false,
        }
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if self.alloc_pattern.is_some() && self.alloc_pattern == self.dealloc_pattern {
            return Err(MemoryError::invalid_pool_config(
                "alloc and dealloc patterns must differ",
            ));
        }
        Ok(())
    }
}
