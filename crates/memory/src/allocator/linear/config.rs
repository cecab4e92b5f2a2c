//! Linear allocator configuration

use crate::error::{MemoryError, MemoryResult};

/// Configuration for [`LinearAllocator`](super::LinearAllocator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern byte for newly allocated memory (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for rolled-back or reset memory (for debugging)
    pub dealloc_pattern: Option<u8>,

    /// Use exponential backoff between CAS retries
    pub use_backoff: bool,
}

impl Default for LinearConfig {
    fn default() -> Self {
        Self {
            track_stats: cfg!(debug_assertions),
            alloc_pattern: if cfg!(debug_assertions) { Some(0xAA) } else { None },
            dealloc_pattern: if cfg!(debug_assertions) { Some(0xDD) } else { None },
            use_backoff: true,
        }
    }
}

impl LinearConfig {
    /// Production configuration - no debugging aids
    #[must_use]
    pub fn production() -> Self {
        Self {
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
            use_backoff: true,
        }
    }

    /// Debug configuration - fill patterns and statistics
    #[must_use]
    pub fn debug() -> Self {
        Self {
            track_stats: true,
            alloc_pattern: Some(0xAA),
            dealloc_pattern: Some(0xDD),
            use_backoff: false,
        }
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if self.alloc_pattern.is_some() && self.alloc_pattern == self.dealloc_pattern {
            return Err(MemoryError::invalid_config(
                "linear: alloc and dealloc patterns must differ",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        LinearConfig::default().validate().expect("default");
        LinearConfig::production().validate().expect("production");
        LinearConfig::debug().validate().expect("debug");

        let clash = LinearConfig {
            alloc_pattern: Some(0x11),
            dealloc_pattern: Some(0x11),
            ..LinearConfig::debug()
        };
        assert!(clash.validate().is_err());
    }
}
