//! Free-list allocator configuration

use core::fmt;
use core::str::FromStr;

use crate::error::{MemoryError, MemoryResult};

/// How a free block is chosen among the adequate ones
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FitPolicy {
    /// Take the first adequate block met by the search
    #[default]
    First,
    /// Take the smallest adequate block; an exact match ends the search
    Best,
}

impl FromStr for FitPolicy {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-fit" => Ok(Self::First),
            "best" | "best-fit" => Ok(Self::Best),
            other => Err(MemoryError::invalid_config(&format!("unknown fit policy '{other}'"))),
        }
    }
}

impl fmt::Display for FitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::First => "first",
            Self::Best => "best",
        })
    }
}

/// Configuration shared by the boundary-tag allocators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListConfig {
    /// Block selection policy
    pub fit: FitPolicy,

    /// Segregated lists only: search larger size classes when the request's
    /// own class has no adequate block.
    pub class_fallthrough: bool,

    /// Enable statistics tracking
    pub track_stats: bool,

    /// Fill pattern byte for newly allocated payloads (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for released payloads (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            fit: FitPolicy::First,
            class_fallthrough: false,
            track_stats: cfg!(debug_assertions),
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }
}

impl ListConfig {
    /// Production configuration - first fit, no debugging aids
    #[must_use]
    pub fn production() -> Self {
        Self {
            fit: FitPolicy::First,
            class_fallthrough: false,
            track_stats: false,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - best fit, fill patterns and statistics
    #[must_use]
    pub fn debug() -> Self {
        Self {
            fit: FitPolicy::Best,
            class_fallthrough: false,
            track_stats: true,
            alloc_pattern: Some(0xAB),
            dealloc_pattern: Some(0xDF),
        }
    }

    /// Same configuration with a different fit policy
    #[must_use]
    pub fn with_fit(mut self, fit: FitPolicy) -> Self {
        self.fit = fit;
        self
    }

    pub fn validate(&self) -> MemoryResult<()> {
        if self.alloc_pattern.is_some() && self.alloc_pattern == self.dealloc_pattern {
            return Err(MemoryError::invalid_config(
                "list: alloc and dealloc patterns must differ",
            ));
        }
        Ok(())
    }
}
