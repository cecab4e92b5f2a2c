//! Core building blocks shared by every allocator
//!
//! - [`config`]: crate-wide configuration and presets
//! - [`traits`]: usage, reset and statistics capabilities
//! - [`types`]: size constants and segregated size classes

pub mod config;
pub mod traits;
pub mod types;

pub use crate::error::{MemoryError, MemoryResult};
pub use config::{MemoryConfig, MemoryConfigBuilder};
pub use traits::{MemoryUsage, Resettable, StatisticsProvider};
pub use types::*;
