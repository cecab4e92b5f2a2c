//! # carve-memory
//!
//! Sub-allocators that carve allocations out of one fixed backing block,
//! plus strong/weak reference-counted handles that live inside them.
//!
//! ## Quick Start
//!
//! ```rust
//! use carve_memory::prelude::*;
//!
//! // A free-list allocator over 64 KiB, best fit on a size-ordered tree
//! let heap = RedBlackTreeAllocator::new(64 * 1024)?;
//! let mut block = heap.allocate(200);
//! assert!(block.is_valid());
//! unsafe { heap.deallocate(&mut block) };
//!
//! // Shared values placed in that allocator
//! let shared = create_sptr(&heap, vec![1, 2, 3])?;
//! let observer = Sptr::downgrade(&shared);
//! drop(shared);
//! assert!(observer.is_expired());
//! # Ok::<(), MemoryError>(())
//! ```
//!
//! ## Strategies
//!
//! - [`LinearAllocator`](allocator::LinearAllocator): bump cursor, checkpoints
//! - [`PoolAllocator`](allocator::PoolAllocator) /
//!   [`LockingPoolAllocator`](allocator::LockingPoolAllocator): fixed chunks
//! - [`ImplicitListAllocator`](allocator::ImplicitListAllocator),
//!   [`ExplicitListAllocator`](allocator::ExplicitListAllocator),
//!   [`SegregatedListAllocator`](allocator::SegregatedListAllocator),
//!   [`RedBlackTreeAllocator`](allocator::RedBlackTreeAllocator): boundary
//!   tags with splitting and coalescing
//! - [`FallbackAllocator`](allocator::FallbackAllocator),
//!   [`ThresholdAllocator`](allocator::ThresholdAllocator): composition
//! - [`AccumulatingAllocator`](allocator::AccumulatingAllocator),
//!   [`AccumulatingPool`](allocator::AccumulatingPool): growth on demand
//!
//! ## Features
//!
//! - `logging` (default): structured diagnostics through `tracing`
//! - `full`: everything above

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]
#![warn(rust_2018_idioms)]
// Explicit lifetimes are clearer in unsafe code even when elidable
#![allow(clippy::elidable_lifetime_names)]
// inline(always) on small alignment helpers is intentional for hot paths
#![allow(clippy::inline_always)]
// Pointer casts between block words and node structs are checked per site
#![allow(clippy::cast_ptr_alignment)]

pub mod allocator;
pub mod core;
pub mod error;
pub mod sptr;
pub mod utils;

pub use crate::core::MemoryConfig;
pub use crate::error::{MemoryError, MemoryResult, Result};

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::allocator::{
        AccumulatingAllocator, AccumulatingPool, AllocError, AllocResult, Allocator,
        AllocatorInternal, Block, ChunkAllocator, ExplicitListAllocator, FallbackAllocator,
        FitPolicy, ImplicitListAllocator, LinearAllocator, ListConfig, LockingPoolAllocator,
        PoolAllocator, RedBlackTreeAllocator, SegregatedListAllocator, ThresholdAllocator,
    };
    pub use crate::core::{MemoryConfig, MemoryUsage, Resettable, StatisticsProvider};
    pub use crate::error::{MemoryError, MemoryResult};
    pub use crate::sptr::{Sptr, Wptr, create_sptr};
}

#[cfg(feature = "logging")]
use tracing::{debug, info};

/// Loads [`MemoryConfig`] from the environment and validates it.
///
/// Call once at startup; the returned configuration is what the
/// application hands to the allocators it builds.
///
/// # Examples
///
/// ```rust
/// fn main() -> carve_memory::MemoryResult<()> {
///     let config = carve_memory::init()?;
///     let heap = carve_memory::allocator::ExplicitListAllocator::with_config(
///         config.accumulating.min_block_size,
///         config.list.clone(),
///     )?;
///     # drop(heap);
///     Ok(())
/// }
/// ```
pub fn init() -> MemoryResult<MemoryConfig> {
    #[cfg(feature = "logging")]
    debug!("initializing carve-memory");

    let config = MemoryConfig::from_env()?;

    #[cfg(feature = "logging")]
    info!(
        registered = allocator::global::is_registered(),
        "carve-memory initialized"
    );

    Ok(config)
}
