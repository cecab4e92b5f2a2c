//! Allocation strategies over fixed backing blocks
//!
//! | strategy                    | free space              | synchronization |
//! |-----------------------------|-------------------------|-----------------|
//! | [`LinearAllocator`]         | none (bump cursor)      | CAS             |
//! | [`PoolAllocator`]           | chunk list              | CAS, ABA tag    |
//! | [`LockingPoolAllocator`]    | chunk list              | mutex           |
//! | [`ImplicitListAllocator`]   | boundary tags           | mutex           |
//! | [`ExplicitListAllocator`]   | address-ordered list    | mutex           |
//! | [`SegregatedListAllocator`] | lists per size class    | mutex           |
//! | [`RedBlackTreeAllocator`]   | size-keyed tree         | mutex           |
//!
//! [`FallbackAllocator`] and [`ThresholdAllocator`] compose two allocators;
//! [`AccumulatingAllocator`] and [`AccumulatingPool`] grow by adding
//! instances; [`global`] exposes one allocator to foreign `malloc`/`free`
//! hooks.

mod accumulating;
mod backing;
mod block;
mod composite;
pub mod global;
mod linear;
mod pool;
pub mod sealed;
mod stats;
pub mod tagged;
mod traits;

pub use accumulating::{AccumulatingAllocator, AccumulatingConfig, AccumulatingPool};
pub use backing::BackingBlock;
pub use block::Block;
pub use composite::{FallbackAllocator, ThresholdAllocator};
pub use linear::{LinearAllocator, LinearCheckpoint, LinearConfig, LinearScope};
pub use pool::{ChunkAllocator, LockingPoolAllocator, PoolAllocator, PoolConfig};
pub use sealed::{AllocatorInternal, FragmentationStats};
pub use stats::{AllocatorStats, AtomicAllocatorStats, OptionalStats};
pub use tagged::{
    ExplicitListAllocator, FitPolicy, FreeIndex, ImplicitListAllocator, ListConfig, Margin,
    RedBlackTreeAllocator, SegregatedListAllocator, TaggedAllocator,
};
pub use traits::{Allocator, BackedAllocator, ThreadSafeAllocator};

pub use crate::core::traits::{MemoryUsage, Resettable, StatisticsProvider};
pub use crate::error::{AllocError, AllocResult};
