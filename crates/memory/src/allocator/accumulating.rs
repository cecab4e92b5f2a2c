//! Allocators that grow by adding backing instances
//!
//! [`AccumulatingAllocator`] keeps a list of allocators of one strategy and
//! [`AccumulatingPool`] a list of typed chunk pools. Each tries what it
//! already has and adds one larger instance only when all of them are
//! exhausted. Nothing is returned to the process allocator until
//! `deallocate_all` or drop, so every block handed out stays put.

use core::marker::PhantomData;

use parking_lot::RwLock;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

use crate::allocator::pool::ChunkRegion;
use crate::allocator::sealed::{AllocatorInternal, FragmentationStats};
use crate::allocator::{
    AllocResult, Allocator, BackedAllocator, Block, ChunkAllocator, PoolAllocator, PoolConfig,
};
use crate::core::types::size::KB;
use crate::error::{MemoryError, MemoryResult};

/// Growth policy shared by the accumulating wrappers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatingConfig {
    /// Capacity of the first instance of an [`AccumulatingAllocator`]
    pub min_block_size: usize,

    /// Each new instance is this many times larger than the previous one
    /// (pools: than all previous ones together)
    pub growth_factor: usize,

    /// Chunks in the first pool of an [`AccumulatingPool`]
    pub initial_pool_chunks: usize,
}

impl Default for AccumulatingConfig {
    fn default() -> Self {
        Self {
            min_block_size: 64 * KB,
            growth_factor: 2,
            initial_pool_chunks: 64,
        }
    }
}

impl AccumulatingConfig {
    pub fn validate(&self) -> MemoryResult<()> {
        if self.min_block_size == 0 {
            return Err(MemoryError::invalid_config(
                "accumulating: min_block_size must be non-zero",
            ));
        }
        if self.growth_factor < 2 {
            return Err(MemoryError::invalid_config(
                "accumulating: growth_factor must be at least 2",
            ));
        }
        if self.initial_pool_chunks == 0 {
            return Err(MemoryError::invalid_config(
                "accumulating: initial_pool_chunks must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Growable list of `A` instances
///
/// # Examples
///
/// ```
/// use carve_memory::allocator::{
///     AccumulatingAllocator, AccumulatingConfig, Allocator, LinearAllocator,
/// };
///
/// let config = AccumulatingConfig { min_block_size: 256, ..Default::default() };
/// let alloc = AccumulatingAllocator::<LinearAllocator>::with_config(config).unwrap();
///
/// for _ in 0..10 {
///     assert!(alloc.allocate(100).is_valid());
/// }
/// assert_eq!(alloc.instance_count(), 3); // 256 + 512 + 1024 bytes
/// ```
pub struct AccumulatingAllocator<A: BackedAllocator> {
    instances: RwLock<Vec<Box<A>>>,
    config: AccumulatingConfig,
}

impl<A: BackedAllocator> AccumulatingAllocator<A> {
    /// Empty wrapper with the default growth policy.
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(Vec::new()),
            config: AccumulatingConfig::default(),
        }
    }

    pub fn with_config(config: AccumulatingConfig) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self {
            instances: RwLock::new(Vec::new()),
            config,
        })
    }

    pub fn config(&self) -> &AccumulatingConfig {
        &self.config
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Summed capacity of all instances.
    pub fn capacity(&self) -> usize {
        self.instances.read().iter().map(|a| a.capacity()).sum()
    }

    /// Capacity of the next instance, large enough for one `size` request.
    fn next_capacity(&self, last: Option<usize>, size: usize) -> Option<usize> {
        let grown = match last {
            Some(capacity) => capacity.checked_mul(self.config.growth_factor)?,
            None => self.config.min_block_size,
        };
        Some(grown.max(self.config.min_block_size).max(A::required_capacity(size)?))
    }

    /// Drops every instance, returning all memory to the process allocator.
    ///
    /// # Safety
    ///
    /// Every block handed out becomes dangling.
    pub unsafe fn deallocate_all(&self) {
        let mut instances = self.instances.write();
        #[cfg(feature = "logging")]
        debug!(instances = instances.len(), "releasing all accumulated instances");
        instances.clear();
    }
}

impl<A: BackedAllocator> Default for AccumulatingAllocator<A> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: blocks come from the boxed instances, which never move or drop
// while the wrapper is alive (except through `deallocate_all`, whose
// caller gives up every block).
unsafe impl<A: BackedAllocator> Allocator for AccumulatingAllocator<A> {
    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::invalid();
        }

        let seen = {
            let instances = self.instances.read();
            if let Some(block) = instances
                .iter()
                .map(|a| a.allocate(size))
                .find(Block::is_valid)
            {
                return block;
            }
            instances.len()
        };

        let mut instances = self.instances.write();
        // Another thread may have grown the list meanwhile.
        if let Some(block) = instances
            .get(seen..)
            .unwrap_or_default()
            .iter()
            .map(|a| a.allocate(size))
            .find(Block::is_valid)
        {
            return block;
        }

        let last = instances.last().map(|a| a.capacity());
        let Some(capacity) = self.next_capacity(last, size) else {
            return Block::invalid();
        };
        let instance = match A::with_capacity(capacity) {
            Ok(instance) => Box::new(instance),
            Err(_error) => {
                #[cfg(feature = "logging")]
                warn!(capacity, error = %_error, "could not add an accumulating instance");
                return Block::invalid();
            }
        };

        #[cfg(feature = "logging")]
        debug!(
            strategy = core::any::type_name::<A>(),
            capacity,
            instances = instances.len() + 1,
            "accumulating allocator grew"
        );

        let block = instance.allocate(size);
        if !block.is_valid() {
            // A fresh instance that cannot serve the request is dropped so
            // repeated requests never grow the list.
            #[cfg(feature = "logging")]
            warn!(
                strategy = core::any::type_name::<A>(),
                size, capacity, "new instance cannot serve the request"
            );
            return Block::invalid();
        }
        instances.push(instance);
        block
    }

    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        let instances = self.instances.read();
        instances
            .iter()
            .find(|a| a.contains_ptr(ptr))
            // SAFETY: forwarded to the caller; the owner was found by range.
            .is_some_and(|a| unsafe { a.deallocate_ptr(ptr) })
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.instances.read().iter().any(|a| a.contains_ptr(ptr))
    }
}

impl<A: BackedAllocator + AllocatorInternal> AllocatorInternal for AccumulatingAllocator<A> {
    fn internal_fragmentation(&self) -> FragmentationStats {
        self.instances
            .read()
            .iter()
            .map(|a| a.internal_fragmentation())
            .fold(FragmentationStats::default(), FragmentationStats::combine)
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        self.instances
            .read()
            .iter()
            .try_for_each(|a| a.internal_validate())
    }
}

impl<A: BackedAllocator> core::fmt::Debug for AccumulatingAllocator<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccumulatingAllocator")
            .field("strategy", &core::any::type_name::<A>())
            .field("instances", &self.instance_count())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Growable set of lock-free pools, one chunk per `T`
///
/// Each new pool holds `growth_factor` times as many chunks as all previous
/// pools together. Values placed with [`ChunkAllocator::create`] are not
/// dropped by the pool; use [`ChunkAllocator::destroy`].
pub struct AccumulatingPool<T> {
    pools: RwLock<Vec<Box<PoolAllocator>>>,
    chunk_size: usize,
    chunk_align: usize,
    config: AccumulatingConfig,
    pool_config: PoolConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AccumulatingPool<T> {
    pub fn new() -> AllocResult<Self> {
        Self::with_config(AccumulatingConfig::default(), PoolConfig::default())
    }

    pub fn with_config(config: AccumulatingConfig, pool_config: PoolConfig) -> AllocResult<Self> {
        config.validate()?;
        pool_config.validate()?;
        let (chunk_size, chunk_align) = ChunkRegion::chunk_layout(
            core::mem::size_of::<T>().max(1),
            core::mem::align_of::<T>(),
        )?;
        Ok(Self {
            pools: RwLock::new(Vec::new()),
            chunk_size,
            chunk_align,
            config,
            pool_config,
            _marker: PhantomData,
        })
    }

    pub fn pool_count(&self) -> usize {
        self.pools.read().len()
    }

    /// Chunks across all pools.
    pub fn capacity(&self) -> usize {
        self.pools.read().iter().map(|p| p.chunk_count()).sum()
    }

    /// Chunks currently handed out.
    pub fn allocated(&self) -> usize {
        self.pools.read().iter().map(|p| p.allocated_chunks()).sum()
    }

    /// Places `value` in a chunk, growing when every pool is full.
    pub fn alloc(&self, value: T) -> AllocResult<core::ptr::NonNull<T>> {
        self.create(value)
    }

    /// Drops every pool.
    ///
    /// # Safety
    ///
    /// Every pointer handed out becomes dangling; live values are not dropped.
    pub unsafe fn deallocate_all(&self) {
        self.pools.write().clear();
    }
}

// SAFETY: chunks come from the boxed pools, which never move or drop while
// the wrapper is alive (except through `deallocate_all`).
unsafe impl<T> Allocator for AccumulatingPool<T> {
    fn allocate(&self, size: usize) -> Block {
        if size == 0 || size > self.chunk_size {
            return Block::invalid();
        }

        let seen = {
            let pools = self.pools.read();
            if let Some(block) = pools.iter().map(|p| p.allocate(size)).find(Block::is_valid) {
                return block;
            }
            pools.len()
        };

        let mut pools = self.pools.write();
        if let Some(block) = pools
            .get(seen..)
            .unwrap_or_default()
            .iter()
            .map(|p| p.allocate(size))
            .find(Block::is_valid)
        {
            return block;
        }

        let existing: usize = pools.iter().map(|p| p.chunk_count()).sum();
        let Some(chunks) = (match existing {
            0 => Some(self.config.initial_pool_chunks),
            n => n.checked_mul(self.config.growth_factor),
        }) else {
            return Block::invalid();
        };

        let pool = match PoolAllocator::with_config(
            self.chunk_size,
            self.chunk_align,
            chunks,
            self.pool_config.clone(),
        ) {
            Ok(pool) => Box::new(pool),
            Err(_error) => {
                #[cfg(feature = "logging")]
                warn!(chunks, error = %_error, "could not add a pool");
                return Block::invalid();
            }
        };

        #[cfg(feature = "logging")]
        debug!(
            value_type = core::any::type_name::<T>(),
            chunks,
            pools = pools.len() + 1,
            "accumulating pool grew"
        );

        let block = pool.allocate(size);
        if block.is_valid() {
            pools.push(pool);
        }
        block
    }

    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        let pools = self.pools.read();
        pools
            .iter()
            .find(|p| p.contains_ptr(ptr))
            // SAFETY: forwarded to the caller; the owner was found by range.
            .is_some_and(|p| unsafe { p.deallocate_ptr(ptr) })
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.pools.read().iter().any(|p| p.contains_ptr(ptr))
    }
}

impl<T> ChunkAllocator for AccumulatingPool<T> {
    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn chunk_align(&self) -> usize {
        self.chunk_align
    }
}

impl<T> AllocatorInternal for AccumulatingPool<T> {
    fn internal_fragmentation(&self) -> FragmentationStats {
        self.pools
            .read()
            .iter()
            .map(|p| p.internal_fragmentation())
            .fold(FragmentationStats::default(), FragmentationStats::combine)
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        self.pools.read().iter().try_for_each(|p| p.internal_validate())
    }
}

impl<T> core::fmt::Debug for AccumulatingPool<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccumulatingPool")
            .field("value_type", &core::any::type_name::<T>())
            .field("pools", &self.pool_count())
            .field("chunks", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{LinearAllocator, RedBlackTreeAllocator};

    fn small() -> AccumulatingConfig {
        AccumulatingConfig {
            min_block_size: 256,
            growth_factor: 2,
            initial_pool_chunks: 4,
        }
    }

    #[test]
    fn config_validation() {
        AccumulatingConfig::default().validate().expect("default");
        let bad = AccumulatingConfig {
            growth_factor: 1,
            ..AccumulatingConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn instances_double() {
        let alloc = AccumulatingAllocator::<LinearAllocator>::with_config(small()).expect("wrapper");
        assert_eq!(alloc.instance_count(), 0);
        for _ in 0..7 {
            assert!(alloc.allocate(128).is_valid());
        }
        // 256 (2 blocks) + 512 (4) + 1024 (1 so far)
        assert_eq!(alloc.instance_count(), 3);
        assert_eq!(alloc.capacity(), 256 + 512 + 1024);
    }

    #[test]
    fn oversized_request_gets_its_own_instance() {
        let alloc =
            AccumulatingAllocator::<RedBlackTreeAllocator>::with_config(small()).expect("wrapper");
        let mut block = alloc.allocate(10_000);
        assert!(block.is_valid());
        assert!(alloc.capacity() >= 10_000);
        // SAFETY: the block came from `alloc`.
        assert!(unsafe { alloc.deallocate(&mut block) });
        alloc.internal_validate().expect("valid instances");
    }

    #[test]
    fn pool_growth_keeps_earlier_values() {
        let pool = AccumulatingPool::<u64>::with_config(small(), PoolConfig::production())
            .expect("pool");
        let values: Vec<_> = (0..5u64).map(|i| pool.alloc(i).expect("value")).collect();
        assert_eq!(pool.pool_count(), 2);
        assert_eq!(pool.capacity(), 4 + 8);

        for (i, ptr) in values.iter().enumerate() {
            // SAFETY: every pointer holds a live u64 written by `alloc`.
            assert_eq!(unsafe { *ptr.as_ptr() }, i as u64);
        }
        for ptr in values {
            // SAFETY: created by this pool and not used again.
            assert!(unsafe { pool.destroy(ptr) });
        }
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn deallocate_all_starts_over() {
        let pool = AccumulatingPool::<[u8; 24]>::with_config(small(), PoolConfig::production())
            .expect("pool");
        let _ = pool.alloc([0; 24]).expect("value");
        // SAFETY: the value above is never touched again.
        unsafe { pool.deallocate_all() };
        assert_eq!(pool.pool_count(), 0);
        assert!(pool.alloc([1; 24]).is_ok());
        assert_eq!(pool.capacity(), 4);
    }
}
