//! Mutex-guarded pool allocator

use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::trace;

use super::{ChunkAllocator, ChunkRegion, NIL, PoolConfig};
use crate::allocator::sealed::{AllocatorInternal, FragmentationStats};
use crate::allocator::{
    AllocResult, Allocator, AllocatorStats, Block, MemoryUsage, OptionalStats, Resettable,
    StatisticsProvider,
};

struct FreeList {
    head: usize,
    free: usize,
}

/// Pool of fixed-size chunks with a mutex around the free list.
///
/// With [`PoolConfig::sorted_free`] the free list stays address-ordered, so
/// allocation always returns the lowest free chunk.
pub struct LockingPoolAllocator {
    chunks: ChunkRegion,
    list: Mutex<FreeList>,
    config: PoolConfig,
    stats: OptionalStats,
}

impl LockingPoolAllocator {
    pub fn new(chunk_size: usize, chunk_align: usize, chunk_count: usize) -> AllocResult<Self> {
        Self::with_config(chunk_size, chunk_align, chunk_count, PoolConfig::default())
    }

    pub fn with_config(
        chunk_size: usize,
        chunk_align: usize,
        chunk_count: usize,
        config: PoolConfig,
    ) -> AllocResult<Self> {
        config.validate()?;
        let chunks = ChunkRegion::new(chunk_size, chunk_align, chunk_count)?;
        Ok(Self::from_region(chunks, config))
    }

    pub fn for_type<T>(chunk_count: usize) -> AllocResult<Self> {
        Self::with_config(
            core::mem::size_of::<T>(),
            core::mem::align_of::<T>(),
            chunk_count,
            PoolConfig::default(),
        )
    }

    /// # Safety
    ///
    /// See [`BackingBlock::borrowed`](crate::allocator::BackingBlock::borrowed).
    pub unsafe fn from_block(
        block: Block,
        chunk_size: usize,
        chunk_align: usize,
        config: PoolConfig,
    ) -> AllocResult<Self> {
        config.validate()?;
        // SAFETY: forwarded to the caller.
        let chunks = unsafe { ChunkRegion::from_block(block, chunk_size, chunk_align)? };
        Ok(Self::from_region(chunks, config))
    }

    fn from_region(chunks: ChunkRegion, config: PoolConfig) -> Self {
        let pool = Self {
            stats: OptionalStats::new(config.track_stats),
            chunks,
            list: Mutex::new(FreeList { head: NIL, free: 0 }),
            config,
        };
        pool.relink(&mut pool.list.lock());
        pool
    }

    fn relink(&self, list: &mut FreeList) {
        let count = self.chunks.chunk_count();
        for index in 0..count {
            let next = if index + 1 < count { index + 1 } else { NIL };
            // SAFETY: index < chunk_count; the lock is held.
            unsafe { self.chunks.link(index).write(next) };
        }
        list.head = 0;
        list.free = count;
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.chunk_count()
    }

    pub fn capacity(&self) -> usize {
        self.chunks.chunk_size() * self.chunks.chunk_count()
    }

    pub fn free_chunks(&self) -> usize {
        self.list.lock().free
    }

    pub fn allocated_chunks(&self) -> usize {
        self.chunk_count() - self.free_chunks()
    }

    fn insert_sorted(&self, list: &mut FreeList, index: usize) {
        if list.head == NIL || index < list.head {
            // SAFETY: index is a released chunk; the lock is held.
            unsafe { self.chunks.link(index).write(list.head) };
            list.head = index;
            return;
        }

        let mut prev = list.head;
        loop {
            // SAFETY: prev is on the free list; the lock is held.
            let next = unsafe { self.chunks.link(prev).read() };
            if next == NIL || next > index {
                // SAFETY: both chunks are free and owned by the list.
                unsafe {
                    self.chunks.link(index).write(next);
                    self.chunks.link(prev).write(index);
                }
                return;
            }
            prev = next;
        }
    }
}

// SAFETY: every list mutation happens under the mutex, so a chunk is on
// the list or handed out, never both.
unsafe impl Allocator for LockingPoolAllocator {
    fn allocate(&self, size: usize) -> Block {
        if size == 0 || size > self.chunks.chunk_size() {
            return Block::invalid();
        }

        let index = {
            let mut list = self.list.lock();
            if list.head == NIL {
                None
            } else {
                let index = list.head;
                // SAFETY: head is a free chunk; the lock is held.
                list.head = unsafe { self.chunks.link(index).read() };
                list.free -= 1;
                Some(index)
            }
        };

        let Some(index) = index else {
            #[cfg(feature = "logging")]
            trace!(chunk_size = self.chunks.chunk_size(), "locking pool exhausted");
            self.stats.record_allocation_failure();
            return Block::invalid();
        };

        let block = Block::new(self.chunks.chunk(index), size);
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the chunk was just taken off the list.
            unsafe { Block::new(block.as_ptr(), self.chunks.chunk_size()).fill(pattern) };
        }
        self.stats.record_allocation(self.chunks.chunk_size());
        block
    }

    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        let Some(index) = self.chunks.index_of(ptr) else {
            return false;
        };

        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the caller hands the whole chunk back.
            unsafe { Block::new(ptr, self.chunks.chunk_size()).fill(pattern) };
        }

        {
            let mut list = self.list.lock();
            if self.config.sorted_free {
                self.insert_sorted(&mut list, index);
            } else {
                // SAFETY: the released chunk is ours; the lock is held.
                unsafe { self.chunks.link(index).write(list.head) };
                list.head = index;
            }
            list.free += 1;
        }
        self.stats.record_deallocation(self.chunks.chunk_size());
        true
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.chunks.index_of(ptr).is_some()
    }
}

impl ChunkAllocator for LockingPoolAllocator {
    fn chunk_size(&self) -> usize {
        self.chunks.chunk_size()
    }

    fn chunk_align(&self) -> usize {
        self.chunks.chunk_align()
    }
}

impl Resettable for LockingPoolAllocator {
    unsafe fn reset(&self) {
        self.relink(&mut self.list.lock());
        self.stats.reset();
    }
}

impl MemoryUsage for LockingPoolAllocator {
    fn used_memory(&self) -> usize {
        self.allocated_chunks() * self.chunks.chunk_size()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.free_chunks() * self.chunks.chunk_size())
    }
}

impl StatisticsProvider for LockingPoolAllocator {
    fn statistics(&self) -> AllocatorStats {
        self.stats.snapshot().unwrap_or_default()
    }

    fn reset_statistics(&self) {
        self.stats.reset();
    }

    fn statistics_enabled(&self) -> bool {
        self.stats.is_enabled()
    }
}

impl AllocatorInternal for LockingPoolAllocator {
    fn internal_fragmentation(&self) -> FragmentationStats {
        let free = self.free_chunks();
        FragmentationStats {
            total_free: free * self.chunks.chunk_size(),
            largest_block: if free > 0 { self.chunks.chunk_size() } else { 0 },
            fragment_count: free,
            fragmentation_percent: 0,
        }
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        let list = self.list.lock();
        let mut index = list.head;
        let mut previous = None;
        let mut seen = 0;
        while index != NIL {
            if index >= self.chunk_count() {
                return Err("free list link out of range");
            }
            if self.config.sorted_free && previous.is_some_and(|p| p >= index) {
                return Err("free list not address ordered");
            }
            seen += 1;
            if seen > list.free {
                return Err("free list longer than free count");
            }
            previous = Some(index);
            // SAFETY: index was range checked; the lock is held.
            index = unsafe { self.chunks.link(index).read() };
        }
        if seen != list.free {
            return Err("free count does not match free list length");
        }
        Ok(())
    }
}

impl core::fmt::Debug for LockingPoolAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockingPoolAllocator")
            .field("chunk_size", &self.chunks.chunk_size())
            .field("chunk_count", &self.chunk_count())
            .field("sorted_free", &self.config.sorted_free)
            .finish()
    }
}
