//! Lock-free pool allocator
//!
//! # Safety
//!
//! - Free chunks form an intrusive singly linked list of chunk indices.
//! - The list head is one `AtomicU64` packing `(index, tag)`; every
//!   successful push or pop bumps the tag, so a head that was popped and
//!   pushed back between a load and a CAS no longer compares equal (ABA).
//! - The link inside a free chunk is read atomically; a racing pop may read
//!   a link that is already stale, but then its CAS fails on the tag.
//! - Deallocation validates the pointer (in range and on a chunk boundary).

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(feature = "logging")]
use tracing::trace;

use super::{ChunkAllocator, ChunkRegion, NIL, PoolConfig};
use crate::allocator::sealed::{AllocatorInternal, FragmentationStats};
use crate::allocator::{
    AllocResult, Allocator, AllocatorStats, Block, MemoryUsage, OptionalStats, Resettable,
    StatisticsProvider,
};
use crate::utils::Backoff;

#[inline]
const fn pack(index: usize, tag: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

#[inline]
const fn unpack(word: u64) -> (usize, u32) {
    ((word & 0xFFFF_FFFF) as usize, (word >> 32) as u32)
}

/// Lock-free pool of fixed-size chunks
///
/// # Memory Layout
/// ```text
/// [Chunk0][Chunk1][Chunk2][Chunk3]...[ChunkN]
///    ↓       ↓               ↓
///  [free] → [free] → ... → [free] → NIL
/// ```
///
/// # Examples
///
/// ```
/// use carve_memory::allocator::{Allocator, ChunkAllocator, PoolAllocator};
///
/// let pool = PoolAllocator::for_type::<[u64; 4]>(8).unwrap();
/// let value = pool.create([1u64, 2, 3, 4]).unwrap();
/// assert_eq!(unsafe { value.as_ref() }[2], 3);
/// assert!(unsafe { pool.destroy(value) });
/// ```
pub struct PoolAllocator {
    chunks: ChunkRegion,
    /// `(index, tag)` of the first free chunk
    head: AtomicU64,
    free_count: AtomicUsize,
    config: PoolConfig,
    stats: OptionalStats,
}

impl PoolAllocator {
    /// Creates a pool of `chunk_count` chunks of at least `chunk_size` bytes.
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

    /// Creates a pool whose chunks hold one `T` each.
    pub fn for_type<T>(chunk_count: usize) -> AllocResult<Self> {
        Self::for_type_with_config::<T>(chunk_count, PoolConfig::default())
    }

    pub fn for_type_with_config<T>(chunk_count: usize, config: PoolConfig) -> AllocResult<Self> {
        Self::with_config(
            core::mem::size_of::<T>(),
            core::mem::align_of::<T>(),
            chunk_count,
            config,
        )
    }

    /// Slices caller-provided memory into as many chunks as fit.
    ///
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
            head: AtomicU64::new(pack(NIL, 0)),
            free_count: AtomicUsize::new(0),
            config,
        };
        pool.link_all_chunks(0);
        pool
    }

    /// Links every chunk in ascending order and publishes the list.
    fn link_all_chunks(&self, tag: u32) {
        let count = self.chunks.chunk_count();
        for index in 0..count {
            let next = if index + 1 < count { index + 1 } else { NIL };
            // SAFETY: index < chunk_count and every chunk is at least one
            // aligned word; no chunk is handed out while we relink.
            unsafe { self.link(index).store(next, Ordering::Relaxed) };
        }
        self.free_count.store(count, Ordering::Relaxed);
        self.head.store(pack(0, tag), Ordering::Release);
    }

    /// # Safety
    ///
    /// `index` must be a chunk index of this pool.
    #[inline]
    unsafe fn link(&self, index: usize) -> &AtomicUsize {
        // SAFETY: the link word is aligned and lives as long as the region.
        unsafe { &*self.chunks.link(index).cast::<AtomicUsize>() }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.chunk_count()
    }

    pub fn capacity(&self) -> usize {
        self.chunks.chunk_size() * self.chunks.chunk_count()
    }

    /// Free chunks (exact in the absence of races)
    pub fn free_chunks(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }

    pub fn allocated_chunks(&self) -> usize {
        self.chunk_count() - self.free_chunks()
    }

    pub fn is_full(&self) -> bool {
        unpack(self.head.load(Ordering::Acquire)).0 == NIL
    }

    pub fn owns_backing(&self) -> bool {
        self.chunks.is_owned()
    }

    fn pop(&self) -> Option<usize> {
        let mut backoff = self.config.use_backoff.then(Backoff::new);

        loop {
            let word = self.head.load(Ordering::Acquire);
            let (index, tag) = unpack(word);
            if index == NIL {
                return None;
            }

            // SAFETY: index came from the list, so it names a chunk of ours.
            let next = unsafe { self.link(index).load(Ordering::Relaxed) };
            if self
                .head
                .compare_exchange_weak(word, pack(next, tag.wrapping_add(1)), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.free_count.fetch_sub(1, Ordering::Relaxed);
                return Some(index);
            }

            if let Some(ref mut b) = backoff {
                b.spin();
            }
        }
    }

    fn push(&self, index: usize) {
        let mut backoff = self.config.use_backoff.then(Backoff::new);

        loop {
            let word = self.head.load(Ordering::Acquire);
            let (head, tag) = unpack(word);
            // SAFETY: the chunk is being released by its sole owner.
            unsafe { self.link(index).store(head, Ordering::Relaxed) };

            if self
                .head
                .compare_exchange_weak(word, pack(index, tag.wrapping_add(1)), Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.free_count.fetch_add(1, Ordering::Relaxed);
                return;
            }

            if let Some(ref mut b) = backoff {
                b.spin();
            }
        }
    }
}

// SAFETY: chunks are handed out by a successful CAS pop, so no two callers
// own the same chunk; every chunk is aligned to chunk_align >= ALIGNMENT.
unsafe impl Allocator for PoolAllocator {
    fn allocate(&self, size: usize) -> Block {
        if size == 0 || size > self.chunks.chunk_size() {
            return Block::invalid();
        }

        let Some(index) = self.pop() else {
            #[cfg(feature = "logging")]
            trace!(chunk_size = self.chunks.chunk_size(), "pool exhausted");
            self.stats.record_allocation_failure();
            return Block::invalid();
        };

        let block = Block::new(self.chunks.chunk(index), size);
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the chunk was just popped and is exclusively ours.
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
        self.push(index);
        self.stats.record_deallocation(self.chunks.chunk_size());
        true
    }

    /// In range and on a chunk boundary.
    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.chunks.index_of(ptr).is_some()
    }
}

impl ChunkAllocator for PoolAllocator {
    fn chunk_size(&self) -> usize {
        self.chunks.chunk_size()
    }

    fn chunk_align(&self) -> usize {
        self.chunks.chunk_align()
    }
}

impl Resettable for PoolAllocator {
    unsafe fn reset(&self) {
        let (_, tag) = unpack(self.head.load(Ordering::Acquire));
        self.link_all_chunks(tag.wrapping_add(1));
        self.stats.reset();
    }
}

impl MemoryUsage for PoolAllocator {
    fn used_memory(&self) -> usize {
        self.allocated_chunks() * self.chunks.chunk_size()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.free_chunks() * self.chunks.chunk_size())
    }
}

impl StatisticsProvider for PoolAllocator {
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

impl AllocatorInternal for PoolAllocator {
    fn internal_fragmentation(&self) -> FragmentationStats {
        let free = self.free_chunks();
        let largest = if free > 0 { self.chunks.chunk_size() } else { 0 };
        FragmentationStats {
            total_free: free * self.chunks.chunk_size(),
            largest_block: largest,
            fragment_count: free,
            fragmentation_percent: 0,
        }
    }

    /// Walks the free list; only meaningful while no other thread mutates it.
    fn internal_validate(&self) -> Result<(), &'static str> {
        let (mut index, _) = unpack(self.head.load(Ordering::Acquire));
        let mut seen = 0;
        while index != NIL {
            if index >= self.chunk_count() {
                return Err("free list link out of range");
            }
            seen += 1;
            if seen > self.chunk_count() {
                return Err("free list contains a cycle");
            }
            // SAFETY: index was range checked above.
            index = unsafe { self.link(index).load(Ordering::Relaxed) };
        }
        if seen != self.free_chunks() {
            return Err("free count does not match free list length");
        }
        Ok(())
    }
}

impl core::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("chunk_size", &self.chunks.chunk_size())
            .field("chunk_count", &self.chunk_count())
            .field("free", &self.free_chunks())
            .finish()
    }
}
