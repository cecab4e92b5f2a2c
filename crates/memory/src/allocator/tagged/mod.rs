//! Boundary-tag allocators
//!
//! One engine, four free-space indexes. [`TaggedAllocator`] owns the
//! backing block, writes the boundary tags, splits blocks on allocation and
//! coalesces them with both physical neighbours on deallocation. Which free
//! block serves a request is the job of the [`FreeIndex`]:
//!
//! | alias                       | index                | search             |
//! |-----------------------------|----------------------|--------------------|
//! | [`ImplicitListAllocator`]   | [`ImplicitIndex`]    | walk every block   |
//! | [`ExplicitListAllocator`]   | [`ExplicitIndex`]    | walk free blocks   |
//! | [`SegregatedListAllocator`] | [`SegregatedIndex`]  | one size class     |
//! | [`RedBlackTreeAllocator`]   | [`RedBlackIndex`]    | O(log n) by size   |
//!
//! # Safety
//!
//! - Every block carries identical header and footer tags, written on every
//!   state change, so the predecessor is always reachable through its footer.
//! - No two free blocks are ever physically adjacent after a call returns.
//! - Index nodes live in the payload of free blocks only; the engine touches
//!   them only for blocks whose allocated bit is clear.
//! - All structural changes happen under one mutex per allocator.

use core::fmt;

use parking_lot::Mutex;

mod config;
mod explicit;
mod heap;
mod implicit;
mod margin;
mod rbtree;
mod segregated;

pub use config::{FitPolicy, ListConfig};
pub use explicit::ExplicitIndex;
pub use heap::{Blocks, Heap};
pub use implicit::ImplicitIndex;
pub use margin::{Margin, TAG_OVERHEAD, TAG_SIZE};
pub use rbtree::RedBlackIndex;
pub use segregated::{SegregatedIndex, request_class};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

use crate::allocator::sealed::{AllocatorInternal, FragmentationStats};
use crate::allocator::{
    AllocError, AllocResult, Allocator, AllocatorStats, BackedAllocator, BackingBlock, Block,
    MemoryUsage, OptionalStats, Resettable, StatisticsProvider,
};
use crate::utils::{ALIGNMENT, align_up, checked_align_up};

/// Implicit free list: every block is visited on allocation.
pub type ImplicitListAllocator = TaggedAllocator<ImplicitIndex>;
/// Explicit free list: free blocks linked in address order.
pub type ExplicitListAllocator = TaggedAllocator<ExplicitIndex>;
/// Segregated explicit lists by payload size class.
pub type SegregatedListAllocator = TaggedAllocator<SegregatedIndex>;
/// Free blocks in a red-black tree keyed by size.
pub type RedBlackTreeAllocator = TaggedAllocator<RedBlackIndex>;

/// Free-space index plugged into [`TaggedAllocator`]
///
/// Blocks are addressed by their header pointer. All methods run under the
/// allocator's lock.
///
/// # Safety
///
/// Implementations may only write inside the payload of blocks they were
/// given through `insert` and have not yet been asked to `remove`.
pub unsafe trait FreeIndex: Send {
    /// Payload bytes a free block must offer to hold the index node.
    const NODE_SIZE: usize;

    /// Creates an empty index.
    fn new() -> Self;

    /// Adds a free block (tags already written).
    ///
    /// # Safety
    ///
    /// `block` must be a free block of `heap` that is not in the index.
    unsafe fn insert(&mut self, heap: &Heap, block: *mut u8);

    /// Removes a block previously inserted.
    ///
    /// # Safety
    ///
    /// `block` must currently be in the index, with unchanged tags.
    unsafe fn remove(&mut self, heap: &Heap, block: *mut u8);

    /// Finds a free block of at least `size` bytes (tags included).
    ///
    /// # Safety
    ///
    /// The heap and index must be consistent.
    unsafe fn find(&self, heap: &Heap, size: usize, config: &ListConfig) -> Option<*mut u8>;

    /// Forgets every block (the heap is about to be re-initialized).
    fn clear(&mut self);

    /// Checks the index structure and that it holds exactly `free_blocks`
    /// blocks, all of them free.
    ///
    /// # Safety
    ///
    /// The heap must be well formed.
    unsafe fn validate(&self, heap: &Heap, free_blocks: usize) -> Result<(), &'static str>;
}

/// Boundary-tag allocator over one backing block, generic over its free index.
///
/// # Examples
///
/// ```
/// use carve_memory::allocator::{Allocator, RedBlackTreeAllocator};
///
/// let tree = RedBlackTreeAllocator::new(4096).unwrap();
/// let _a = tree.allocate(100);
/// let mut b = tree.allocate(200);
/// let _c = tree.allocate(50);
///
/// let hole = b.as_ptr();
/// unsafe { tree.deallocate(&mut b) };
/// assert_eq!(tree.allocate(150).as_ptr(), hole);
/// ```
pub struct TaggedAllocator<I: FreeIndex> {
    backing: BackingBlock,
    heap: Heap,
    index: Mutex<I>,
    config: ListConfig,
    stats: OptionalStats,
}

impl<I: FreeIndex> TaggedAllocator<I> {
    /// Smallest block the engine creates: tags plus room for an index node.
    pub const MIN_BLOCK: usize = align_up(I::NODE_SIZE, ALIGNMENT) + TAG_OVERHEAD;

    /// Creates an allocator owning `capacity` bytes.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        Self::with_config(capacity, ListConfig::default())
    }

    pub fn with_config(capacity: usize, config: ListConfig) -> AllocResult<Self> {
        let backing = BackingBlock::allocate(capacity, ALIGNMENT)?;
        Self::from_backing(backing, config)
    }

    /// Creates an allocator over caller-provided memory.
    ///
    /// # Safety
    ///
    /// See [`BackingBlock::borrowed`].
    pub unsafe fn from_block(block: Block, config: ListConfig) -> AllocResult<Self> {
        // SAFETY: forwarded to the caller.
        let backing = unsafe { BackingBlock::borrowed(block)? };
        Self::from_backing(backing, config)
    }

    fn from_backing(backing: BackingBlock, config: ListConfig) -> AllocResult<Self> {
        config.validate()?;
        let region = backing
            .aligned_region(ALIGNMENT)
            .filter(|region| region.size() >= Self::MIN_BLOCK)
            .ok_or_else(|| AllocError::allocation_too_large(Self::MIN_BLOCK, backing.size()))?;

        // SAFETY: the region is word aligned, word sized and owned by `backing`,
        // which lives as long as the heap.
        let heap = unsafe { Heap::new(region.as_ptr(), region.size()) };

        #[cfg(feature = "logging")]
        debug!(
            strategy = core::any::type_name::<I>(),
            capacity = heap.len(),
            fit = %config.fit,
            owned = backing.is_owned(),
            "created boundary-tag allocator"
        );

        let allocator = Self {
            stats: OptionalStats::new(config.track_stats),
            backing,
            heap,
            index: Mutex::new(I::new()),
            config,
        };
        allocator.format(&mut allocator.index.lock());
        Ok(allocator)
    }

    /// Turns the whole heap into one free block.
    fn format(&self, index: &mut I) {
        index.clear();
        // SAFETY: the heap spans exactly one block of its full length, and we
        // hold the lock.
        unsafe {
            self.heap.set_tags(self.heap.start(), Margin::free(self.heap.len()));
            index.insert(&self.heap, self.heap.start());
        }
    }

    /// Total block size (tags included) serving a request of `size` bytes.
    pub fn block_size_for(size: usize) -> Option<usize> {
        if size == 0 {
            return None;
        }
        checked_align_up(size.max(I::NODE_SIZE), ALIGNMENT)?.checked_add(TAG_OVERHEAD)
    }

    /// Bytes under management (the aligned part of the backing block).
    pub fn capacity(&self) -> usize {
        self.heap.len()
    }

    pub fn config(&self) -> &ListConfig {
        &self.config
    }

    pub fn owns_backing(&self) -> bool {
        self.backing.is_owned()
    }

    /// Boundary tags of every block in address order (diagnostics).
    pub fn block_map(&self) -> Vec<Margin> {
        let _index = self.index.lock();
        // SAFETY: the lock keeps the heap well formed during the walk.
        unsafe { self.heap.blocks().map(|(_, tag)| tag).collect() }
    }

    /// Splits `block` (already removed from the index) so that it holds
    /// exactly `needed` bytes when the remainder can form a block.
    ///
    /// # Safety
    ///
    /// Lock held; `block` is a free block of at least `needed` bytes that is
    /// no longer in the index.
    unsafe fn carve(&self, index: &mut I, block: *mut u8, needed: usize) -> usize {
        // SAFETY: forwarded to the caller.
        unsafe {
            let total = self.heap.header(block).size();
            debug_assert!(total >= needed);
            if total - needed >= Self::MIN_BLOCK {
                self.heap.set_tags(block, Margin::allocated(needed));
                let rest = block.add(needed);
                self.heap.set_tags(rest, Margin::free(total - needed));
                index.insert(&self.heap, rest);
                needed
            } else {
                self.heap.set_tags(block, Margin::allocated(total));
                total
            }
        }
    }

    /// Merges a block being freed with free neighbours and indexes the result.
    ///
    /// # Safety
    ///
    /// Lock held; `block` is an allocated block of this heap.
    unsafe fn release(&self, index: &mut I, block: *mut u8) {
        // SAFETY: forwarded to the caller; neighbours are reached through
        // well-formed tags and are removed from the index before merging.
        unsafe {
            let mut start = block;
            let mut size = self.heap.header(block).size();

            if let Some(next) = self.heap.next(block) {
                let tag = self.heap.header(next);
                if tag.is_free() {
                    index.remove(&self.heap, next);
                    size += tag.size();
                }
            }

            if let Some(prev) = self.heap.prev(block) {
                let tag = self.heap.header(prev);
                if tag.is_free() {
                    index.remove(&self.heap, prev);
                    start = prev;
                    size += tag.size();
                }
            }

            self.heap.set_tags(start, Margin::free(size));
            index.insert(&self.heap, start);
        }
    }
}

// SAFETY: a block is removed from the index and tagged allocated under the
// lock before its payload is handed out, so live blocks never overlap; block
// starts and sizes are word multiples from a word-aligned heap, so payloads
// are word aligned.
unsafe impl<I: FreeIndex> Allocator for TaggedAllocator<I> {
    fn allocate(&self, size: usize) -> Block {
        let Some(needed) = Self::block_size_for(size) else {
            return Block::invalid();
        };

        let carved = {
            let mut index = self.index.lock();
            // SAFETY: lock held; heap and index are consistent between calls.
            unsafe {
                index.find(&self.heap, needed, &self.config).map(|block| {
                    index.remove(&self.heap, block);
                    (block, self.carve(&mut index, block, needed))
                })
            }
        };

        let Some((block, block_size)) = carved else {
            #[cfg(feature = "logging")]
            trace!(size, needed, "no free block large enough");
            self.stats.record_allocation_failure();
            return Block::invalid();
        };

        let payload = Heap::payload(block);
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: the payload is exclusively ours now.
            unsafe { Block::new(payload, block_size - TAG_OVERHEAD).fill(pattern) };
        }
        self.stats.record_allocation(block_size - TAG_OVERHEAD);
        Block::new(payload, size)
    }

    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        if !self.heap.is_payload_candidate(ptr) {
            return false;
        }
        let block = Heap::block_of(ptr);

        let mut index = self.index.lock();
        // SAFETY: block is an in-bounds word; the check reads tags only.
        if !unsafe { self.heap.looks_allocated(block) } {
            drop(index);
            #[cfg(feature = "logging")]
            warn!(?ptr, "deallocating a pointer that is not an allocated block");
            return false;
        }

        // SAFETY: the block is allocated and ours; lock held.
        let released = unsafe {
            let tag = self.heap.header(block);
            if let Some(pattern) = self.config.dealloc_pattern {
                Block::new(ptr, tag.payload_size()).fill(pattern);
            }
            self.release(&mut index, block);
            tag.payload_size()
        };
        drop(index);

        self.stats.record_deallocation(released);
        true
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.heap.contains(ptr)
    }
}

impl<I: FreeIndex> Resettable for TaggedAllocator<I> {
    unsafe fn reset(&self) {
        self.format(&mut self.index.lock());
        self.stats.reset();
    }
}

impl<I: FreeIndex> MemoryUsage for TaggedAllocator<I> {
    /// Bytes in allocated blocks, tags included.
    fn used_memory(&self) -> usize {
        let _index = self.index.lock();
        // SAFETY: the lock keeps the heap well formed during the walk.
        unsafe {
            self.heap
                .blocks()
                .filter(|(_, tag)| tag.is_allocated())
                .map(|(_, tag)| tag.size())
                .sum()
        }
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.capacity() - self.used_memory())
    }
}

impl<I: FreeIndex> StatisticsProvider for TaggedAllocator<I> {
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

impl<I: FreeIndex> BackedAllocator for TaggedAllocator<I> {
    fn with_capacity(capacity: usize) -> AllocResult<Self> {
        Self::new(capacity)
    }

    fn capacity(&self) -> usize {
        self.capacity()
    }

    fn required_capacity(size: usize) -> Option<usize> {
        Self::block_size_for(size).map(|needed| needed.max(Self::MIN_BLOCK))
    }
}

impl<I: FreeIndex> AllocatorInternal for TaggedAllocator<I> {
    fn internal_fragmentation(&self) -> FragmentationStats {
        let _index = self.index.lock();
        let (mut total, mut largest, mut count) = (0, 0, 0);
        // SAFETY: the lock keeps the heap well formed during the walk.
        for (_, tag) in unsafe { self.heap.blocks() } {
            if tag.is_free() {
                total += tag.payload_size();
                largest = largest.max(tag.payload_size());
                count += 1;
            }
        }
        FragmentationStats::calculate(total, largest, count)
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        let index = self.index.lock();
        let mut covered = 0;
        let mut free_blocks = 0;
        let mut previous_free = false;

        // SAFETY: the lock keeps the heap stable; every tag is bounds checked
        // before the next step relies on it.
        unsafe {
            for (block, tag) in self.heap.blocks() {
                let size = tag.size();
                if size < TAG_OVERHEAD || size % ALIGNMENT != 0 {
                    return Err("block size is not a positive word multiple");
                }
                if block as usize + size > self.heap.start() as usize + self.heap.len() {
                    return Err("block runs past the end of the heap");
                }
                if self.heap.footer(block) != tag {
                    return Err("header and footer differ");
                }
                if tag.is_free() {
                    if previous_free {
                        return Err("two adjacent free blocks");
                    }
                    if size < Self::MIN_BLOCK {
                        return Err("free block too small for an index node");
                    }
                    free_blocks += 1;
                }
                previous_free = tag.is_free();
                covered += size;
            }
            if covered != self.heap.len() {
                return Err("blocks do not tile the heap");
            }
            index.validate(&self.heap, free_blocks)
        }
    }
}

impl<I: FreeIndex> fmt::Debug for TaggedAllocator<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedAllocator")
            .field("index", &core::any::type_name::<I>())
            .field("capacity", &self.capacity())
            .field("fit", &self.config.fit)
            .field("owned", &self.backing.is_owned())
            .finish()
    }
}
