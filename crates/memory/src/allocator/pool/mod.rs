//! Fixed-chunk pool allocators
//!
//! The backing block is sliced into equally sized chunks. Free chunks form a
//! singly linked list threaded through the chunks themselves: the first word
//! of a free chunk holds the index of the next free chunk. Two flavours
//! share that layout:
//!
//! - [`PoolAllocator`] pops and pushes with compare-and-swap on a tagged
//!   head word (lock-free);
//! - [`LockingPoolAllocator`] keeps the same list under a mutex and can keep
//!   it address-ordered.

use core::alloc::Layout;
use core::ptr::NonNull;

mod allocator;
mod config;
mod locking;

pub use allocator::PoolAllocator;
pub use config::PoolConfig;
pub use locking::LockingPoolAllocator;

#[cfg(feature = "logging")]
use tracing::debug;

use crate::allocator::{AllocError, AllocResult, Allocator, BackingBlock, Block};
use crate::utils::{ALIGNMENT, align_up, is_power_of_two};

/// Index value marking the end of a free list.
pub(crate) const NIL: usize = u32::MAX as usize;

/// The chunked backing block shared by both pool flavours.
pub(crate) struct ChunkRegion {
    backing: BackingBlock,
    /// Aligned start, spanning exactly `chunk_size * chunk_count` bytes
    region: Block,
    chunk_size: usize,
    chunk_align: usize,
    chunk_count: usize,
}

impl ChunkRegion {
    /// Rounds `chunk_size` up so a chunk can hold the free-list link and
    /// every chunk start stays aligned.
    pub(crate) fn chunk_layout(chunk_size: usize, chunk_align: usize) -> AllocResult<(usize, usize)> {
        if chunk_size == 0 {
            return Err(AllocError::invalid_pool_config("chunk size must be non-zero"));
        }
        if !is_power_of_two(chunk_align) {
            return Err(AllocError::invalid_alignment(chunk_align));
        }
        let align = chunk_align.max(ALIGNMENT);
        let size = chunk_size
            .max(core::mem::size_of::<usize>())
            .checked_next_multiple_of(align)
            .ok_or_else(|| AllocError::size_overflow("pool chunk size"))?;
        Ok((size, align))
    }

    pub(crate) fn new(chunk_size: usize, chunk_align: usize, chunk_count: usize) -> AllocResult<Self> {
        let (size, align) = Self::chunk_layout(chunk_size, chunk_align)?;
        Self::check_count(chunk_count)?;
        let total = size
            .checked_mul(chunk_count)
            .ok_or_else(|| AllocError::size_overflow("pool capacity"))?;
        let backing = BackingBlock::allocate(total, align)?;
        Ok(Self::build(backing, size, align, chunk_count))
    }

    /// # Safety
    ///
    /// See [`BackingBlock::borrowed`].
    pub(crate) unsafe fn from_block(block: Block, chunk_size: usize, chunk_align: usize) -> AllocResult<Self> {
        let (size, align) = Self::chunk_layout(chunk_size, chunk_align)?;
        // SAFETY: forwarded to the caller.
        let backing = unsafe { BackingBlock::borrowed(block)? };
        let start = backing.as_ptr() as usize;
        let skip = align_up(start, align) - start;
        let count = backing.size().saturating_sub(skip) / size;
        Self::check_count(count)?;
        Ok(Self::build(backing, size, align, count))
    }

    fn check_count(count: usize) -> AllocResult<()> {
        if count == 0 {
            return Err(AllocError::invalid_pool_config("pool must hold at least one chunk"));
        }
        if count >= NIL {
            return Err(AllocError::allocation_too_large(count, NIL - 1));
        }
        Ok(())
    }

    fn build(backing: BackingBlock, chunk_size: usize, chunk_align: usize, chunk_count: usize) -> Self {
        let start = backing.as_ptr() as usize;
        let skip = align_up(start, chunk_align) - start;
        // SAFETY: skip + chunk_size * chunk_count <= backing size (checked by
        // the callers), so the offset stays inside the backing allocation.
        let base = unsafe { backing.as_ptr().add(skip) };

        #[cfg(feature = "logging")]
        debug!(
            chunk_size,
            chunk_align,
            chunk_count,
            owned = backing.is_owned(),
            "created chunk region"
        );

        Self {
            region: Block::new(base, chunk_size * chunk_count),
            backing,
            chunk_size,
            chunk_align,
            chunk_count,
        }
    }

    #[inline]
    pub(crate) fn chunk(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.chunk_count);
        // SAFETY: index < chunk_count keeps the offset inside the region.
        unsafe { self.region.as_ptr().add(index * self.chunk_size) }
    }

    /// Pointer to the free-list link stored in the first word of a chunk.
    #[inline]
    pub(crate) fn link(&self, index: usize) -> *mut usize {
        self.chunk(index).cast::<usize>()
    }

    /// Chunk index of `ptr` when it is the start of a chunk in this region.
    #[inline]
    pub(crate) fn index_of(&self, ptr: *const u8) -> Option<usize> {
        if !self.region.contains_ptr(ptr) {
            return None;
        }
        let offset = ptr as usize - self.region.as_ptr() as usize;
        offset
            .is_multiple_of(self.chunk_size)
            .then_some(offset / self.chunk_size)
    }

    #[inline]
    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub(crate) fn chunk_align(&self) -> usize {
        self.chunk_align
    }

    #[inline]
    pub(crate) fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[inline]
    pub(crate) fn is_owned(&self) -> bool {
        self.backing.is_owned()
    }
}

/// Typed construction on top of a fixed-chunk allocator.
///
/// Every chunk can hold one `T` whose size and alignment fit the pool's
/// chunk layout.
pub trait ChunkAllocator: Allocator {
    /// Bytes per chunk.
    fn chunk_size(&self) -> usize;

    /// Alignment of every chunk start.
    fn chunk_align(&self) -> usize;

    /// True if a `T` fits in one chunk.
    fn fits<T>(&self) -> bool {
        let layout = Layout::new::<T>();
        layout.size() <= self.chunk_size() && layout.align() <= self.chunk_align()
    }

    /// Moves `value` into a fresh chunk.
    fn create<T>(&self, value: T) -> AllocResult<NonNull<T>> {
        if !self.fits::<T>() {
            return Err(AllocError::invalid_layout("type does not fit the pool chunk"));
        }
        let block = self.allocate(self.chunk_size());
        let ptr = block
            .as_non_null()
            .ok_or_else(|| AllocError::pool_exhausted(core::any::type_name::<T>(), self.chunk_size()))?
            .cast::<T>();
        // SAFETY: the chunk is exclusively ours, large and aligned enough for T.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Drops the value at `ptr` and returns its chunk.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`ChunkAllocator::create`] on this allocator and
    /// must not be used afterwards.
    unsafe fn destroy<T>(&self, ptr: NonNull<T>) -> bool {
        if !self.contains_ptr(ptr.as_ptr().cast()) {
            return false;
        }
        // SAFETY: the caller guarantees ptr holds a live T created here.
        unsafe {
            core::ptr::drop_in_place(ptr.as_ptr());
            self.deallocate_ptr(ptr.as_ptr().cast())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_layout_rounds_up() {
        assert_eq!(ChunkRegion::chunk_layout(1, 1).expect("layout"), (8, 8));
        assert_eq!(ChunkRegion::chunk_layout(24, 8).expect("layout"), (24, 8));
        assert_eq!(ChunkRegion::chunk_layout(20, 16).expect("layout"), (32, 16));
        assert!(ChunkRegion::chunk_layout(0, 8).is_err());
        assert!(ChunkRegion::chunk_layout(8, 3).is_err());
    }

    #[test]
    fn index_of_requires_chunk_start() {
        let region = ChunkRegion::new(16, 8, 4).expect("region");
        let base = region.chunk(0);
        assert_eq!(region.index_of(base), Some(0));
        // SAFETY: offsets stay within the region or one past it.
        unsafe {
            assert_eq!(region.index_of(base.add(32)), Some(2));
            assert_eq!(region.index_of(base.add(8)), None);
            assert_eq!(region.index_of(base.add(64)), None);
        }
    }

    #[test]
    fn borrowed_region_counts_whole_chunks() {
        let mut buf = [0u64; 10];
        let block = Block::new(buf.as_mut_ptr().cast(), 80);
        // SAFETY: `buf` outlives the region.
        let region = unsafe { ChunkRegion::from_block(block, 24, 8) }.expect("region");
        assert_eq!(region.chunk_count(), 3);
        assert!(!region.is_owned());
    }
}
