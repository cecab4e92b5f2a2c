//! Backing store shared by every strategy
//!
//! A `BackingBlock` is the single byte range an allocator carves from. It is
//! either owned (acquired from the process allocator, released on drop) or
//! borrowed from the caller (never released). Ownership is fixed at
//! construction.

use core::alloc::Layout;
use core::fmt;

#[cfg(feature = "logging")]
use tracing::trace;

use super::{AllocError, AllocResult, Block};
use crate::utils::{ALIGNMENT, align_up, is_power_of_two};

/// Fixed byte range owned or borrowed by an allocator.
pub struct BackingBlock {
    block: Block,
    /// `Some` when the range came from the process allocator.
    layout: Option<Layout>,
}

// SAFETY: a BackingBlock is the exclusive handle to its byte range (owned,
// or borrowed under the caller's exclusivity promise). Moving it to another
// thread moves that exclusive access.
unsafe impl Send for BackingBlock {}
// SAFETY: &BackingBlock only exposes the range bounds; writes into the range
// go through the owning allocator's synchronization.
unsafe impl Sync for BackingBlock {}

impl BackingBlock {
    /// Acquires `size` bytes aligned to `align` from the process allocator.
    pub fn allocate(size: usize, align: usize) -> AllocResult<Self> {
        if size == 0 {
            return Err(AllocError::invalid_layout("backing block size must be non-zero"));
        }
        if !is_power_of_two(align) {
            return Err(AllocError::invalid_alignment(align));
        }
        let layout = Layout::from_size_align(size, align.max(ALIGNMENT))
            .map_err(|_| AllocError::size_overflow("backing block layout"))?;

        // SAFETY: layout has a non-zero size (checked above).
        let ptr = unsafe { std::alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(AllocError::allocation_failed_with_layout(layout));
        }

        #[cfg(feature = "logging")]
        trace!(size, align = layout.align(), "acquired backing block");

        Ok(Self {
            block: Block::new(ptr, size),
            layout: Some(layout),
        })
    }

    /// Wraps a caller-supplied range without taking ownership.
    ///
    /// # Safety
    ///
    /// - `block` must be valid for reads and writes over its full size;
    /// - nothing else may access the range while this value (and any
    ///   allocator built on it) is alive.
    pub unsafe fn borrowed(block: Block) -> AllocResult<Self> {
        if !block.is_valid() {
            return Err(AllocError::invalid_layout("borrowed backing block is invalid"));
        }
        Ok(Self {
            block,
            layout: None,
        })
    }

    #[inline]
    pub fn block(&self) -> Block {
        self.block
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.block.as_ptr()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.block.size()
    }

    /// True if the range came from the process allocator.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.layout.is_some()
    }

    #[inline]
    pub fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.block.contains_ptr(ptr)
    }

    /// The largest sub-range whose start is aligned to `align` and whose
    /// length is a multiple of [`ALIGNMENT`].
    ///
    /// Borrowed ranges may start anywhere; owned ones are already aligned.
    pub fn aligned_region(&self, align: usize) -> Option<Block> {
        let start = self.as_ptr() as usize;
        let aligned = align_up(start, align);
        let skip = aligned - start;
        let len = self.size().checked_sub(skip)? & !(ALIGNMENT - 1);
        if len == 0 {
            return None;
        }
        // SAFETY: skip < size, so the offset stays inside the range and keeps
        // the original provenance.
        Some(Block::new(unsafe { self.as_ptr().add(skip) }, len))
    }
}

impl Drop for BackingBlock {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: the pointer was returned by `std::alloc::alloc` with
            // exactly this layout and is released only here.
            unsafe { std::alloc::dealloc(self.block.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for BackingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingBlock")
            .field("ptr", &self.block.as_ptr())
            .field("size", &self.block.size())
            .field("owned", &self.is_owned())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_block_is_aligned() {
        let backing = BackingBlock::allocate(256, 64).expect("backing block");
        assert!(backing.is_owned());
        assert_eq!(backing.as_ptr() as usize % 64, 0);
        assert_eq!(backing.size(), 256);
    }

    #[test]
    fn rejects_zero_and_bad_alignment() {
        assert!(BackingBlock::allocate(0, 8).is_err());
        assert!(BackingBlock::allocate(64, 12).is_err());
    }

    #[test]
    fn borrowed_block_is_not_owned() {
        let mut buf = [0u64; 8];
        let block = Block::new(buf.as_mut_ptr().cast(), 64);
        // SAFETY: `buf` outlives the backing block and is not touched meanwhile.
        let backing = unsafe { BackingBlock::borrowed(block) }.expect("borrowed");
        assert!(!backing.is_owned());
        assert_eq!(backing.aligned_region(8), Some(block));
    }

    #[test]
    fn aligned_region_skips_misaligned_prefix() {
        let mut buf = [0u64; 8];
        // SAFETY: offset 3 is inside `buf`.
        let block = Block::new(unsafe { buf.as_mut_ptr().cast::<u8>().add(3) }, 61);
        // SAFETY: `buf` outlives the backing block.
        let backing = unsafe { BackingBlock::borrowed(block) }.expect("borrowed");
        let region = backing.aligned_region(8).expect("region");
        assert_eq!(region.as_ptr() as usize % 8, 0);
        assert_eq!(region.size(), 56);
    }
}
