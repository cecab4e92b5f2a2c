//! The allocator capability contract
//!
//! Every strategy in this crate implements [`Allocator`]: allocate a byte
//! count, hand back a [`Block`], take it back later. Composites and the
//! accumulating wrappers are written purely against this trait.
//!
//! # Safety
//!
//! `Allocator` is an `unsafe trait`. Implementors promise that:
//! - every valid block returned by `allocate` is writable for its full size,
//!   aligned to [`ALIGNMENT`], and disjoint from every other live block;
//! - a block stays valid until it is deallocated or the allocator is reset
//!   or dropped;
//! - `deallocate_ptr` returns `false` (and changes nothing) for pointers it
//!   does not own.
//!
//! Blanket impls for `&A`, `Box<A>` and `Arc<A>` forward every call, so the
//! contract is preserved through delegation.

use std::sync::Arc;

use super::{AllocError, AllocResult, Block};
use crate::utils::{ALIGNMENT, checked_align_up};

/// Uniform allocation interface over a fixed backing region.
///
/// Allocation failure is a value, not an error: `allocate` returns
/// [`Block::invalid`] when the request cannot be served, and
/// `deallocate_ptr` returns `false` for foreign pointers.
pub unsafe trait Allocator {
    /// Allocates at least `size` bytes aligned to [`ALIGNMENT`].
    ///
    /// Returns an invalid block for `size == 0` and on exhaustion.
    fn allocate(&self, size: usize) -> Block;

    /// Returns the allocation starting at `ptr` to the allocator.
    ///
    /// Returns `false` without touching anything when `ptr` is not owned by
    /// this allocator, which lets composites route by ownership.
    ///
    /// # Safety
    ///
    /// - `ptr` must be the start of a live block returned by this allocator,
    ///   or a pointer this allocator does not contain;
    /// - the block must not be used after this call.
    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool;

    /// True if `ptr` points into memory managed by this allocator.
    fn contains_ptr(&self, ptr: *const u8) -> bool;

    /// Deallocates `block` and invalidates it on success.
    ///
    /// # Safety
    ///
    /// Same as [`Allocator::deallocate_ptr`] for `block.as_ptr()`.
    unsafe fn deallocate(&self, block: &mut Block) -> bool {
        if !block.is_valid() {
            return false;
        }
        // SAFETY: caller's contract covers the block's start pointer.
        let released = unsafe { self.deallocate_ptr(block.as_ptr()) };
        if released {
            block.invalidate();
        }
        released
    }

    /// True if `block` was handed out by this allocator.
    fn contains(&self, block: &Block) -> bool {
        block.is_valid() && self.contains_ptr(block.as_ptr())
    }

    /// `allocate` mapped into a `Result` for `?`-style callers.
    fn try_allocate(&self, size: usize) -> AllocResult<Block> {
        let block = self.allocate(size);
        if block.is_valid() {
            Ok(block)
        } else {
            Err(AllocError::allocation_failed(size, ALIGNMENT))
        }
    }

    /// Allocates and zero-fills.
    fn allocate_zeroed(&self, size: usize) -> Block {
        let block = self.allocate(size);
        if block.is_valid() {
            // SAFETY: a valid block is writable for its full size.
            unsafe { block.zero() };
        }
        block
    }
}

/// Marker for allocators that can be shared across threads.
///
/// # Safety
///
/// Implementors must serialize or atomically order every state change.
pub unsafe trait ThreadSafeAllocator: Allocator + Send + Sync {}

// SAFETY: Send + Sync allocators in this crate guard their state with
// atomics or a mutex; the bound is what makes sharing sound.
unsafe impl<A: Allocator + Send + Sync + ?Sized> ThreadSafeAllocator for A {}

/// Allocators that own a backing block sized at construction.
///
/// The accumulating wrapper uses this to create new instances on demand.
pub trait BackedAllocator: Allocator + Sized {
    /// Creates an instance owning `capacity` bytes from the process allocator.
    fn with_capacity(capacity: usize) -> AllocResult<Self>;

    /// Size of the backing block in bytes.
    fn capacity(&self) -> usize;

    /// Smallest backing capacity that can serve one request of `size` bytes.
    fn required_capacity(size: usize) -> Option<usize> {
        checked_align_up(size, ALIGNMENT)
    }
}

// ============================================================================
// Blanket implementations
// ============================================================================

// SAFETY: pure delegation; the referent upholds the contract.
unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    #[inline]
    fn allocate(&self, size: usize) -> Block {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (**self).deallocate_ptr(ptr) }
    }

    #[inline]
    fn contains_ptr(&self, ptr: *const u8) -> bool {
        (**self).contains_ptr(ptr)
    }

    #[inline]
    unsafe fn deallocate(&self, block: &mut Block) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (**self).deallocate(block) }
    }
}

// SAFETY: pure delegation; the boxed value upholds the contract.
unsafe impl<A: Allocator + ?Sized> Allocator for Box<A> {
    #[inline]
    fn allocate(&self, size: usize) -> Block {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (**self).deallocate_ptr(ptr) }
    }

    #[inline]
    fn contains_ptr(&self, ptr: *const u8) -> bool {
        (**self).contains_ptr(ptr)
    }

    #[inline]
    unsafe fn deallocate(&self, block: &mut Block) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (**self).deallocate(block) }
    }
}

// SAFETY: pure delegation; the shared value upholds the contract.
unsafe impl<A: Allocator + ?Sized> Allocator for Arc<A> {
    #[inline]
    fn allocate(&self, size: usize) -> Block {
        (**self).allocate(size)
    }

    #[inline]
    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (**self).deallocate_ptr(ptr) }
    }

    #[inline]
    fn contains_ptr(&self, ptr: *const u8) -> bool {
        (**self).contains_ptr(ptr)
    }

    #[inline]
    unsafe fn deallocate(&self, block: &mut Block) -> bool {
        // SAFETY: forwarded to the caller.
        unsafe { (**self).deallocate(block) }
    }
}
