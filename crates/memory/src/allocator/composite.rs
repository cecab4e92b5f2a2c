//! Allocators composed from two others
//!
//! - [`FallbackAllocator`] routes by success: the primary serves what it
//!   can, the fallback catches the rest.
//! - [`ThresholdAllocator`] routes by requested size alone.
//!
//! Both route deallocation by ownership, so the two halves must manage
//! disjoint memory.

#[cfg(feature = "logging")]
use tracing::trace;

use crate::allocator::sealed::{AllocatorInternal, FragmentationStats};
use crate::allocator::{Allocator, Block};

/// Tries `primary` first and `fallback` only when the primary fails.
///
/// # Examples
///
/// ```
/// use carve_memory::allocator::{Allocator, FallbackAllocator, LinearAllocator};
///
/// let small = LinearAllocator::new(64).unwrap();
/// let large = LinearAllocator::new(4096).unwrap();
/// let alloc = FallbackAllocator::new(small, large);
///
/// let a = alloc.allocate(48);
/// let b = alloc.allocate(48);
/// assert!(alloc.primary().contains(&a));
/// assert!(alloc.fallback().contains(&b));
/// ```
#[derive(Debug)]
pub struct FallbackAllocator<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Allocator, F: Allocator> FallbackAllocator<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    pub fn into_parts(self) -> (P, F) {
        (self.primary, self.fallback)
    }
}

// SAFETY: every block comes from one of the two halves, which manage
// disjoint memory and uphold the contract themselves.
unsafe impl<P: Allocator, F: Allocator> Allocator for FallbackAllocator<P, F> {
    fn allocate(&self, size: usize) -> Block {
        let block = self.primary.allocate(size);
        if block.is_valid() {
            return block;
        }
        #[cfg(feature = "logging")]
        trace!(size, "primary allocator exhausted, using fallback");
        self.fallback.allocate(size)
    }

    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        // SAFETY: forwarded to the caller; each half rejects foreign pointers.
        unsafe {
            if self.primary.contains_ptr(ptr) {
                self.primary.deallocate_ptr(ptr)
            } else {
                self.fallback.deallocate_ptr(ptr)
            }
        }
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.primary.contains_ptr(ptr) || self.fallback.contains_ptr(ptr)
    }
}

impl<P: AllocatorInternal, F: AllocatorInternal> AllocatorInternal for FallbackAllocator<P, F> {
    fn internal_fragmentation(&self) -> FragmentationStats {
        self.primary
            .internal_fragmentation()
            .combine(self.fallback.internal_fragmentation())
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        self.primary.internal_validate()?;
        self.fallback.internal_validate()
    }
}

/// Sends requests of at most `threshold` bytes to `primary` and larger ones
/// to `fallback`.
///
/// Routing is by size only: a small request that the primary cannot serve
/// fails rather than spilling into the fallback. Wrap the halves in a
/// [`FallbackAllocator`] when spilling is wanted.
#[derive(Debug)]
pub struct ThresholdAllocator<P, F> {
    primary: P,
    fallback: F,
    threshold: usize,
}

impl<P: Allocator, F: Allocator> ThresholdAllocator<P, F> {
    pub fn new(primary: P, fallback: F, threshold: usize) -> Self {
        Self {
            primary,
            fallback,
            threshold,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    pub fn into_parts(self) -> (P, F) {
        (self.primary, self.fallback)
    }
}

// SAFETY: see FallbackAllocator.
unsafe impl<P: Allocator, F: Allocator> Allocator for ThresholdAllocator<P, F> {
    fn allocate(&self, size: usize) -> Block {
        if size <= self.threshold {
            self.primary.allocate(size)
        } else {
            self.fallback.allocate(size)
        }
    }

    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        // SAFETY: forwarded to the caller; each half rejects foreign pointers.
        unsafe {
            if self.primary.contains_ptr(ptr) {
                self.primary.deallocate_ptr(ptr)
            } else {
                self.fallback.deallocate_ptr(ptr)
            }
        }
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.primary.contains_ptr(ptr) || self.fallback.contains_ptr(ptr)
    }
}

impl<P: AllocatorInternal, F: AllocatorInternal> AllocatorInternal for ThresholdAllocator<P, F> {
    fn internal_fragmentation(&self) -> FragmentationStats {
        self.primary
            .internal_fragmentation()
            .combine(self.fallback.internal_fragmentation())
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        self.primary.internal_validate()?;
        self.fallback.internal_validate()
    }
}
