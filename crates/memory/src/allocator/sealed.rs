//! Sealed inspection contract for the allocators of this crate
//!
//! External crates can use [`AllocatorInternal`] as a bound and call its
//! methods, but cannot implement it. Tests and diagnostics use it to look at
//! free-space layout and to check structural invariants (boundary-tag
//! symmetry, coalescing, red-black properties) without reaching into private
//! fields.

use core::fmt;

use crate::allocator::Allocator;

mod private {
    /// Private sealing trait
    pub trait Sealed {}

    impl Sealed for crate::allocator::LinearAllocator {}
    impl Sealed for crate::allocator::PoolAllocator {}
    impl Sealed for crate::allocator::LockingPoolAllocator {}
    impl<I: crate::allocator::tagged::FreeIndex> Sealed for crate::allocator::tagged::TaggedAllocator<I> {}
    impl<P, F> Sealed for crate::allocator::FallbackAllocator<P, F> {}
    impl<P, F> Sealed for crate::allocator::ThresholdAllocator<P, F> {}
    impl<A: crate::allocator::BackedAllocator> Sealed for crate::allocator::AccumulatingAllocator<A> {}
    impl<T> Sealed for crate::allocator::AccumulatingPool<T> {}

    impl<T: ?Sized + Sealed> Sealed for &T {}
}

// ============================================================================
// Fragmentation Statistics
// ============================================================================

/// Free-space layout of an allocator
///
/// Sizes are in payload bytes, i.e. what a caller could actually request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentationStats {
    /// Total free payload bytes across all fragments
    pub total_free: usize,

    /// Largest single request that would currently succeed
    pub largest_block: usize,

    /// Number of distinct free fragments
    pub fragment_count: usize,

    /// External fragmentation ratio (0-100): `100 * (1 - largest / total)`
    pub fragmentation_percent: u8,
}

impl FragmentationStats {
    /// Calculate fragmentation percentage from free space metrics
    pub fn calculate(total_free: usize, largest_block: usize, fragment_count: usize) -> Self {
        let fragmentation_percent = if total_free > 0 {
            let ratio = 1.0 - (largest_block as f64 / total_free as f64);
            (ratio * 100.0).clamp(0.0, 100.0) as u8
        } else {
            0
        };

        Self {
            total_free,
            largest_block,
            fragment_count,
            fragmentation_percent,
        }
    }

    /// Merges the free space of two independent allocators.
    pub fn combine(self, other: Self) -> Self {
        Self::calculate(
            self.total_free + other.total_free,
            self.largest_block.max(other.largest_block),
            self.fragment_count + other.fragment_count,
        )
    }

    /// Check if fragmentation is concerning (>50%)
    #[inline]
    pub fn is_fragmented(&self) -> bool {
        self.fragmentation_percent > 50
    }
}

impl fmt::Display for FragmentationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FragmentationStats {{ total_free: {} bytes, largest_block: {} bytes, \
             fragments: {}, fragmentation: {}% }}",
            self.total_free, self.largest_block, self.fragment_count, self.fragmentation_percent
        )
    }
}

// ============================================================================
// Sealed Internal Allocator Trait
// ============================================================================

/// Inspection methods that depend on allocator internals
///
/// # Examples
///
/// ```rust
/// use carve_memory::allocator::{Allocator, ImplicitListAllocator};
/// use carve_memory::allocator::sealed::AllocatorInternal;
///
/// let alloc = ImplicitListAllocator::new(1024).unwrap();
/// let before = alloc.internal_fragmentation().largest_block;
///
/// let mut block = alloc.allocate(100);
/// unsafe { alloc.deallocate(&mut block) };
///
/// assert_eq!(alloc.internal_fragmentation().largest_block, before);
/// alloc.internal_validate().unwrap();
/// ```
pub trait AllocatorInternal: private::Sealed + Allocator {
    /// Free-space layout right now.
    ///
    /// Takes the allocator's lock where it has one; the result is a snapshot.
    fn internal_fragmentation(&self) -> FragmentationStats {
        FragmentationStats::default()
    }

    /// Walks the allocator's structures and checks their invariants.
    ///
    /// Returns `Err` with a description of the first violation found.
    fn internal_validate(&self) -> Result<(), &'static str> {
        Ok(())
    }

    /// Allocator type name for debugging
    fn internal_type_name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }
}

impl<T: AllocatorInternal + ?Sized> AllocatorInternal for &T {
    fn internal_fragmentation(&self) -> FragmentationStats {
        (**self).internal_fragmentation()
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        (**self).internal_validate()
    }

    fn internal_type_name(&self) -> &'static str {
        (**self).internal_type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragmentation_calculation() {
        let stats = FragmentationStats::calculate(1000, 500, 5);
        assert_eq!(stats.fragmentation_percent, 50);
        assert!(!stats.is_fragmented());
    }

    #[test]
    fn high_fragmentation_detection() {
        let stats = FragmentationStats::calculate(1000, 100, 10);
        assert_eq!(stats.fragmentation_percent, 90);
        assert!(stats.is_fragmented());
    }

    #[test]
    fn combine_takes_largest_and_sums() {
        let a = FragmentationStats::calculate(100, 80, 2);
        let b = FragmentationStats::calculate(300, 200, 3);
        let both = a.combine(b);
        assert_eq!(both.total_free, 400);
        assert_eq!(both.largest_block, 200);
        assert_eq!(both.fragment_count, 5);
        assert_eq!(both.fragmentation_percent, 50);
    }

    #[test]
    fn fragmentation_display() {
        let stats = FragmentationStats::calculate(2048, 512, 8);
        let display = format!("{stats}");
        assert!(display.contains("2048 bytes"));
        assert!(display.contains("75%"));
    }
}
