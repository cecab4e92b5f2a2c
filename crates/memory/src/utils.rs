//! Alignment arithmetic and spin-loop helpers shared by the allocators

use core::sync::atomic::{AtomicUsize, Ordering};

/// Alignment unit of every allocator in this crate (one machine word).
pub const ALIGNMENT: usize = core::mem::size_of::<usize>();

/// Aligns a value up to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use carve_memory::utils::align_up;
///
/// assert_eq!(align_up(7, 8), 8);
/// assert_eq!(align_up(8, 8), 8);
/// assert_eq!(align_up(9, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Overflow-checked variant of [`align_up`]
#[inline]
pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    match value.checked_add(alignment - 1) {
        Some(v) => Some(v & !(alignment - 1)),
        None => None,
    }
}

/// Checks if a value is a power of two
#[inline(always)]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

/// Raises `current` to `value` if `value` is larger
pub fn atomic_max(current: &AtomicUsize, value: usize) {
    let mut max = current.load(Ordering::Relaxed);
    while value > max {
        match current.compare_exchange_weak(max, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => max = actual,
        }
    }
}

/// Backoff for CAS retry loops
///
/// Spins for an exponentially growing number of iterations and yields the
/// thread once the spin count saturates, so a retry loop without a bound
/// still lets a preempted winner finish.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
}

impl Backoff {
    const MAX_SPINS: u32 = 64;

    /// Create new backoff with default parameters
    #[inline]
    pub fn new() -> Self {
        Self { current: 1 }
    }

    /// Perform backoff
    #[inline]
    pub fn spin(&mut self) {
        if self.current >= Self::MAX_SPINS {
            std::thread::yield_now();
            return;
        }
        for _ in 0..self.current {
            core::hint::spin_loop();
        }
        self.current *= 2;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
