//! Linear (bump) allocator
//!
//! Hands out consecutive word-aligned slices of the backing block by moving
//! an atomic cursor forward. There is no per-block header, so individual
//! blocks cannot be returned in general; memory comes back all at once via
//! [`Resettable::reset`], by restoring a [`LinearCheckpoint`], or, for the
//! most recent block only, through `deallocate`.
//!
//! # Safety
//!
//! - The cursor only moves through compare-and-swap, so concurrent callers
//!   always receive disjoint ranges.
//! - Every returned range lies in `[base, base + capacity)`.
//! - Checkpoints carry a generation counter; a reset makes them stale.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

mod checkpoint;
mod config;

pub use checkpoint::{LinearCheckpoint, LinearScope};
pub use config::LinearConfig;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

use crate::allocator::sealed::{AllocatorInternal, FragmentationStats};
use crate::allocator::{
    AllocError, AllocResult, Allocator, AllocatorStats, BackedAllocator, BackingBlock, Block,
    MemoryUsage, OptionalStats, Resettable, StatisticsProvider,
};
use crate::utils::{ALIGNMENT, Backoff, checked_align_up};

/// Bump allocator over a single backing block.
///
/// # Examples
///
/// ```
/// use carve_memory::allocator::{Allocator, LinearAllocator, Resettable};
///
/// let linear = LinearAllocator::new(1024).unwrap();
/// let a = linear.allocate(10);
/// let b = linear.allocate(10);
/// assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
///
/// unsafe { linear.reset() };
/// assert_eq!(linear.allocate(10).as_ptr(), a.as_ptr());
/// ```
pub struct LinearAllocator {
    backing: BackingBlock,
    /// Word-aligned usable part of the backing block
    region: Block,
    /// Offset of the first free byte in `region`
    cursor: AtomicUsize,
    generation: AtomicU32,
    config: LinearConfig,
    stats: OptionalStats,
}

impl LinearAllocator {
    /// Creates a linear allocator owning `capacity` bytes.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        Self::with_config(capacity, LinearConfig::default())
    }

    /// Creates a linear allocator owning `capacity` bytes with `config`.
    pub fn with_config(capacity: usize, config: LinearConfig) -> AllocResult<Self> {
        let backing = BackingBlock::allocate(capacity, ALIGNMENT)?;
        Self::from_backing(backing, config)
    }

    /// Creates a linear allocator over caller-provided memory.
    ///
    /// # Safety
    ///
    /// See [`BackingBlock::borrowed`].
    pub unsafe fn from_block(block: Block, config: LinearConfig) -> AllocResult<Self> {
        // SAFETY: forwarded to the caller.
        let backing = unsafe { BackingBlock::borrowed(block)? };
        Self::from_backing(backing, config)
    }

    fn from_backing(backing: BackingBlock, config: LinearConfig) -> AllocResult<Self> {
        config.validate()?;
        let region = backing
            .aligned_region(ALIGNMENT)
            .ok_or_else(|| AllocError::invalid_layout("backing block too small"))?;

        #[cfg(feature = "logging")]
        debug!(
            capacity = region.size(),
            owned = backing.is_owned(),
            "created linear allocator"
        );

        Ok(Self {
            stats: OptionalStats::new(config.track_stats),
            backing,
            region,
            cursor: AtomicUsize::new(0),
            generation: AtomicU32::new(0),
            config,
        })
    }

    /// Usable bytes in the backing block.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    /// Bytes handed out since the last reset.
    #[inline]
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// True if the backing block was acquired by this allocator.
    pub fn owns_backing(&self) -> bool {
        self.backing.is_owned()
    }

    #[inline]
    fn at(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.capacity());
        // SAFETY: offset is at most the region size, so the result stays in
        // bounds (or one past the end) of the backing allocation.
        unsafe { self.region.as_ptr().add(offset) }
    }

    /// Saves the current position.
    pub fn checkpoint(&self) -> LinearCheckpoint {
        LinearCheckpoint {
            position: self.cursor.load(Ordering::Acquire),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// Rolls back to `checkpoint`, releasing everything allocated after it.
    ///
    /// Blocks handed out after the checkpoint must no longer be used.
    pub fn restore(&self, checkpoint: LinearCheckpoint) -> AllocResult<()> {
        if checkpoint.generation != self.generation.load(Ordering::Acquire) {
            return Err(AllocError::invalid_state("checkpoint from a previous generation"));
        }

        let current = self.cursor.load(Ordering::Acquire);
        if checkpoint.position > current {
            return Err(AllocError::invalid_state("checkpoint is ahead of the cursor"));
        }

        if self
            .cursor
            .compare_exchange(current, checkpoint.position, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AllocError::invalid_state("cursor moved during restore"));
        }

        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: [position, current) was allocated and is now released.
            unsafe {
                Block::new(self.at(checkpoint.position), current - checkpoint.position)
                    .fill(pattern);
            }
        }
        Ok(())
    }

    /// Scope guard that restores the current position when dropped.
    pub fn scope(&self) -> LinearScope<'_> {
        LinearScope::new(self)
    }

    fn try_bump(&self, size: usize) -> Option<(usize, usize)> {
        let needed = checked_align_up(size, ALIGNMENT)?;
        let mut backoff = self.config.use_backoff.then(Backoff::new);

        loop {
            let current = self.cursor.load(Ordering::Acquire);
            let next = current.checked_add(needed)?;
            if next > self.capacity() {
                return None;
            }

            if self
                .cursor
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some((current, needed));
            }

            if let Some(ref mut b) = backoff {
                b.spin();
            }
        }
    }
}

// SAFETY: ranges come from CAS-reserved, non-overlapping cursor intervals
// inside the region, word aligned because the cursor only moves in
// multiples of ALIGNMENT from an aligned base.
unsafe impl Allocator for LinearAllocator {
    fn allocate(&self, size: usize) -> Block {
        if size == 0 {
            return Block::invalid();
        }

        let Some((offset, reserved)) = self.try_bump(size) else {
            #[cfg(feature = "logging")]
            trace!(size, remaining = self.remaining(), "linear allocator exhausted");
            self.stats.record_allocation_failure();
            return Block::invalid();
        };

        let block = Block::new(self.at(offset), size);
        if let Some(pattern) = self.config.alloc_pattern {
            // SAFETY: [offset, offset + reserved) was just reserved by CAS.
            unsafe { Block::new(block.as_ptr(), reserved).fill(pattern) };
        }
        self.stats.record_allocation(size);
        block
    }

    /// Accepted as a no-op for any owned pointer; without the size the
    /// cursor cannot be rolled back.
    unsafe fn deallocate_ptr(&self, ptr: *mut u8) -> bool {
        self.contains_ptr(ptr)
    }

    /// Rolls the cursor back when `block` is the most recent allocation;
    /// other owned blocks are accepted and stay reserved until a reset.
    unsafe fn deallocate(&self, block: &mut Block) -> bool {
        if !self.contains(block) {
            return false;
        }

        let offset = block.as_ptr() as usize - self.region.as_ptr() as usize;
        let end = offset + block.size().next_multiple_of(ALIGNMENT);
        let rolled_back = self
            .cursor
            .compare_exchange(end, offset, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if rolled_back {
            if let Some(pattern) = self.config.dealloc_pattern {
                // SAFETY: the range was the tail allocation and is released now.
                unsafe { Block::new(block.as_ptr(), end - offset).fill(pattern) };
            }
        }

        self.stats.record_deallocation(block.size());
        block.invalidate();
        true
    }

    fn contains_ptr(&self, ptr: *const u8) -> bool {
        self.region.contains_ptr(ptr)
    }
}

impl Resettable for LinearAllocator {
    unsafe fn reset(&self) {
        let used = self.cursor.swap(0, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(pattern) = self.config.dealloc_pattern {
            // SAFETY: the caller guarantees no block in [0, used) is live.
            unsafe { Block::new(self.at(0), used).fill(pattern) };
        }
        self.stats.reset();
    }
}

impl MemoryUsage for LinearAllocator {
    fn used_memory(&self) -> usize {
        self.used()
    }

    fn available_memory(&self) -> Option<usize> {
        Some(self.remaining())
    }
}

impl StatisticsProvider for LinearAllocator {
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

impl BackedAllocator for LinearAllocator {
    fn with_capacity(capacity: usize) -> AllocResult<Self> {
        Self::new(capacity)
    }

    fn capacity(&self) -> usize {
        self.capacity()
    }
}

impl AllocatorInternal for LinearAllocator {
    fn internal_fragmentation(&self) -> FragmentationStats {
        let free = self.remaining();
        FragmentationStats::calculate(free, free, usize::from(free > 0))
    }

    fn internal_validate(&self) -> Result<(), &'static str> {
        let used = self.used();
        if used > self.capacity() {
            return Err("cursor past end of region");
        }
        if used % ALIGNMENT != 0 {
            return Err("cursor not word aligned");
        }
        Ok(())
    }
}

impl core::fmt::Debug for LinearAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearAllocator")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("owned", &self.backing.is_owned())
            .finish()
    }
}
