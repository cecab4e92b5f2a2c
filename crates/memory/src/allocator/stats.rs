//! Allocator statistics
//!
//! Counters are opt-in per instance (`track_stats` in each config) and kept
//! with relaxed atomics, so a snapshot taken during concurrent use is
//! approximate.

use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::utils::atomic_max;

/// Point-in-time statistics of one allocator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Usable bytes of the blocks currently handed out
    pub allocated_bytes: usize,
    /// Highest value `allocated_bytes` reached
    pub peak_allocated_bytes: usize,
    /// Successful allocations
    pub allocation_count: usize,
    /// Successful deallocations
    pub deallocation_count: usize,
    /// Requests answered with an invalid block
    pub failed_allocations: usize,
    /// Cumulative bytes handed out
    pub total_bytes_allocated: usize,
}

impl AllocatorStats {
    /// Average successful request size
    pub fn average_allocation_size(&self) -> Option<f64> {
        (self.allocation_count > 0)
            .then(|| self.total_bytes_allocated as f64 / self.allocation_count as f64)
    }

    /// Share of requests that succeeded (1.0 when nothing was requested)
    pub fn allocation_efficiency(&self) -> f64 {
        let attempts = self.allocation_count + self.failed_allocations;
        if attempts == 0 {
            1.0
        } else {
            self.allocation_count as f64 / attempts as f64
        }
    }

    /// Allocations not yet returned
    pub fn live_allocations(&self) -> usize {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Allocator Statistics:")?;
        writeln!(f, "  Current allocated: {} bytes", self.allocated_bytes)?;
        writeln!(f, "  Peak allocated: {} bytes", self.peak_allocated_bytes)?;
        writeln!(f, "  Allocations: {}", self.allocation_count)?;
        writeln!(f, "  Deallocations: {}", self.deallocation_count)?;
        writeln!(f, "  Failed allocations: {}", self.failed_allocations)?;
        if let Some(avg) = self.average_allocation_size() {
            writeln!(f, "  Average allocation size: {avg:.2} bytes")?;
        }
        Ok(())
    }
}

/// Thread-safe counters behind [`AllocatorStats`]
#[derive(Debug, Default)]
pub struct AtomicAllocatorStats {
    allocated_bytes: AtomicUsize,
    peak_allocated_bytes: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
    failed_allocations: AtomicUsize,
    total_bytes_allocated: AtomicUsize,
}

impl AtomicAllocatorStats {
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicUsize::new(0),
            peak_allocated_bytes: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            deallocation_count: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
            total_bytes_allocated: AtomicUsize::new(0),
        }
    }

    pub fn record_allocation(&self, size: usize) {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_allocated.fetch_add(size, Ordering::Relaxed);
        let current = self.allocated_bytes.fetch_add(size, Ordering::Relaxed) + size;
        atomic_max(&self.peak_allocated_bytes, current);
    }

    pub fn record_deallocation(&self, size: usize) {
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
        // Saturating: a reset between allocate and deallocate must not wrap.
        let _ = self
            .allocated_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(size))
            });
    }

    pub fn record_allocation_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.allocated_bytes.store(0, Ordering::Relaxed);
        self.peak_allocated_bytes.store(0, Ordering::Relaxed);
        self.allocation_count.store(0, Ordering::Relaxed);
        self.deallocation_count.store(0, Ordering::Relaxed);
        self.failed_allocations.store(0, Ordering::Relaxed);
        self.total_bytes_allocated.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            peak_allocated_bytes: self.peak_allocated_bytes.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            deallocation_count: self.deallocation_count.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            total_bytes_allocated: self.total_bytes_allocated.load(Ordering::Relaxed),
        }
    }
}

/// Statistics that cost nothing when disabled
#[derive(Debug, Default)]
pub struct OptionalStats {
    stats: Option<AtomicAllocatorStats>,
}

impl OptionalStats {
    pub fn new(enabled: bool) -> Self {
        if enabled { Self::enabled() } else { Self::disabled() }
    }

    pub fn enabled() -> Self {
        Self {
            stats: Some(AtomicAllocatorStats::new()),
        }
    }

    pub const fn disabled() -> Self {
        Self { stats: None }
    }

    #[inline]
    pub fn record_allocation(&self, size: usize) {
        if let Some(ref stats) = self.stats {
            stats.record_allocation(size);
        }
    }

    #[inline]
    pub fn record_deallocation(&self, size: usize) {
        if let Some(ref stats) = self.stats {
            stats.record_deallocation(size);
        }
    }

    #[inline]
    pub fn record_allocation_failure(&self) {
        if let Some(ref stats) = self.stats {
            stats.record_allocation_failure();
        }
    }

    pub fn reset(&self) {
        if let Some(ref stats) = self.stats {
            stats.reset();
        }
    }

    pub fn snapshot(&self) -> Option<AllocatorStats> {
        self.stats.as_ref().map(AtomicAllocatorStats::snapshot)
    }

    pub fn is_enabled(&self) -> bool {
        self.stats.is_some()
    }
}
