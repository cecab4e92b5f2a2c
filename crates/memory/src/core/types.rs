//! Common size constants

/// Memory size constants
pub mod size {
    /// 1 Kilobyte
    pub const KB: usize = 1024;
}

/// Payload size classes of the segregated free list, by upper bound.
///
/// Requests above the last bound belong to the final, unbounded class.
pub const SIZE_CLASS_BOUNDS: [usize; 3] = [16, 32, 64];

/// Number of segregated size classes.
pub const SIZE_CLASS_COUNT: usize = SIZE_CLASS_BOUNDS.len() + 1;

/// Returns the size class of a payload size.
#[inline]
pub const fn size_class(payload: usize) -> usize {
    let mut class = 0;
    while class < SIZE_CLASS_BOUNDS.len() {
        if payload <= SIZE_CLASS_BOUNDS[class] {
            return class;
        }
        class += 1;
    }
    class
}
