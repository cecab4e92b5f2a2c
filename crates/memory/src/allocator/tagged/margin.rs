//! Boundary tags
//!
//! Every block managed by a [`TaggedAllocator`](super::TaggedAllocator)
//! starts with a header word and ends with an identical footer word:
//!
//! ```text
//! | header | payload ............................ | footer |
//!   size|a                                          size|a
//! ```
//!
//! `size` is the whole block (both tags included) and always a multiple of
//! the word size, which leaves bit 0 free for the allocated flag.

use core::fmt;

use crate::utils::ALIGNMENT;

/// Bytes occupied by one tag.
pub const TAG_SIZE: usize = core::mem::size_of::<usize>();

/// Header + footer overhead of every block.
pub const TAG_OVERHEAD: usize = 2 * TAG_SIZE;

const ALLOCATED: usize = 1;

/// One boundary tag: block size with the allocated flag in bit 0.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Margin(usize);

impl Margin {
    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        debug_assert!(size % ALIGNMENT == 0);
        Self(size | allocated as usize)
    }

    #[inline]
    pub const fn free(size: usize) -> Self {
        Self::new(size, false)
    }

    #[inline]
    pub const fn allocated(size: usize) -> Self {
        Self::new(size, true)
    }

    #[inline]
    pub(crate) const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Whole block size in bytes, tags included.
    #[inline]
    pub const fn size(self) -> usize {
        self.0 & !ALLOCATED
    }

    /// Bytes available to the caller.
    #[inline]
    pub const fn payload_size(self) -> usize {
        self.size().saturating_sub(TAG_OVERHEAD)
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub const fn is_free(self) -> bool {
        !self.is_allocated()
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Debug for Margin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Margin")
            .field("size", &self.size())
            .field("allocated", &self.is_allocated())
            .finish()
    }
}
