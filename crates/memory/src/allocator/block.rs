//! The `Block` value type: a pointer plus a byte length

use core::fmt;
use core::ptr::{self, NonNull};

/// A contiguous byte range handed out by an allocator.
///
/// A block is *valid* when its pointer is non-null and its size is non-zero.
/// Allocators signal exhaustion by returning [`Block::invalid`], and
/// [`Allocator::deallocate`](super::Allocator::deallocate) invalidates the
/// caller's copy on success.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    ptr: *mut u8,
    size: usize,
}

// SAFETY: Block is a plain (pointer, length) pair. It grants no access by
// itself; every dereference goes through unsafe code that carries its own
// contract.
unsafe impl Send for Block {}
// SAFETY: see Send above; shared references to a Block only expose copies of
// the two fields.
unsafe impl Sync for Block {}

impl Block {
    /// Creates a block from a pointer and a size.
    #[inline]
    pub const fn new(ptr: *mut u8, size: usize) -> Self {
        Self { ptr, size }
    }

    /// The block returned on allocation failure.
    #[inline]
    pub const fn invalid() -> Self {
        Self {
            ptr: ptr::null_mut(),
            size: 0,
        }
    }

    /// Creates a block spanning a mutable byte slice.
    #[inline]
    pub fn from_slice(slice: &mut [u8]) -> Self {
        Self::new(slice.as_mut_ptr(), slice.len())
    }

    #[inline]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline]
    pub fn as_non_null(&self) -> Option<NonNull<u8>> {
        NonNull::new(self.ptr)
    }

    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Address one past the last byte.
    #[inline]
    pub fn end(&self) -> usize {
        self.ptr as usize + self.size
    }

    /// Non-null pointer and non-zero size.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.ptr.is_null() && self.size > 0
    }

    /// Half-open range test: `ptr ∈ [self.ptr, self.ptr + size)`.
    #[inline]
    pub fn contains_ptr(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        self.is_valid() && addr >= self.ptr as usize && addr < self.end()
    }

    /// True if `other` lies entirely inside this block.
    #[inline]
    pub fn contains(&self, other: &Block) -> bool {
        other.is_valid()
            && self.contains_ptr(other.ptr)
            && other.end() <= self.end()
    }

    /// Resets to the invalid state.
    #[inline]
    pub fn invalidate(&mut self) {
        *self = Self::invalid();
    }

    /// Fills the block with zero bytes.
    ///
    /// # Safety
    ///
    /// The block must be valid and writable for `size` bytes.
    #[inline]
    pub unsafe fn zero(&self) {
        // SAFETY: forwarded to the caller.
        unsafe { ptr::write_bytes(self.ptr, 0, self.size) };
    }

    /// Fills the block with `pattern`.
    ///
    /// # Safety
    ///
    /// Same as [`Block::zero`].
    #[inline]
    pub unsafe fn fill(&self, pattern: u8) {
        // SAFETY: forwarded to the caller.
        unsafe { ptr::write_bytes(self.ptr, pattern, self.size) };
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_block() {
        let block = Block::invalid();
        assert!(!block.is_valid());
        assert!(!block.contains_ptr(ptr::null()));
        assert_eq!(block, Block::default());
    }

    #[test]
    fn zero_sized_block_is_invalid() {
        let mut byte = 0u8;
        assert!(!Block::new(&raw mut byte, 0).is_valid());
    }

    #[test]
    fn containment_is_half_open() {
        let mut buf = [0u8; 32];
        let block = Block::from_slice(&mut buf);
        let base = block.as_ptr();

        assert!(block.contains_ptr(base));
        // SAFETY: offsets stay within or one past `buf`.
        unsafe {
            assert!(block.contains_ptr(base.add(31)));
            assert!(!block.contains_ptr(base.add(32)));

            assert!(block.contains(&Block::new(base.add(8), 24)));
            assert!(!block.contains(&Block::new(base.add(8), 25)));
        }
    }

    #[test]
    fn invalidate_and_zero() {
        let mut buf = [0xAAu8; 16];
        let mut block = Block::from_slice(&mut buf);
        // SAFETY: the block spans `buf`.
        unsafe { block.zero() };
        block.invalidate();
        assert!(!block.is_valid());
        assert!(buf.iter().all(|&b| b == 0));
    }
}
