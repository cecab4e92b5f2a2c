//! Block navigation over a boundary-tagged region
//!
//! A block is addressed by a pointer to its header. All methods are raw
//! pointer arithmetic; callers hold the allocator lock and pass pointers
//! that are real block starts of this heap.

use super::margin::{Margin, TAG_OVERHEAD, TAG_SIZE};
use crate::utils::ALIGNMENT;

/// Bounds of the tagged region: `[start, end)`, both word aligned.
#[derive(Clone, Copy, Debug)]
pub struct Heap {
    start: *mut u8,
    end: *mut u8,
}

// SAFETY: Heap is two bounds; it only dereferences through unsafe methods
// whose callers hold the owning allocator's lock.
unsafe impl Send for Heap {}
// SAFETY: see Send.
unsafe impl Sync for Heap {}

impl Heap {
    /// # Safety
    ///
    /// `start..start + len` must be a writable, word-aligned range owned by
    /// the caller for as long as the heap is used.
    pub(crate) unsafe fn new(start: *mut u8, len: usize) -> Self {
        debug_assert_eq!(start as usize % ALIGNMENT, 0);
        debug_assert_eq!(len % ALIGNMENT, 0);
        Self {
            start,
            // SAFETY: forwarded to the caller.
            end: unsafe { start.add(len) },
        }
    }

    #[inline]
    pub fn start(&self) -> *mut u8 {
        self.start
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end as usize - self.start as usize
    }

    /// True if `ptr` lies in `[start, end)`.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        addr >= self.start as usize && addr < self.end as usize
    }

    /// True if `ptr` could be the payload pointer of a block of this heap.
    #[inline]
    pub fn is_payload_candidate(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        addr >= self.start as usize + TAG_SIZE
            && addr < self.end as usize
            && addr % ALIGNMENT == 0
    }

    /// # Safety
    ///
    /// `block` must be a block start of this heap.
    #[inline]
    pub unsafe fn header(&self, block: *mut u8) -> Margin {
        // SAFETY: the header word is aligned and inside the heap.
        Margin::from_raw(unsafe { block.cast::<usize>().read() })
    }

    /// # Safety
    ///
    /// `block` must be a block start with a well-formed header.
    #[inline]
    pub unsafe fn footer(&self, block: *mut u8) -> Margin {
        // SAFETY: header size keeps the footer inside the block.
        unsafe {
            let size = self.header(block).size();
            Margin::from_raw(block.add(size - TAG_SIZE).cast::<usize>().read())
        }
    }

    /// Writes `tag` to both ends of the block it describes.
    ///
    /// # Safety
    ///
    /// `block..block + tag.size()` must lie inside the heap and be owned by
    /// the caller.
    #[inline]
    pub unsafe fn set_tags(&self, block: *mut u8, tag: Margin) {
        debug_assert!(tag.size() >= TAG_OVERHEAD);
        debug_assert!(block as usize + tag.size() <= self.end as usize);
        // SAFETY: forwarded to the caller.
        unsafe {
            block.cast::<usize>().write(tag.raw());
            block.add(tag.size() - TAG_SIZE).cast::<usize>().write(tag.raw());
        }
    }

    /// Physical successor, `None` for the last block.
    ///
    /// # Safety
    ///
    /// `block` must be a block start with a well-formed header.
    #[inline]
    pub unsafe fn next(&self, block: *mut u8) -> Option<*mut u8> {
        // SAFETY: size keeps the result within the heap or at its end.
        let next = unsafe { block.add(self.header(block).size()) };
        (next < self.end).then_some(next)
    }

    /// Physical predecessor via its footer, `None` for the first block.
    ///
    /// # Safety
    ///
    /// `block` must be a block start, and the predecessor's footer must be
    /// well formed (it always is: both tags are written on every change).
    #[inline]
    pub unsafe fn prev(&self, block: *mut u8) -> Option<*mut u8> {
        if block <= self.start {
            return None;
        }
        // SAFETY: the word before a non-first block is its predecessor's footer.
        unsafe {
            let footer = Margin::from_raw(block.sub(TAG_SIZE).cast::<usize>().read());
            Some(block.sub(footer.size()))
        }
    }

    #[inline]
    pub fn payload(block: *mut u8) -> *mut u8 {
        block.wrapping_add(TAG_SIZE)
    }

    #[inline]
    pub fn block_of(payload: *mut u8) -> *mut u8 {
        payload.wrapping_sub(TAG_SIZE)
    }

    /// Cheap sanity check on a block about to be freed.
    ///
    /// # Safety
    ///
    /// `block` must lie inside the heap at a word boundary.
    pub unsafe fn looks_allocated(&self, block: *mut u8) -> bool {
        // SAFETY: block is in bounds; the footer read is guarded by the size check.
        unsafe {
            let header = self.header(block);
            let size = header.size();
            header.is_allocated()
                && size >= TAG_OVERHEAD
                && size % ALIGNMENT == 0
                && block as usize + size <= self.end as usize
                && self.footer(block) == header
        }
    }

    /// Iterates over every block in address order.
    ///
    /// # Safety
    ///
    /// The heap must be well formed for the whole iteration.
    pub unsafe fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            cursor: Some(self.start),
        }
    }
}

/// Address-ordered block walk, see [`Heap::blocks`].
pub struct Blocks<'a> {
    heap: &'a Heap,
    cursor: Option<*mut u8>,
}

impl Iterator for Blocks<'_> {
    type Item = (*mut u8, Margin);

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        // SAFETY: `Heap::blocks` requires a well-formed heap, so every cursor
        // value is a block start.
        unsafe {
            let header = self.heap.header(block);
            if header.size() < TAG_OVERHEAD {
                // Corrupt tag; stop rather than loop forever.
                self.cursor = None;
            } else {
                self.cursor = self.heap.next(block);
            }
            Some((block, header))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_through_tags() {
        let mut buf = [0usize; 16];
        let start = buf.as_mut_ptr().cast::<u8>();
        // SAFETY: `buf` is word aligned and outlives the heap.
        let heap = unsafe { Heap::new(start, 128) };

        // SAFETY: the three blocks tile the 128-byte buffer.
        unsafe {
            heap.set_tags(start, Margin::allocated(32));
            heap.set_tags(start.add(32), Margin::free(64));
            heap.set_tags(start.add(96), Margin::allocated(32));

            let second = heap.next(start).expect("second");
            assert_eq!(second, start.add(32));
            assert!(heap.header(second).is_free());
            assert_eq!(heap.footer(second), heap.header(second));

            let third = heap.next(second).expect("third");
            assert_eq!(heap.prev(third), Some(second));
            assert_eq!(heap.prev(second), Some(start));
            assert_eq!(heap.prev(start), None);
            assert_eq!(heap.next(third), None);

            assert!(heap.looks_allocated(start));
            assert!(!heap.looks_allocated(second));
            assert_eq!(heap.blocks().count(), 3);
        }
    }
}
