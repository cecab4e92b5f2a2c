//! Explicit free list
//!
//! Free blocks are chained through their payloads in address order:
//!
//! ```text
//! | header | next | prev | ... | footer |
//! ```
//!
//! Address order keeps first fit biased toward the start of the heap, which
//! is what keeps long-lived heaps compact.

use core::ptr;

use super::{FitPolicy, FreeIndex, Heap, ListConfig};

/// Link words stored in the payload of a free block.
#[repr(C)]
struct Links {
    next: *mut u8,
    prev: *mut u8,
}

#[inline]
fn links(block: *mut u8) -> *mut Links {
    Heap::payload(block).cast()
}

/// Address-ordered doubly linked list of free blocks.
pub(super) struct FreeList {
    head: *mut u8,
    len: usize,
}

impl FreeList {
    pub(super) const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    pub(super) fn clear(&mut self) {
        self.head = ptr::null_mut();
        self.len = 0;
    }

    /// # Safety
    ///
    /// `block` is a free block with room for [`Links`], not on any list.
    pub(super) unsafe fn insert(&mut self, block: *mut u8) {
        // SAFETY: every node on the list is a free block owned by the list.
        unsafe {
            let mut prev: *mut u8 = ptr::null_mut();
            let mut next = self.head;
            while !next.is_null() && next < block {
                prev = next;
                next = (*links(next)).next;
            }

            links(block).write(Links { next, prev });
            if prev.is_null() {
                self.head = block;
            } else {
                (*links(prev)).next = block;
            }
            if !next.is_null() {
                (*links(next)).prev = block;
            }
        }
        self.len += 1;
    }

    /// # Safety
    ///
    /// `block` is on this list.
    pub(super) unsafe fn remove(&mut self, block: *mut u8) {
        // SAFETY: the neighbours are on the list too.
        unsafe {
            let Links { next, prev } = links(block).read();
            if prev.is_null() {
                self.head = next;
            } else {
                (*links(prev)).next = next;
            }
            if !next.is_null() {
                (*links(next)).prev = prev;
            }
        }
        self.len -= 1;
    }

    /// # Safety
    ///
    /// The list and the tags of its blocks are consistent.
    pub(super) unsafe fn find(&self, heap: &Heap, size: usize, fit: FitPolicy) -> Option<*mut u8> {
        let mut best: Option<(*mut u8, usize)> = None;
        let mut node = self.head;
        // SAFETY: forwarded to the caller.
        unsafe {
            while !node.is_null() {
                let block_size = heap.header(node).size();
                if block_size >= size {
                    if fit == FitPolicy::First || block_size == size {
                        return Some(node);
                    }
                    if best.is_none_or(|(_, best_size)| block_size < best_size) {
                        best = Some((node, block_size));
                    }
                }
                node = (*links(node)).next;
            }
        }
        best.map(|(block, _)| block)
    }

    /// Checks links, order, membership and length.
    ///
    /// # Safety
    ///
    /// The heap is well formed.
    pub(super) unsafe fn validate(
        &self,
        heap: &Heap,
        accept: impl Fn(usize) -> bool,
    ) -> Result<(), &'static str> {
        let mut prev: *mut u8 = ptr::null_mut();
        let mut node = self.head;
        let mut seen = 0;
        // SAFETY: each node is bounds checked before its links are read.
        unsafe {
            while !node.is_null() {
                if !heap.contains(node) {
                    return Err("free list node outside the heap");
                }
                let tag = heap.header(node);
                if tag.is_allocated() {
                    return Err("allocated block on the free list");
                }
                if !accept(tag.payload_size()) {
                    return Err("free block on the wrong list");
                }
                let Links { next, prev: back } = links(node).read();
                if back != prev {
                    return Err("broken prev link");
                }
                if !next.is_null() && next <= node {
                    return Err("free list not address ordered");
                }
                seen += 1;
                if seen > self.len {
                    return Err("free list longer than its count");
                }
                prev = node;
                node = next;
            }
        }
        if seen != self.len {
            return Err("free list shorter than its count");
        }
        Ok(())
    }
}

// SAFETY: the raw pointers refer into a heap owned by the allocator that owns
// the list, and are only followed under its lock.
unsafe impl Send for FreeList {}

/// One address-ordered list holding every free block.
pub struct ExplicitIndex {
    list: FreeList,
}

// SAFETY: nodes are written only into blocks handed over by `insert`.
unsafe impl FreeIndex for ExplicitIndex {
    const NODE_SIZE: usize = core::mem::size_of::<Links>();

    fn new() -> Self {
        Self {
            list: FreeList::new(),
        }
    }

    unsafe fn insert(&mut self, _heap: &Heap, block: *mut u8) {
        // SAFETY: forwarded to the caller.
        unsafe { self.list.insert(block) }
    }

    unsafe fn remove(&mut self, _heap: &Heap, block: *mut u8) {
        // SAFETY: forwarded to the caller.
        unsafe { self.list.remove(block) }
    }

    unsafe fn find(&self, heap: &Heap, size: usize, config: &ListConfig) -> Option<*mut u8> {
        // SAFETY: forwarded to the caller.
        unsafe { self.list.find(heap, size, config.fit) }
    }

    fn clear(&mut self) {
        self.list.clear();
    }

    unsafe fn validate(&self, heap: &Heap, free_blocks: usize) -> Result<(), &'static str> {
        if self.list.len() != free_blocks {
            return Err("free list count differs from free blocks in the heap");
        }
        // SAFETY: forwarded to the caller.
        unsafe { self.list.validate(heap, |_| true) }
    }
}

impl core::fmt::Debug for ExplicitIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExplicitIndex")
            .field("free_blocks", &self.list.len())
            .finish()
    }
}
