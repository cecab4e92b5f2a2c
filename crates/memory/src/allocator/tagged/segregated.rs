//! Segregated explicit free lists
//!
//! One address-ordered list per payload size class (see
//! [`size_class`](crate::core::types::size_class)). A free block sits on the
//! list of its own payload size; a request searches the list of its class.

use super::explicit::FreeList;
use super::{FreeIndex, Heap, ListConfig, TAG_OVERHEAD};
use crate::core::types::{SIZE_CLASS_COUNT, size_class};

/// Size class a request with total block size `size` is served from.
#[inline]
pub const fn request_class(size: usize) -> usize {
    size_class(size.saturating_sub(TAG_OVERHEAD))
}

/// Free lists split by size class.
pub struct SegregatedIndex {
    lists: [FreeList; SIZE_CLASS_COUNT],
}

impl SegregatedIndex {
    /// Free blocks per class, smallest class first.
    pub fn class_lengths(&self) -> [usize; SIZE_CLASS_COUNT] {
        core::array::from_fn(|class| self.lists[class].len())
    }

    fn class_of(heap: &Heap, block: *mut u8) -> usize {
        // SAFETY: callers pass indexed or about-to-be-indexed free blocks.
        size_class(unsafe { heap.header(block) }.payload_size())
    }
}

// SAFETY: nodes are written only into blocks handed over by `insert`.
unsafe impl FreeIndex for SegregatedIndex {
    const NODE_SIZE: usize = 2 * core::mem::size_of::<usize>();

    fn new() -> Self {
        Self {
            lists: core::array::from_fn(|_| FreeList::new()),
        }
    }

    unsafe fn insert(&mut self, heap: &Heap, block: *mut u8) {
        let class = Self::class_of(heap, block);
        // SAFETY: forwarded to the caller.
        unsafe { self.lists[class].insert(block) }
    }

    unsafe fn remove(&mut self, heap: &Heap, block: *mut u8) {
        let class = Self::class_of(heap, block);
        // SAFETY: forwarded to the caller; tags are unchanged since insert,
        // so the class is the one the block was filed under.
        unsafe { self.lists[class].remove(block) }
    }

    unsafe fn find(&self, heap: &Heap, size: usize, config: &ListConfig) -> Option<*mut u8> {
        let class = request_class(size);
        let last = if config.class_fallthrough {
            SIZE_CLASS_COUNT
        } else {
            class + 1
        };
        // SAFETY: forwarded to the caller.
        self.lists[class..last]
            .iter()
            .find_map(|list| unsafe { list.find(heap, size, config.fit) })
    }

    fn clear(&mut self) {
        self.lists.iter_mut().for_each(FreeList::clear);
    }

    unsafe fn validate(&self, heap: &Heap, free_blocks: usize) -> Result<(), &'static str> {
        let indexed: usize = self.lists.iter().map(FreeList::len).sum();
        if indexed != free_blocks {
            return Err("segregated lists count differs from free blocks in the heap");
        }
        for (class, list) in self.lists.iter().enumerate() {
            // SAFETY: forwarded to the caller.
            unsafe { list.validate(heap, |payload| size_class(payload) == class)? };
        }
        Ok(())
    }
}

impl core::fmt::Debug for SegregatedIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegregatedIndex")
            .field("class_lengths", &self.class_lengths())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::sealed::AllocatorInternal;
    use crate::allocator::tagged::SegregatedListAllocator;
    use crate::allocator::Allocator;

    #[test]
    fn request_classes() {
        assert_eq!(request_class(16 + TAG_OVERHEAD), 0);
        assert_eq!(request_class(24 + TAG_OVERHEAD), 1);
        assert_eq!(request_class(64 + TAG_OVERHEAD), 2);
        assert_eq!(request_class(72 + TAG_OVERHEAD), 3);
    }

    #[test]
    fn requests_stay_in_their_class() {
        let alloc = SegregatedListAllocator::new(512).expect("allocator");
        // The whole heap is one block of the last class.
        assert!(!alloc.allocate(8).is_valid());

        // 464 + 16 leaves a 32-byte remainder: a class-0 free block.
        let big = alloc.allocate(464);
        assert!(big.is_valid());
        assert!(!alloc.allocate(24).is_valid());
        assert_eq!(alloc.allocate(8).as_ptr(), big.as_ptr().wrapping_add(480));
        alloc.internal_validate().expect("valid heap");
    }

    #[test]
    fn fallthrough_searches_larger_classes() {
        let config = ListConfig {
            class_fallthrough: true,
            ..ListConfig::default()
        };
        let alloc = SegregatedListAllocator::with_config(512, config).expect("allocator");
        let small = alloc.allocate(8);
        let medium = alloc.allocate(48);
        assert!(small.is_valid() && medium.is_valid());
        alloc.internal_validate().expect("valid heap");
    }
}
