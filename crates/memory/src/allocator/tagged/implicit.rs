//! Implicit free list: the heap itself is the list

use super::{FitPolicy, FreeIndex, Heap, ListConfig};

/// Finds free blocks by walking every block of the heap.
///
/// There is nothing to maintain, so free blocks can be as small as two tags.
#[derive(Debug, Default)]
pub struct ImplicitIndex;

// SAFETY: never writes to the heap.
unsafe impl FreeIndex for ImplicitIndex {
    const NODE_SIZE: usize = 0;

    fn new() -> Self {
        Self
    }

    unsafe fn insert(&mut self, _heap: &Heap, _block: *mut u8) {}

    unsafe fn remove(&mut self, _heap: &Heap, _block: *mut u8) {}

    unsafe fn find(&self, heap: &Heap, size: usize, config: &ListConfig) -> Option<*mut u8> {
        // SAFETY: the caller guarantees a well-formed heap.
        let mut candidates = unsafe { heap.blocks() }
            .filter(|(_, tag)| tag.is_free() && tag.size() >= size);

        match config.fit {
            FitPolicy::First => candidates.next().map(|(block, _)| block),
            FitPolicy::Best => {
                let mut best: Option<(*mut u8, usize)> = None;
                for (block, tag) in candidates {
                    if tag.size() == size {
                        return Some(block);
                    }
                    if best.is_none_or(|(_, best_size)| tag.size() < best_size) {
                        best = Some((block, tag.size()));
                    }
                }
                best.map(|(block, _)| block)
            }
        }
    }

    fn clear(&mut self) {}

    unsafe fn validate(&self, _heap: &Heap, _free_blocks: usize) -> Result<(), &'static str> {
        Ok(())
    }
}
