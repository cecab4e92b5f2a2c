//! Red-black tree of free blocks keyed by block size
//!
//! Each free block carries a tree node right after its header:
//!
//! ```text
//! | header | parent|color | left | right | ... | footer |
//! ```
//!
//! Nodes are word aligned, so bit 0 of the parent pointer holds the color
//! (set = red). Leaves and the root's parent point to one heap-allocated
//! black sentinel, which lets deletion record a parent on an empty child.
//! Equal sizes go to the right subtree.
//!
//! Both fit policies return a block of the smallest adequate size:
//! [`FitPolicy::First`] takes the leftmost such node, [`FitPolicy::Best`]
//! stops at the first exact match met on the way down.

use core::ptr::NonNull;

use super::{FitPolicy, FreeIndex, Heap, ListConfig};

const RED: usize = 1;

#[repr(C)]
struct RbNode {
    parent_color: usize,
    left: *mut RbNode,
    right: *mut RbNode,
}

type Link = *mut RbNode;

/// Free blocks in a red-black tree ordered by size.
pub struct RedBlackIndex {
    root: Link,
    nil: NonNull<RbNode>,
    len: usize,
}

// SAFETY: the tree only points into the owning allocator's heap and at its
// own sentinel, and is only touched under the allocator lock.
unsafe impl Send for RedBlackIndex {}

#[inline]
fn node_of(block: *mut u8) -> Link {
    Heap::payload(block).cast()
}

#[inline]
fn block_of(node: Link) -> *mut u8 {
    Heap::block_of(node.cast())
}

// Field helpers. Callers pass live nodes of the tree or the sentinel.
#[inline]
unsafe fn parent(n: Link) -> Link {
    // SAFETY: see above.
    unsafe { ((*n).parent_color & !RED) as Link }
}

#[inline]
unsafe fn set_parent(n: Link, p: Link) {
    // SAFETY: see above.
    unsafe { (*n).parent_color = p as usize | ((*n).parent_color & RED) }
}

#[inline]
unsafe fn is_red(n: Link) -> bool {
    // SAFETY: see above.
    unsafe { (*n).parent_color & RED != 0 }
}

#[inline]
unsafe fn set_red(n: Link, red: bool) {
    // SAFETY: see above.
    unsafe {
        if red {
            (*n).parent_color |= RED;
        } else {
            (*n).parent_color &= !RED;
        }
    }
}

#[inline]
unsafe fn left(n: Link) -> Link {
    // SAFETY: see above.
    unsafe { (*n).left }
}

#[inline]
unsafe fn right(n: Link) -> Link {
    // SAFETY: see above.
    unsafe { (*n).right }
}

impl RedBlackIndex {
    #[inline]
    fn nil(&self) -> Link {
        self.nil.as_ptr()
    }

    /// Number of free blocks in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    unsafe fn key(heap: &Heap, n: Link) -> usize {
        // SAFETY: tree nodes sit in free blocks with valid headers.
        unsafe { heap.header(block_of(n)).size() }
    }

    unsafe fn rotate_left(&mut self, x: Link) {
        // SAFETY: x has a non-sentinel right child.
        unsafe {
            let y = right(x);
            (*x).right = left(y);
            if left(y) != self.nil() {
                set_parent(left(y), x);
            }
            self.replace_child(parent(x), x, y);
            set_parent(y, parent(x));
            (*y).left = x;
            set_parent(x, y);
        }
    }

    unsafe fn rotate_right(&mut self, x: Link) {
        // SAFETY: x has a non-sentinel left child.
        unsafe {
            let y = left(x);
            (*x).left = right(y);
            if right(y) != self.nil() {
                set_parent(right(y), x);
            }
            self.replace_child(parent(x), x, y);
            set_parent(y, parent(x));
            (*y).right = x;
            set_parent(x, y);
        }
    }

    /// Points `p`'s link to `old` at `new` (or the root when `p` is the sentinel).
    unsafe fn replace_child(&mut self, p: Link, old: Link, new: Link) {
        // SAFETY: p is old's parent.
        unsafe {
            if p == self.nil() {
                self.root = new;
            } else if left(p) == old {
                (*p).left = new;
            } else {
                (*p).right = new;
            }
        }
    }

    unsafe fn transplant(&mut self, u: Link, v: Link) {
        // SAFETY: u is in the tree; v is a subtree or the sentinel.
        unsafe {
            self.replace_child(parent(u), u, v);
            set_parent(v, parent(u));
        }
    }

    unsafe fn minimum(&self, mut n: Link) -> Link {
        // SAFETY: n is a live subtree root.
        unsafe {
            while left(n) != self.nil() {
                n = left(n);
            }
        }
        n
    }

    unsafe fn insert_node(&mut self, heap: &Heap, z: Link) {
        let nil = self.nil();
        // SAFETY: z is a fresh node in a free block; the tree is consistent.
        unsafe {
            let key = Self::key(heap, z);
            let mut y = nil;
            let mut x = self.root;
            while x != nil {
                y = x;
                x = if key < Self::key(heap, x) { left(x) } else { right(x) };
            }

            z.write(RbNode {
                parent_color: y as usize | RED,
                left: nil,
                right: nil,
            });
            if y == nil {
                self.root = z;
            } else if key < Self::key(heap, y) {
                (*y).left = z;
            } else {
                (*y).right = z;
            }
            self.insert_fixup(z);
        }
        self.len += 1;
    }

    unsafe fn insert_fixup(&mut self, mut z: Link) {
        // SAFETY: z is red and in the tree; the sentinel is black, so the
        // loop never climbs past the root.
        unsafe {
            while is_red(parent(z)) {
                let p = parent(z);
                let g = parent(p);
                if p == left(g) {
                    let uncle = right(g);
                    if is_red(uncle) {
                        set_red(p, false);
                        set_red(uncle, false);
                        set_red(g, true);
                        z = g;
                    } else {
                        if z == right(p) {
                            z = p;
                            self.rotate_left(z);
                        }
                        let p = parent(z);
                        let g = parent(p);
                        set_red(p, false);
                        set_red(g, true);
                        self.rotate_right(g);
                    }
                } else {
                    let uncle = left(g);
                    if is_red(uncle) {
                        set_red(p, false);
                        set_red(uncle, false);
                        set_red(g, true);
                        z = g;
                    } else {
                        if z == left(p) {
                            z = p;
                            self.rotate_right(z);
                        }
                        let p = parent(z);
                        let g = parent(p);
                        set_red(p, false);
                        set_red(g, true);
                        self.rotate_left(g);
                    }
                }
            }
            set_red(self.root, false);
        }
    }

    unsafe fn delete_node(&mut self, z: Link) {
        let nil = self.nil();
        // SAFETY: z is a node of this tree.
        unsafe {
            let mut removed_red = is_red(z);
            let x;
            if left(z) == nil {
                x = right(z);
                self.transplant(z, x);
            } else if right(z) == nil {
                x = left(z);
                self.transplant(z, x);
            } else {
                let y = self.minimum(right(z));
                removed_red = is_red(y);
                x = right(y);
                if parent(y) == z {
                    set_parent(x, y);
                } else {
                    self.transplant(y, x);
                    (*y).right = right(z);
                    set_parent(right(y), y);
                }
                self.transplant(z, y);
                (*y).left = left(z);
                set_parent(left(y), y);
                set_red(y, is_red(z));
            }
            if !removed_red {
                self.delete_fixup(x);
            }
        }
        self.len -= 1;
    }

    unsafe fn delete_fixup(&mut self, mut x: Link) {
        // SAFETY: x carries an extra black; its sibling is a real node while
        // the loop runs (black heights were equal before the removal).
        unsafe {
            while x != self.root && !is_red(x) {
                let p = parent(x);
                if x == left(p) {
                    let mut w = right(p);
                    if is_red(w) {
                        set_red(w, false);
                        set_red(p, true);
                        self.rotate_left(p);
                        w = right(parent(x));
                    }
                    if !is_red(left(w)) && !is_red(right(w)) {
                        set_red(w, true);
                        x = parent(x);
                    } else {
                        if !is_red(right(w)) {
                            set_red(left(w), false);
                            set_red(w, true);
                            self.rotate_right(w);
                            w = right(parent(x));
                        }
                        let p = parent(x);
                        set_red(w, is_red(p));
                        set_red(p, false);
                        set_red(right(w), false);
                        self.rotate_left(p);
                        x = self.root;
                    }
                } else {
                    let mut w = left(p);
                    if is_red(w) {
                        set_red(w, false);
                        set_red(p, true);
                        self.rotate_right(p);
                        w = left(parent(x));
                    }
                    if !is_red(left(w)) && !is_red(right(w)) {
                        set_red(w, true);
                        x = parent(x);
                    } else {
                        if !is_red(left(w)) {
                            set_red(right(w), false);
                            set_red(w, true);
                            self.rotate_left(w);
                            w = left(parent(x));
                        }
                        let p = parent(x);
                        set_red(w, is_red(p));
                        set_red(p, false);
                        set_red(left(w), false);
                        self.rotate_right(p);
                        x = self.root;
                    }
                }
            }
            set_red(x, false);
        }
    }

    /// Smallest node with key >= `size`; `exact` stops at the first equal key.
    unsafe fn lower_bound(&self, heap: &Heap, size: usize, exact: bool) -> Option<Link> {
        let nil = self.nil();
        let mut found = None;
        let mut x = self.root;
        // SAFETY: the tree is consistent.
        unsafe {
            while x != nil {
                let key = Self::key(heap, x);
                if key >= size {
                    if exact && key == size {
                        return Some(x);
                    }
                    found = Some(x);
                    x = left(x);
                } else {
                    x = right(x);
                }
            }
        }
        found
    }

    /// Checks one subtree; returns its black height and node count.
    unsafe fn check(
        &self,
        heap: &Heap,
        n: Link,
        lo: usize,
        hi: usize,
    ) -> Result<(usize, usize), &'static str> {
        if n == self.nil() {
            return Ok((1, 0));
        }
        // SAFETY: n is range checked before any field is read.
        unsafe {
            let block = block_of(n);
            if !heap.contains(block) {
                return Err("tree node outside the heap");
            }
            let tag = heap.header(block);
            if tag.is_allocated() {
                return Err("allocated block in the tree");
            }
            let key = tag.size();
            if key < lo || key > hi {
                return Err("tree not ordered by size");
            }
            for child in [left(n), right(n)] {
                if child != self.nil() && parent(child) != n {
                    return Err("broken parent link");
                }
                if is_red(n) && is_red(child) {
                    return Err("red node with a red child");
                }
            }
            let (left_height, left_count) = self.check(heap, left(n), lo, key)?;
            let (right_height, right_count) = self.check(heap, right(n), key, hi)?;
            if left_height != right_height {
                return Err("unequal black heights");
            }
            let height = left_height + usize::from(!is_red(n));
            Ok((height, left_count + right_count + 1))
        }
    }
}

// SAFETY: nodes are written only into blocks handed over by `insert`.
unsafe impl FreeIndex for RedBlackIndex {
    const NODE_SIZE: usize = core::mem::size_of::<RbNode>();

    fn new() -> Self {
        let sentinel = Box::new(RbNode {
            parent_color: 0,
            left: core::ptr::null_mut(),
            right: core::ptr::null_mut(),
        });
        let nil = NonNull::from(Box::leak(sentinel));
        Self {
            root: nil.as_ptr(),
            nil,
            len: 0,
        }
    }

    unsafe fn insert(&mut self, heap: &Heap, block: *mut u8) {
        // SAFETY: forwarded to the caller.
        unsafe { self.insert_node(heap, node_of(block)) }
    }

    unsafe fn remove(&mut self, _heap: &Heap, block: *mut u8) {
        // SAFETY: forwarded to the caller.
        unsafe { self.delete_node(node_of(block)) }
    }

    unsafe fn find(&self, heap: &Heap, size: usize, config: &ListConfig) -> Option<*mut u8> {
        let exact = config.fit == FitPolicy::Best;
        // SAFETY: forwarded to the caller.
        unsafe { self.lower_bound(heap, size, exact) }.map(block_of)
    }

    fn clear(&mut self) {
        self.root = self.nil();
        self.len = 0;
    }

    unsafe fn validate(&self, heap: &Heap, free_blocks: usize) -> Result<(), &'static str> {
        // SAFETY: the sentinel is ours; the root is checked like any node.
        unsafe {
            if is_red(self.nil()) {
                return Err("sentinel is red");
            }
            if self.root != self.nil() {
                if is_red(self.root) {
                    return Err("root is red");
                }
                if parent(self.root) != self.nil() {
                    return Err("root has a parent");
                }
            }
            let (_, count) = self.check(heap, self.root, 0, usize::MAX)?;
            if count != self.len || count != free_blocks {
                return Err("tree size differs from free blocks in the heap");
            }
        }
        Ok(())
    }
}

impl Drop for RedBlackIndex {
    fn drop(&mut self) {
        // SAFETY: the sentinel came from Box::leak in `new` and is freed once.
        drop(unsafe { Box::from_raw(self.nil.as_ptr()) });
    }
}

impl core::fmt::Debug for RedBlackIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedBlackIndex")
            .field("free_blocks", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::sealed::AllocatorInternal;
    use crate::allocator::tagged::{RedBlackTreeAllocator, TAG_OVERHEAD};
    use crate::allocator::{Allocator, Block};

    #[test]
    fn sentinel_is_black_and_tree_starts_with_one_block() {
        let alloc = RedBlackTreeAllocator::new(1024).expect("allocator");
        alloc.internal_validate().expect("valid tree");
        assert_eq!(alloc.internal_fragmentation().fragment_count, 1);
    }

    #[test]
    fn many_holes_keep_tree_balanced() {
        let alloc = RedBlackTreeAllocator::new(64 * 1024).expect("allocator");
        let mut blocks: Vec<Block> = (0..200).map(|i| alloc.allocate(24 + (i % 13) * 8)).collect();
        assert!(blocks.iter().all(Block::is_valid));

        // Every other block: 100 non-adjacent holes of mixed sizes.
        for block in blocks.iter_mut().step_by(2) {
            // SAFETY: every block is a live allocation of `alloc`.
            assert!(unsafe { alloc.deallocate(block) });
        }
        alloc.internal_validate().expect("valid tree after inserts");
        assert_eq!(alloc.internal_fragmentation().fragment_count, 101);

        for block in blocks.iter_mut().skip(1).step_by(2) {
            // SAFETY: the odd blocks are still live.
            assert!(unsafe { alloc.deallocate(block) });
            alloc.internal_validate().expect("valid tree after merge");
        }
        assert_eq!(alloc.internal_fragmentation().fragment_count, 1);
    }

    #[test]
    fn picks_smallest_adequate_hole() {
        let alloc = RedBlackTreeAllocator::new(4096).expect("allocator");
        let sizes = [256, 64, 128, 96];
        let mut blocks: Vec<Block> = sizes
            .iter()
            .flat_map(|&size| [alloc.allocate(size), alloc.allocate(8)])
            .collect();
        let hole_128 = blocks[4].as_ptr();
        for block in blocks.iter_mut().step_by(2) {
            // SAFETY: live allocations of `alloc`.
            unsafe { alloc.deallocate(block) };
        }
        alloc.internal_validate().expect("valid tree");

        // 100 bytes fits the 128 hole (tightest), not 256 or the tail.
        assert_eq!(alloc.allocate(100).as_ptr(), hole_128);
        assert!(
            alloc
                .block_map()
                .iter()
                .any(|tag| tag.is_allocated() && tag.size() == 128 + TAG_OVERHEAD)
        );
        alloc.internal_validate().expect("valid tree");
    }
}
