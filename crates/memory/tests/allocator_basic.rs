//! Behaviour every strategy shares through the `Allocator` contract

use carve_memory::allocator::{
    Allocator, Block, ExplicitListAllocator, ImplicitListAllocator, LinearAllocator, ListConfig,
    LockingPoolAllocator, PoolAllocator, RedBlackTreeAllocator, SegregatedListAllocator,
};
use carve_memory::utils::ALIGNMENT;
use rstest::rstest;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

type Shared = Box<dyn Allocator + Send + Sync>;

fn boxed(alloc: impl Allocator + Send + Sync + 'static) -> Shared {
    Box::new(alloc)
}

fn strategies() -> Vec<(&'static str, Shared)> {
    vec![
        ("linear", boxed(LinearAllocator::new(4096).unwrap())),
        ("pool", boxed(PoolAllocator::new(128, 8, 32).unwrap())),
        ("locking-pool", boxed(LockingPoolAllocator::new(128, 8, 32).unwrap())),
        ("implicit", boxed(ImplicitListAllocator::new(4096).unwrap())),
        ("explicit", boxed(ExplicitListAllocator::new(4096).unwrap())),
        // Small classes start empty; let them borrow from the large class.
        (
            "segregated",
            boxed(
                SegregatedListAllocator::with_config(
                    4096,
                    ListConfig {
                        class_fallthrough: true,
                        ..ListConfig::default()
                    },
                )
                .unwrap(),
            ),
        ),
        ("red-black", boxed(RedBlackTreeAllocator::new(4096).unwrap())),
    ]
}

#[test]
fn zero_sized_requests_are_invalid() {
    init_tracing();
    for (name, alloc) in strategies() {
        assert!(!alloc.allocate(0).is_valid(), "{name}");
    }
}

#[test]
fn blocks_are_aligned_writable_and_owned() {
    init_tracing();
    for (name, alloc) in strategies() {
        let block = alloc.allocate(100);
        assert!(block.is_valid(), "{name}");
        assert!(block.size() >= 100, "{name}");
        assert_eq!(block.as_ptr() as usize % ALIGNMENT, 0, "{name}");
        assert!(alloc.contains(&block), "{name}");

        // SAFETY: the block is ours and at least 100 bytes long.
        unsafe {
            block.fill(0x5A);
            assert_eq!(*block.as_ptr().add(99), 0x5A);
        }
    }
}

#[test]
fn live_blocks_do_not_overlap() {
    for (name, alloc) in strategies() {
        let blocks: Vec<Block> = (0..8).map(|_| alloc.allocate(64)).collect();
        for (i, a) in blocks.iter().enumerate() {
            assert!(a.is_valid(), "{name}");
            for b in &blocks[i + 1..] {
                assert!(
                    a.end() <= b.as_ptr() as usize || b.end() <= a.as_ptr() as usize,
                    "{name}: overlapping blocks"
                );
            }
        }
    }
}

#[test]
fn foreign_pointers_are_rejected() {
    let mut outside = [0u64; 4];
    let foreign = outside.as_mut_ptr().cast::<u8>();
    for (name, alloc) in strategies() {
        assert!(!alloc.contains_ptr(foreign), "{name}");
        // SAFETY: the pointer is not owned, so nothing is touched.
        assert!(!unsafe { alloc.deallocate_ptr(foreign) }, "{name}");
    }
}

#[test]
fn deallocate_invalidates_the_block() {
    for (name, alloc) in strategies() {
        let mut block = alloc.allocate(32);
        // SAFETY: the block came from this allocator.
        assert!(unsafe { alloc.deallocate(&mut block) }, "{name}");
        assert!(!block.is_valid(), "{name}");
        // SAFETY: an invalid block is rejected up front.
        assert!(!unsafe { alloc.deallocate(&mut block) }, "{name}");
    }
}

#[rstest]
#[case::implicit(boxed(ImplicitListAllocator::new(1024).unwrap()))]
#[case::explicit(boxed(ExplicitListAllocator::new(1024).unwrap()))]
#[case::segregated(boxed(SegregatedListAllocator::new(1024).unwrap()))]
#[case::red_black(boxed(RedBlackTreeAllocator::new(1024).unwrap()))]
fn exhaustion_is_a_value_not_a_panic(#[case] alloc: Shared) {
    assert!(!alloc.allocate(1024).is_valid());
    assert!(alloc.try_allocate(1024).is_err());
    assert!(alloc.allocate(256).is_valid());
}

#[test]
fn allocate_zeroed_clears_reused_memory() {
    let alloc = ExplicitListAllocator::new(1024).unwrap();
    let mut dirty = alloc.allocate(64);
    // SAFETY: the block is ours; it is returned right after.
    unsafe {
        dirty.fill(0xFF);
        alloc.deallocate(&mut dirty);
    }

    let clean = alloc.allocate_zeroed(64);
    // SAFETY: the block spans 64 initialized bytes.
    let bytes = unsafe { core::slice::from_raw_parts(clean.as_ptr(), 64) };
    assert!(bytes.iter().all(|&b| b == 0));
}
