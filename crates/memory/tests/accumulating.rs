use carve_memory::allocator::{
    AccumulatingAllocator, AccumulatingConfig, AccumulatingPool, Allocator, AllocatorInternal,
    Block, ChunkAllocator, ImplicitListAllocator, LinearAllocator, PoolConfig,
    RedBlackTreeAllocator, SegregatedListAllocator,
};
use pretty_assertions::assert_eq;

fn config(min_block_size: usize) -> AccumulatingConfig {
    AccumulatingConfig {
        min_block_size,
        growth_factor: 2,
        initial_pool_chunks: 8,
    }
}

#[test]
fn empty_wrapper_owns_nothing() {
    let alloc = AccumulatingAllocator::<RedBlackTreeAllocator>::new();
    assert_eq!(alloc.instance_count(), 0);
    assert_eq!(alloc.capacity(), 0);
    assert!(!alloc.allocate(0).is_valid());
    assert_eq!(alloc.instance_count(), 0);
}

#[test]
fn each_instance_doubles_the_previous() {
    let alloc = AccumulatingAllocator::<ImplicitListAllocator>::with_config(config(1024)).unwrap();
    let mut blocks = Vec::new();
    for _ in 0..40 {
        let block = alloc.allocate(200);
        assert!(block.is_valid());
        blocks.push(block);
    }
    // 216-byte blocks: 4 in 1 KiB, 9 in 2 KiB, 18 in 4 KiB, the rest in 8 KiB.
    assert_eq!(alloc.instance_count(), 4);
    assert_eq!(alloc.capacity(), 1024 + 2048 + 4096 + 8192);

    for block in &blocks {
        // SAFETY: every block came from `alloc`.
        assert!(unsafe { alloc.deallocate_ptr(block.as_ptr()) });
    }
    alloc.internal_validate().unwrap();
    // Freed space is kept, not returned.
    assert_eq!(alloc.instance_count(), 4);
}

#[test]
fn freed_space_is_reused_before_growing() {
    let alloc = AccumulatingAllocator::<RedBlackTreeAllocator>::with_config(config(512)).unwrap();
    let mut first = alloc.allocate(400);
    // SAFETY: `first` came from `alloc`.
    assert!(unsafe { alloc.deallocate(&mut first) });
    assert!(alloc.allocate(400).is_valid());
    assert_eq!(alloc.instance_count(), 1);
}

#[test]
fn requests_larger_than_the_growth_step_get_room() {
    let alloc = AccumulatingAllocator::<SegregatedListAllocator>::with_config(config(256)).unwrap();
    let block = alloc.allocate(5000);
    assert!(block.is_valid());
    assert_eq!(alloc.instance_count(), 1);
    assert!(alloc.capacity() >= 5000);
}

#[test]
fn unservable_requests_do_not_add_instances() {
    // A fresh segregated heap is one block in the largest class, and small
    // requests do not fall through to it.
    let alloc = AccumulatingAllocator::<SegregatedListAllocator>::with_config(config(256)).unwrap();
    for _ in 0..5 {
        assert!(!alloc.allocate(8).is_valid());
    }
    assert_eq!(alloc.instance_count(), 0);
    assert_eq!(alloc.capacity(), 0);

    // Requests the largest class can take still grow the wrapper.
    assert!(alloc.allocate(100).is_valid());
    assert_eq!(alloc.instance_count(), 1);
}

#[test]
fn deallocate_all_releases_every_instance() {
    let alloc = AccumulatingAllocator::<LinearAllocator>::with_config(config(128)).unwrap();
    let blocks: Vec<Block> = (0..10).map(|_| alloc.allocate(64)).collect();
    assert!(blocks.iter().all(Block::is_valid));
    assert!(alloc.instance_count() > 1);

    // SAFETY: no block is used afterwards.
    unsafe { alloc.deallocate_all() };
    assert_eq!(alloc.instance_count(), 0);
    assert!(!alloc.contains(&blocks[0]));

    // Growth starts over from the minimum.
    assert!(alloc.allocate(64).is_valid());
    assert_eq!(alloc.capacity(), 128);
}

#[test]
fn invalid_growth_policy_is_rejected() {
    let bad = AccumulatingConfig {
        min_block_size: 0,
        ..AccumulatingConfig::default()
    };
    assert!(AccumulatingAllocator::<LinearAllocator>::with_config(bad.clone()).is_err());
    assert!(AccumulatingPool::<u32>::with_config(bad, PoolConfig::default()).is_err());
}

#[derive(Debug)]
struct Node {
    id: u32,
    weight: f64,
}

#[test]
fn pool_grows_by_the_aggregate() {
    let pool = AccumulatingPool::<Node>::with_config(config(0x100), PoolConfig::production()).unwrap();
    let nodes: Vec<_> = (0..30)
        .map(|id| {
            pool.alloc(Node {
                id,
                weight: f64::from(id) / 2.0,
            })
            .unwrap()
        })
        .collect();

    // 8, then 16 (2 x 8), then 48 (2 x 24).
    assert_eq!(pool.pool_count(), 3);
    assert_eq!(pool.capacity(), 8 + 16 + 48);
    assert_eq!(pool.allocated(), 30);
    assert!(pool.fits::<Node>());

    for (id, node) in (0u32..).zip(&nodes) {
        // SAFETY: each pointer holds a live node.
        let node = unsafe { node.as_ref() };
        assert_eq!(node.id, id);
        assert!((node.weight - f64::from(id) / 2.0).abs() < f64::EPSILON);
    }
    for node in nodes {
        // SAFETY: created by this pool and not used afterwards.
        assert!(unsafe { pool.destroy(node) });
    }
    assert_eq!(pool.allocated(), 0);
    pool.internal_validate().unwrap();
}

#[test]
fn pool_rejects_requests_larger_than_a_chunk() {
    let pool = AccumulatingPool::<u64>::with_config(config(64), PoolConfig::production()).unwrap();
    assert_eq!(pool.chunk_size(), 8);
    assert!(!pool.allocate(9).is_valid());
    assert_eq!(pool.pool_count(), 0);
}
