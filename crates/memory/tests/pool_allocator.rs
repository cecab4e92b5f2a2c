use carve_memory::allocator::{
    Allocator, AllocatorInternal, ChunkAllocator, LockingPoolAllocator, PoolAllocator, PoolConfig,
    Resettable,
};
use carve_memory::prelude::{MemoryUsage, StatisticsProvider};
use pretty_assertions::assert_eq;

#[derive(Debug, PartialEq)]
struct Particle {
    position: [f32; 3],
    velocity: [f32; 3],
    age: u32,
}

#[test]
fn pool_serves_exactly_its_chunk_count() {
    let pool = PoolAllocator::new(64, 8, 4).unwrap();
    let blocks: Vec<_> = (0..4).map(|_| pool.allocate(64)).collect();
    assert!(blocks.iter().all(|b| b.is_valid()));
    assert!(pool.is_full());
    assert!(!pool.allocate(1).is_valid());

    assert!(!pool.allocate(65).is_valid(), "larger than a chunk");
}

#[test]
fn freed_chunk_is_reused_first() {
    let pool = PoolAllocator::new(32, 8, 8).unwrap();
    let _a = pool.allocate(32);
    let mut b = pool.allocate(32);
    let freed = b.as_ptr();
    // SAFETY: b came from this pool.
    assert!(unsafe { pool.deallocate(&mut b) });
    assert_eq!(pool.allocate(32).as_ptr(), freed);
}

#[test]
fn interior_pointers_are_rejected() {
    let pool = PoolAllocator::new(64, 8, 2).unwrap();
    let block = pool.allocate(64);
    // SAFETY: the pointer is inside a chunk but not at its start.
    assert!(!unsafe { pool.deallocate_ptr(block.as_ptr().add(8)) });
    assert_eq!(pool.allocated_chunks(), 1);
    pool.internal_validate().unwrap();
}

#[test]
fn typed_values_round_trip() {
    let pool = PoolAllocator::for_type::<Particle>(16).unwrap();
    assert!(pool.fits::<Particle>());
    assert!(!pool.fits::<[Particle; 2]>());

    let particle = pool
        .create(Particle {
            position: [1.0, 2.0, 3.0],
            velocity: [0.0; 3],
            age: 7,
        })
        .unwrap();
    // SAFETY: created above and still live.
    let live = unsafe { particle.as_ref() };
    assert_eq!(live.position, [1.0, 2.0, 3.0]);
    assert_eq!(live.velocity, [0.0; 3]);
    assert_eq!(live.age, 7);
    // SAFETY: created by this pool, not used afterwards.
    assert!(unsafe { pool.destroy(particle) });
    assert_eq!(pool.used_memory(), 0);
}

#[test]
fn reset_returns_every_chunk() {
    let pool = PoolAllocator::with_config(16, 8, 8, PoolConfig::production()).unwrap();
    for _ in 0..8 {
        assert!(pool.allocate(16).is_valid());
    }
    // SAFETY: no block is used after the reset.
    unsafe { pool.reset() };
    assert_eq!(pool.free_chunks(), 8);
    pool.internal_validate().unwrap();
}

#[test]
fn sorted_locking_pool_hands_out_lowest_chunk() {
    let config = PoolConfig {
        sorted_free: true,
        ..PoolConfig::default()
    };
    let pool = LockingPoolAllocator::with_config(32, 8, 4, config).unwrap();
    let blocks: Vec<_> = (0..4).map(|_| pool.allocate(32)).collect();
    let lowest = blocks[0].as_ptr();

    // Free in reverse; the lowest address must still come back first.
    for block in blocks.iter().rev() {
        // SAFETY: every block came from this pool and is freed once.
        assert!(unsafe { pool.deallocate_ptr(block.as_ptr()) });
    }
    assert_eq!(pool.allocate(32).as_ptr(), lowest);
    pool.internal_validate().unwrap();
}

#[test]
fn pool_over_borrowed_memory() {
    let mut storage = vec![0u64; 64];
    let block = carve_memory::allocator::Block::from_slice(as_bytes(&mut storage));
    // SAFETY: `storage` outlives the pool and is not touched while it exists.
    let pool = unsafe { PoolAllocator::from_block(block, 64, 8, PoolConfig::default()) }.unwrap();
    assert!(!pool.owns_backing());
    assert_eq!(pool.chunk_count(), 8);
}

fn as_bytes(words: &mut [u64]) -> &mut [u8] {
    let len = core::mem::size_of_val(words);
    // SAFETY: u64 has no padding and any byte pattern is valid for u8.
    unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr().cast(), len) }
}

/// Allocates two 8-byte requests from 16-byte chunks and frees one.
fn assert_chunk_statistics<P: Allocator + StatisticsProvider>(pool: &P) {
    let kept = pool.allocate(8);
    let freed = pool.allocate(8);
    assert!(kept.is_valid() && freed.is_valid());
    // SAFETY: `freed` came from this pool and is released once.
    assert!(unsafe { pool.deallocate_ptr(freed.as_ptr()) });

    let stats = pool.statistics();
    assert_eq!(stats.allocation_count, 2);
    assert_eq!(stats.deallocation_count, 1);
    assert_eq!(stats.allocated_bytes, 16, "one live chunk");
    assert_eq!(stats.peak_allocated_bytes, 32);
}

#[test]
fn statistics_count_whole_chunks_on_both_sides() {
    let config = PoolConfig {
        track_stats: true,
        ..PoolConfig::production()
    };
    assert_chunk_statistics(&PoolAllocator::with_config(16, 8, 4, config.clone()).unwrap());
    assert_chunk_statistics(&LockingPoolAllocator::with_config(16, 8, 4, config).unwrap());
}
