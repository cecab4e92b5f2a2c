use std::collections::HashSet;
use std::thread;

use carve_memory::allocator::{
    AccumulatingAllocator, AccumulatingConfig, Allocator, AllocatorInternal, Block,
    ExplicitListAllocator, LinearAllocator, LinearConfig, LockingPoolAllocator, PoolAllocator,
    PoolConfig, RedBlackTreeAllocator,
};

const THREADS: usize = 8;
const ROUNDS: usize = 500;

/// Every thread repeatedly allocates, stamps, checks and frees its blocks.
fn churn<A: Allocator + Sync>(alloc: &A, size: usize) {
    thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move || {
                let stamp = t as u8 + 1;
                let mut held = Vec::new();
                for round in 0..ROUNDS {
                    let block = alloc.allocate(size);
                    if block.is_valid() {
                        // SAFETY: the block is exclusively ours.
                        unsafe { block.fill(stamp) };
                        held.push(block);
                    }
                    if round % 3 == 2 {
                        for block in held.drain(..) {
                            // SAFETY: nobody else wrote to our block.
                            let first = unsafe { *block.as_ptr() };
                            assert_eq!(first, stamp, "block shared between threads");
                            // SAFETY: the block came from `alloc` and is freed once.
                            assert!(unsafe { alloc.deallocate_ptr(block.as_ptr()) });
                        }
                    }
                }
                for block in held {
                    // SAFETY: as above.
                    unsafe { alloc.deallocate_ptr(block.as_ptr()) };
                }
            });
        }
    });
}

#[test]
fn lock_free_pool_under_contention() {
    let pool = PoolAllocator::new(64, 8, THREADS * 2).unwrap();
    churn(&pool, 64);
    assert_eq!(pool.free_chunks(), THREADS * 2);
    pool.internal_validate().unwrap();
}

#[test]
fn lock_free_pool_never_fails_while_chunks_are_free() {
    let pool = PoolAllocator::with_config(
        16,
        8,
        THREADS * 4,
        PoolConfig {
            use_backoff: false,
            ..PoolConfig::production()
        },
    )
    .unwrap();

    let failures: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    let mut failed = 0;
                    for _ in 0..ROUNDS * 20 {
                        let block = pool.allocate(16);
                        if !block.is_valid() {
                            failed += 1;
                            continue;
                        }
                        // SAFETY: the block came from `pool` and is freed once.
                        assert!(unsafe { pool.deallocate_ptr(block.as_ptr()) });
                    }
                    failed
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(failures, 0);
    assert_eq!(pool.free_chunks(), THREADS * 4);
    pool.internal_validate().unwrap();
}

#[test]
fn locking_pool_under_contention() {
    let pool = LockingPoolAllocator::new(64, 8, THREADS * 2).unwrap();
    churn(&pool, 64);
    pool.internal_validate().unwrap();
}

#[test]
fn red_black_tree_under_contention() {
    let alloc = RedBlackTreeAllocator::new(64 * 1024).unwrap();
    churn(&alloc, 200);
    alloc.internal_validate().unwrap();
    assert_eq!(alloc.internal_fragmentation().fragment_count, 1);
}

#[test]
fn explicit_list_under_contention() {
    let alloc = ExplicitListAllocator::new(64 * 1024).unwrap();
    churn(&alloc, 96);
    alloc.internal_validate().unwrap();
}

#[test]
fn accumulating_growth_under_contention() {
    let alloc = AccumulatingAllocator::<RedBlackTreeAllocator>::with_config(AccumulatingConfig {
        min_block_size: 1024,
        ..AccumulatingConfig::default()
    })
    .unwrap();
    churn(&alloc, 128);
    alloc.internal_validate().unwrap();
}

#[test]
fn linear_cursor_hands_out_disjoint_ranges() {
    let config = LinearConfig {
        use_backoff: false,
        ..LinearConfig::production()
    };
    let alloc = LinearAllocator::with_config(THREADS * ROUNDS * 16, config).unwrap();
    let starts: Vec<Vec<usize>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    (0..ROUNDS)
                        .map(|_| alloc.allocate(16))
                        .filter(Block::is_valid)
                        .map(|b| b.as_ptr() as usize)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let all: Vec<usize> = starts.into_iter().flatten().collect();
    assert_eq!(all.len(), THREADS * ROUNDS);
    let unique: HashSet<usize> = all.iter().copied().collect();
    assert_eq!(unique.len(), all.len());
    assert_eq!(alloc.remaining(), 0);
}
