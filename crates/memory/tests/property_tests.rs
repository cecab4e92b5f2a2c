//! Random allocate/free sequences against every boundary-tag index

use carve_memory::allocator::tagged::{
    ExplicitIndex, FreeIndex, ImplicitIndex, RedBlackIndex, SegregatedIndex, request_class,
};
use carve_memory::allocator::{
    Allocator, AllocatorInternal, Block, FitPolicy, LinearAllocator, ListConfig, Margin,
    PoolAllocator, TaggedAllocator,
};
use proptest::prelude::*;

const CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone)]
enum Op {
    Alloc(usize),
    /// Frees the live block at this index modulo the live count.
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..600).prop_map(Op::Alloc),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

fn fit() -> impl Strategy<Value = FitPolicy> {
    prop_oneof![Just(FitPolicy::First), Just(FitPolicy::Best)]
}

fn fallthrough(fit: FitPolicy) -> ListConfig {
    ListConfig {
        fit,
        class_fallthrough: true,
        ..ListConfig::production()
    }
}

/// Replays `ops`, stamping each live block with its own tag byte and
/// checking stamps, structure and disjointness after every step.
fn replay<I: FreeIndex>(config: ListConfig, ops: &[Op]) -> Result<(), TestCaseError> {
    let alloc = TaggedAllocator::<I>::with_config(CAPACITY, config).unwrap();
    let mut live: Vec<(Block, u8)> = Vec::new();

    for (step, op) in ops.iter().enumerate() {
        match *op {
            Op::Alloc(size) => {
                let block = alloc.allocate(size);
                if block.is_valid() {
                    let stamp = step as u8;
                    // SAFETY: the block is ours and `size` bytes long.
                    unsafe { block.fill(stamp) };
                    live.push((block, stamp));
                }
            }
            Op::Free(index) if !live.is_empty() => {
                let (block, _) = live.swap_remove(index % live.len());
                // SAFETY: the block is live and freed once.
                let freed = unsafe { alloc.deallocate_ptr(block.as_ptr()) };
                prop_assert!(freed);
            }
            Op::Free(_) => {}
        }

        prop_assert_eq!(alloc.internal_validate(), Ok(()));
        for (block, stamp) in &live {
            // SAFETY: live blocks stay readable for their full size.
            let bytes = unsafe { core::slice::from_raw_parts(block.as_ptr(), block.size()) };
            prop_assert!(bytes.iter().all(|b| b == stamp), "block was overwritten");
        }
    }

    for (block, _) in live.drain(..) {
        // SAFETY: the block is live and freed once.
        let freed = unsafe { alloc.deallocate_ptr(block.as_ptr()) };
        prop_assert!(freed);
    }
    prop_assert_eq!(alloc.block_map(), vec![Margin::free(CAPACITY)]);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn implicit_list_stays_consistent(fit in fit(), ops in prop::collection::vec(op(), 1..120)) {
        replay::<ImplicitIndex>(fallthrough(fit), &ops)?;
    }

    #[test]
    fn explicit_list_stays_consistent(fit in fit(), ops in prop::collection::vec(op(), 1..120)) {
        replay::<ExplicitIndex>(fallthrough(fit), &ops)?;
    }

    #[test]
    fn segregated_lists_stay_consistent(fit in fit(), ops in prop::collection::vec(op(), 1..120)) {
        replay::<SegregatedIndex>(fallthrough(fit), &ops)?;
    }

    #[test]
    fn strict_segregated_lists_stay_consistent(fit in fit(), ops in prop::collection::vec(op(), 1..120)) {
        replay::<SegregatedIndex>(ListConfig { fit, ..ListConfig::production() }, &ops)?;
    }

    #[test]
    fn strict_segregated_fails_only_without_room_in_class(
        fit in fit(),
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let config = ListConfig { fit, ..ListConfig::production() };
        let alloc = TaggedAllocator::<SegregatedIndex>::with_config(CAPACITY, config).unwrap();
        let mut live: Vec<Block> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    let block = alloc.allocate(size);
                    if block.is_valid() {
                        live.push(block);
                        continue;
                    }
                    let needed = TaggedAllocator::<SegregatedIndex>::block_size_for(size).unwrap();
                    let class = request_class(needed);
                    let adequate = alloc
                        .block_map()
                        .into_iter()
                        .filter(|m| m.is_free() && request_class(m.size()) == class)
                        .any(|m| m.size() >= needed);
                    prop_assert!(!adequate, "class {} had room for {} bytes", class, size);
                }
                Op::Free(index) if !live.is_empty() => {
                    let block = live.swap_remove(index % live.len());
                    // SAFETY: the block is live and freed once.
                    let freed = unsafe { alloc.deallocate_ptr(block.as_ptr()) };
                    prop_assert!(freed);
                }
                Op::Free(_) => {}
            }
        }
        prop_assert_eq!(alloc.internal_validate(), Ok(()));
    }

    #[test]
    fn red_black_tree_stays_consistent(fit in fit(), ops in prop::collection::vec(op(), 1..120)) {
        replay::<RedBlackIndex>(fallthrough(fit), &ops)?;
    }

    #[test]
    fn block_size_covers_request(size in 1usize..1 << 20) {
        let total = TaggedAllocator::<RedBlackIndex>::block_size_for(size).unwrap();
        prop_assert!(total >= size + 16);
        prop_assert_eq!(total % 8, 0);
        prop_assert!(total >= TaggedAllocator::<RedBlackIndex>::MIN_BLOCK);
    }

    #[test]
    fn linear_blocks_are_consecutive(sizes in prop::collection::vec(1usize..200, 1..40)) {
        let alloc = LinearAllocator::new(CAPACITY).unwrap();
        let mut expected = None;
        for size in sizes {
            let block = alloc.allocate(size);
            prop_assert!(block.is_valid());
            if let Some(next) = expected {
                prop_assert_eq!(block.as_ptr() as usize, next);
            }
            expected = Some(block.as_ptr() as usize + size.next_multiple_of(8));
        }
    }

    #[test]
    fn pool_free_list_survives_any_order(order in Just((0..32usize).collect::<Vec<_>>()).prop_shuffle()) {
        let pool = PoolAllocator::new(48, 16, 32).unwrap();
        let blocks: Vec<Block> = (0..32).map(|_| pool.allocate(48)).collect();
        prop_assert!(pool.is_full());
        for i in order {
            // SAFETY: each block is freed once.
            let freed = unsafe { pool.deallocate_ptr(blocks[i].as_ptr()) };
            prop_assert!(freed);
        }
        prop_assert_eq!(pool.free_chunks(), 32);
        prop_assert_eq!(pool.internal_validate(), Ok(()));
    }
}
