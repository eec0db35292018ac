//! Pool lifecycle, concurrency, and corruption behavior

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cellpool::{
    BumpBackend, ChunkState, MemoryPool, MultiRegionBackend, OwnerId, PoolConfig, PoolError,
    WaitBudget,
};

const ELEM: usize = 64;

fn pool_of(capacity: usize) -> MemoryPool {
    MemoryPool::with_capacity(ELEM, capacity).unwrap()
}

fn accounting_holds(pool: &MemoryPool<impl cellpool::Backend>) -> bool {
    pool.capacity() == pool.used_count() + pool.free_count() + pool.blocked_count()
}

#[test]
fn test_reference_scenario_twenty_chunks() {
    let pool = pool_of(20);
    assert_eq!(pool.capacity(), 20);
    assert!(accounting_holds(&pool));

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire(WaitBudget::ZERO).unwrap());
    }
    assert_eq!(pool.used_count(), 5);
    assert_eq!(pool.free_count(), 15);
    assert_eq!(pool.blocked_count(), 0);
    assert!(accounting_holds(&pool));

    // Block one of the still-free chunks.
    assert!(pool.set_blocked(10, true, WaitBudget::ZERO));
    assert_eq!(pool.blocked_count(), 1);
    assert_eq!(pool.free_count(), 14);
    assert!(accounting_holds(&pool));

    for ptr in held {
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
    }
    assert_eq!(pool.used_count(), 0);
    assert_eq!(pool.free_count(), 19);
    assert_eq!(pool.blocked_count(), 1);
    assert!(accounting_holds(&pool));
}

#[test]
fn test_acquire_all_buffers_distinct() {
    let pool = pool_of(16);
    let mut seen = HashSet::new();
    let mut held = Vec::new();
    for _ in 0..16 {
        let ptr = pool.acquire(WaitBudget::ZERO).unwrap();
        assert!(seen.insert(ptr.as_ptr() as usize));
        held.push(ptr);
    }
    assert!(pool.is_empty());

    // Buffers are writable across their full advertised size.
    for ptr in &held {
        unsafe { ptr.as_ptr().write_bytes(0xC3, ELEM) };
    }
    for ptr in held {
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
    }
    assert_eq!(pool.free_count(), 16);
}

#[test]
fn test_bounded_wait_succeeds_when_peer_releases() {
    let pool = Arc::new(pool_of(1));
    let held = pool.acquire(WaitBudget::ZERO).unwrap();
    let addr = held.as_ptr() as usize;

    let waiter = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || {
            pool.acquire(WaitBudget::from_millis(2_000))
                .map(|ptr| ptr.as_ptr() as usize)
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    pool.release(held, WaitBudget::FOREVER).unwrap();

    let got_addr = waiter.join().unwrap().unwrap();
    assert_eq!(got_addr, addr);
    pool.release(NonNull::new(got_addr as *mut u8).unwrap(), WaitBudget::FOREVER)
        .unwrap();
}

#[test]
fn test_bounded_wait_expires_on_exhausted_pool() {
    let pool = pool_of(2);
    let a = pool.acquire(WaitBudget::ZERO).unwrap();
    let b = pool.acquire(WaitBudget::ZERO).unwrap();

    let err = pool.acquire(WaitBudget::from_millis(20)).unwrap_err();
    assert_eq!(err, PoolError::AllocationExhausted);
    assert!(err.is_retryable());

    pool.release(a, WaitBudget::FOREVER).unwrap();
    pool.release(b, WaitBudget::FOREVER).unwrap();
}

#[test]
fn test_blocked_chunk_never_served() {
    let pool = pool_of(3);
    assert!(pool.set_blocked(0, true, WaitBudget::ZERO));
    let blocked_addr = pool.chunk_info(0).unwrap().buffer_addr;

    // Drain the pool; the blocked chunk must not appear even at exhaustion.
    let a = pool.acquire(WaitBudget::ZERO).unwrap();
    let b = pool.acquire(WaitBudget::ZERO).unwrap();
    assert_ne!(a.as_ptr() as usize, blocked_addr);
    assert_ne!(b.as_ptr() as usize, blocked_addr);
    assert_eq!(pool.acquire(WaitBudget::ZERO), Err(PoolError::AllocationExhausted));

    // Unblocking returns it to circulation.
    assert!(pool.set_blocked(0, false, WaitBudget::ZERO));
    let c = pool.acquire(WaitBudget::ZERO).unwrap();
    assert_eq!(c.as_ptr() as usize, blocked_addr);

    for ptr in [a, b, c] {
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
    }
}

#[test]
fn test_overrun_detected_repaired_and_chunk_reused() {
    let pool = pool_of(4);
    let ptr = pool.acquire(WaitBudget::ZERO).unwrap();

    // Write past the usable buffer into the guard.
    unsafe { ptr.as_ptr().write_bytes(0xFF, ELEM + 1) };
    assert!(pool.chunk_info(0).unwrap().corrupted);

    // Release succeeds, reports the trampled guard, repairs it, and zeroes
    // the buffer.
    assert_eq!(pool.release(ptr, WaitBudget::FOREVER), Ok(true));
    let info = pool.chunk_info(0).unwrap();
    assert_eq!(info.state, ChunkState::Free);
    assert!(!info.corrupted);

    let again = pool.acquire(WaitBudget::ZERO).unwrap();
    assert_eq!(again, ptr);
    let fresh = unsafe { std::slice::from_raw_parts(again.as_ptr(), ELEM) };
    assert!(fresh.iter().all(|&b| b == 0));
    pool.release(again, WaitBudget::FOREVER).unwrap();
}

#[test]
fn test_exclusive_claim_crosses_threads_only_with_identity() {
    let pool = Arc::new(pool_of(2));
    let producer = OwnerId::from_raw(900);

    let ptr = pool.acquire_as(WaitBudget::ZERO, producer, true).unwrap();
    let addr = ptr.as_ptr() as usize;

    let pool2 = Arc::clone(&pool);
    std::thread::spawn(move || {
        let ptr = NonNull::new(addr as *mut u8).unwrap();
        // A thread without the claiming identity is refused.
        assert_eq!(pool2.release(ptr, WaitBudget::FOREVER), Err(PoolError::OwnershipViolation));
        // The same thread carrying the identity succeeds.
        pool2.release_as(ptr, producer, WaitBudget::FOREVER).unwrap();
    })
    .join()
    .unwrap();

    assert_eq!(pool.free_count(), 2);
}

#[test]
fn test_growth_preserves_indices_and_buffers() {
    let pool = pool_of(2);
    let a = pool.acquire(WaitBudget::ZERO).unwrap();
    unsafe { a.as_ptr().write_bytes(0x77, ELEM) };
    let info_before = pool.chunk_info(0).unwrap();

    assert!(pool.add_memory(6));
    assert_eq!(pool.capacity(), 8);

    // Chunk 0 is untouched: same state, same buffer, same contents.
    let info_after = pool.chunk_info(0).unwrap();
    assert_eq!(info_after.state, ChunkState::Used);
    assert_eq!(info_after.buffer_addr, info_before.buffer_addr);
    let contents = unsafe { std::slice::from_raw_parts(a.as_ptr(), ELEM) };
    assert!(contents.iter().all(|&b| b == 0x77));

    pool.release(a, WaitBudget::FOREVER).unwrap();
    assert_eq!(pool.free_count(), 8);
}

#[test]
fn test_growth_wakes_unbounded_waiter() {
    let pool = Arc::new(pool_of(1));
    let held = pool.acquire(WaitBudget::ZERO).unwrap();
    let held_addr = held.as_ptr() as usize;

    // The waiter parks with no deadline; only growth can satisfy it since
    // the sole chunk stays held until after the join.
    let waiter = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || {
            pool.acquire(WaitBudget::FOREVER)
                .map(|ptr| ptr.as_ptr() as usize)
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    assert!(pool.add_memory(1));

    let got_addr = waiter.join().unwrap().unwrap();
    assert_ne!(got_addr, held_addr);
    assert_eq!(pool.used_count(), 2);

    pool.release(held, WaitBudget::FOREVER).unwrap();
    pool.release(NonNull::new(got_addr as *mut u8).unwrap(), WaitBudget::FOREVER)
        .unwrap();
}

#[test]
fn test_pool_over_fixed_arena() {
    let backend = BumpBackend::new(4096).unwrap();
    let config = PoolConfig::new(32, 16);
    let pool = MemoryPool::create(config, backend, WaitBudget::FOREVER).unwrap();
    assert_eq!(pool.capacity(), 16);

    let ptr = pool.acquire(WaitBudget::ZERO).unwrap();
    unsafe { ptr.as_ptr().write_bytes(1, 32) };
    pool.release(ptr, WaitBudget::FOREVER).unwrap();

    // Growth fails gracefully once the arena is spent.
    while pool.add_memory(16) {}
    assert!(accounting_holds(&pool));
}

#[test]
fn test_pool_over_multi_region_arena() {
    let backend = MultiRegionBackend::uniform(4, 1024).unwrap();
    let config = PoolConfig::new(48, 8).min_capacity(8);
    let pool = MemoryPool::create(config, backend, WaitBudget::FOREVER).unwrap();
    assert!(pool.capacity() >= 8);

    let mut held = Vec::new();
    for _ in 0..8 {
        held.push(pool.acquire(WaitBudget::ZERO).unwrap());
    }
    for ptr in held {
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
    }
    assert!(accounting_holds(&pool));
}

#[test]
fn test_external_region_pool() {
    let mut slab = vec![0u8; 2048];
    let pool = pool_of(1);
    let base = NonNull::new(slab.as_mut_ptr()).unwrap();
    assert!(unsafe { pool.add_memory_region(base, slab.len()) });

    let before = pool.capacity();
    assert!(before > 1);

    let mut held = Vec::new();
    for _ in 0..before {
        held.push(pool.acquire(WaitBudget::ZERO).unwrap());
    }
    for ptr in held {
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
    }
    drop(pool);
    drop(slab);
}

#[test]
fn test_concurrent_soak() {
    const THREADS: usize = 8;
    const ITERS: usize = 500;

    let pool = Arc::new(pool_of(THREADS / 2));
    let failures = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let pool = Arc::clone(&pool);
        let failures = Arc::clone(&failures);
        handles.push(std::thread::spawn(move || {
            for i in 0..ITERS {
                match pool.acquire(WaitBudget::from_millis(1_000)) {
                    Ok(ptr) => {
                        let tag = (t * ITERS + i) as u8;
                        unsafe { ptr.as_ptr().write_bytes(tag, ELEM) };
                        // Contents read back intact: no two holders share a cell.
                        let got = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), ELEM) };
                        assert!(got.iter().all(|&b| b == tag));
                        pool.release(ptr, WaitBudget::FOREVER).unwrap();
                    }
                    Err(PoolError::AllocationExhausted) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pool.used_count(), 0);
    assert_eq!(pool.free_count(), pool.capacity());
    assert!(accounting_holds(&pool));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Acquire,
        Release(usize),
        Block(usize),
        Unblock(usize),
        Grow(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Acquire),
            3 => (0usize..32).prop_map(Op::Release),
            1 => (0usize..16).prop_map(Op::Block),
            1 => (0usize..16).prop_map(Op::Unblock),
            1 => (1usize..4).prop_map(Op::Grow),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn accounting_identity_under_random_ops(ops in prop::collection::vec(op_strategy(), 1..80)) {
            let pool = pool_of(8);
            let mut held: Vec<NonNull<u8>> = Vec::new();

            for op in ops {
                match op {
                    Op::Acquire => {
                        if let Ok(ptr) = pool.acquire(WaitBudget::ZERO) {
                            held.push(ptr);
                        }
                    }
                    Op::Release(i) => {
                        if !held.is_empty() {
                            let ptr = held.swap_remove(i % held.len());
                            pool.release(ptr, WaitBudget::FOREVER).unwrap();
                        }
                    }
                    Op::Block(i) => {
                        pool.set_blocked(i % pool.capacity(), true, WaitBudget::ZERO);
                    }
                    Op::Unblock(i) => {
                        pool.set_blocked(i % pool.capacity(), false, WaitBudget::ZERO);
                    }
                    Op::Grow(n) => {
                        prop_assert!(pool.add_memory(n));
                    }
                }
                prop_assert_eq!(
                    pool.capacity(),
                    pool.used_count() + pool.free_count() + pool.blocked_count()
                );
                prop_assert_eq!(pool.used_count(), held.len());
            }

            for ptr in held {
                pool.release(ptr, WaitBudget::FOREVER).unwrap();
            }
            prop_assert_eq!(pool.used_count(), 0);
        }
    }
}
