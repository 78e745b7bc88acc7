//! Allocator behavior tests: rebalancing arithmetic, the cross-thread
//! conservation invariant, heap shedding, and the debug red zones.

use relay_pool::{alloc, global_free_len, pool_records, pool_type, stats, AllocConfig};

// =============================================================================
// Rebalance arithmetic (single thread)
// =============================================================================

struct Churn {
    _pad: [u64; 4],
}
pool_type!(
    Churn,
    "test_churn",
    config = AllocConfig::new(4, 8, 0)
);

/// With `{batch=4, local_max=8, global_max=0}`, allocating and freeing nine
/// items forces exactly one rebalance toward the global list and nothing is
/// ever returned to the heap.
#[test]
fn rebalance_to_global_once() {
    let held: Vec<_> = (0..9)
        .map(|_| alloc(Churn { _pad: [0; 4] }).expect("out of memory"))
        .collect();

    // Three heap refills of a whole batch each were needed to reach nine
    // live items.
    let s = stats::<Churn>();
    assert_eq!(s.total_alloc_from_heap, 12);
    assert_eq!(s.held_by_threads, 12);
    assert_eq!(s.batches_rebalanced_to_global, 0);

    drop(held);

    // The ninth free pushed the local list past its high-water mark: one
    // batch moved to the global list, none of it to the heap.
    let s = stats::<Churn>();
    assert_eq!(s.batches_rebalanced_to_global, 1);
    assert_eq!(s.total_free_to_heap, 0);
    assert_eq!(s.held_by_threads, 8);
    assert_eq!(global_free_len::<Churn>(), 4);

    // Conservation: everything taken from the heap is either held by
    // threads or sitting in the global pool.
    assert_eq!(
        s.held_by_threads + global_free_len::<Churn>() as u64,
        s.total_alloc_from_heap - s.total_free_to_heap
    );
}

// =============================================================================
// Conservation across threads
// =============================================================================

struct Shared {
    _v: u64,
}
pool_type!(
    Shared,
    "test_shared",
    config = AllocConfig::new(8, 16, 0)
);

#[test]
fn churn_across_threads_conserves_items() {
    let mut handles = Vec::new();
    for t in 0..4u64 {
        handles.push(std::thread::spawn(move || {
            let mut live = Vec::new();
            for i in 0..100 {
                let item = alloc(Shared { _v: t * 1000 + i }).expect("out of memory");
                live.push(item);
                if live.len() > 10 {
                    live.clear();
                }
            }
        }));
    }
    for h in handles {
        h.join().expect("worker panicked");
    }

    // Worker caches were flushed to the global pool on thread exit, so at
    // this quiesce point the ledger must balance exactly.
    let s = stats::<Shared>();
    assert_eq!(
        s.held_by_threads + global_free_len::<Shared>() as u64,
        s.total_alloc_from_heap - s.total_free_to_heap
    );
    // Unbounded global list: nothing ever goes back to the heap.
    assert_eq!(s.total_free_to_heap, 0);
}

// =============================================================================
// Bounded global list sheds to the heap
// =============================================================================

struct Capped {
    _v: u64,
}
pool_type!(
    Capped,
    "test_capped",
    config = AllocConfig::new(4, 8, 8)
);

#[test]
fn capped_global_list_frees_excess_to_heap() {
    let held: Vec<_> = (0..17)
        .map(|_| alloc(Capped { _v: 0 }).expect("out of memory"))
        .collect();
    drop(held);

    let s = stats::<Capped>();
    assert_eq!(s.batches_rebalanced_to_global, 3);
    assert_eq!(s.total_free_to_heap, 4);
    assert_eq!(global_free_len::<Capped>(), 8);
    assert_eq!(
        s.held_by_threads + global_free_len::<Capped>() as u64,
        s.total_alloc_from_heap - s.total_free_to_heap
    );
}

// =============================================================================
// Rebalanced items flow back to threads
// =============================================================================

struct Refill {
    _v: u64,
}
pool_type!(
    Refill,
    "test_refill",
    config = AllocConfig::new(4, 8, 0)
);

#[test]
fn global_items_rebalance_back_to_thread() {
    // Push one batch to the global list...
    let held: Vec<_> = (0..9)
        .map(|_| alloc(Refill { _v: 0 }).expect("out of memory"))
        .collect();
    drop(held);
    assert_eq!(global_free_len::<Refill>(), 4);

    // ...then drain the local list so the next alloc must pull it back.
    let local: Vec<_> = (0..8)
        .map(|_| alloc(Refill { _v: 1 }).expect("out of memory"))
        .collect();
    let one_more = alloc(Refill { _v: 2 }).expect("out of memory");

    let s = stats::<Refill>();
    assert_eq!(s.batches_rebalanced_to_threads, 1);
    assert_eq!(global_free_len::<Refill>(), 0);
    // No fresh heap batch was needed for the ninth item.
    assert_eq!(s.total_alloc_from_heap, 12);

    drop(one_more);
    drop(local);
}

// =============================================================================
// Management records
// =============================================================================

struct Recorded {
    _v: [u8; 300],
}
pool_type!(Recorded, "test_recorded");

#[test]
fn records_expose_config_and_counters() {
    let item = alloc(Recorded { _v: [0; 300] }).expect("out of memory");
    drop(item);

    let records = pool_records();
    let rec = records
        .iter()
        .find(|r| r.name == "test_recorded")
        .expect("type registered on first use");

    // A 300-byte payload lands in the big-item default config.
    assert_eq!(rec.type_size, 300);
    assert_eq!(rec.transfer_batch_size, 16);
    assert_eq!(rec.local_free_list_max, 32);
    assert_eq!(rec.global_free_list_max, 0);
    assert_eq!(rec.total_alloc_from_heap, 16);

    let json = serde_json::to_string(rec).expect("records serialize");
    assert!(json.contains("\"name\":\"test_recorded\""));
}

// =============================================================================
// Debug red zones
// =============================================================================

#[cfg(debug_assertions)]
mod red_zones {
    use relay_pool::{alloc, pool_records, pool_type, PoolBox};

    struct Guarded {
        _v: u64,
    }
    pool_type!(Guarded, "test_guarded");

    fn total_size() -> usize {
        pool_records()
            .iter()
            .find(|r| r.name == "test_guarded")
            .expect("initialized")
            .type_size
    }

    #[test]
    #[should_panic(expected = "back red zone")]
    fn tampered_back_sentinel_asserts_on_free() {
        let item = alloc(Guarded { _v: 1 }).expect("out of memory");
        let raw = item.into_raw();
        // SAFETY: writes inside this item's own allocation, one byte into
        // the back red zone.
        unsafe {
            raw.as_ptr().cast::<u8>().add(total_size()).write(0xff);
            drop(PoolBox::from_raw(raw));
        }
    }

    struct Doubled {
        _v: u64,
    }
    pool_type!(Doubled, "test_doubled");

    #[test]
    #[should_panic(expected = "double-freed")]
    fn double_free_asserts() {
        let item = alloc(Doubled { _v: 1 }).expect("out of memory");
        let raw = item.into_raw();
        // SAFETY: deliberately constructs two owners to provoke the debug
        // double-free check; the second drop panics before touching the
        // free list.
        unsafe {
            drop(PoolBox::from_raw(raw));
            drop(PoolBox::from_raw(raw));
        }
    }
}
