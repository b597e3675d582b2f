//! Integration tests for `alloc_audit` with real memory allocations.
//!
//! These tests install the tracking allocator as the global allocator and observe ordinary
//! heap activity (boxes, vectors, growth) through the process-wide tracker. Other tests in the
//! same binary allocate concurrently, so counter checks compare deltas rather than totals.

#![cfg(not(miri))] // Miri replaces the global allocator, so cannot be used here.
#![cfg(feature = "tracking")]

use std::hint::black_box;
use std::thread;

use alloc_audit::{Allocator, Mode, PointerState, counters, global_tracker, query_info};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

#[test]
fn global_allocator_is_tracked() {
    assert_eq!(ALLOCATOR.mode(), Mode::Tracked);
}

#[test]
fn box_is_tracked_while_alive() {
    let data = Box::new([0_u8; 64]);

    let info = query_info(&raw const *data);
    assert_eq!(info.state(), PointerState::Allocated);
    assert_eq!(info.size(), 64);

    black_box(&data);
}

#[test]
fn dropped_vec_is_retired() {
    const CAPACITY: usize = 12_345;

    let data: Vec<u8> = Vec::with_capacity(CAPACITY);
    let ptr = data.as_ptr();
    assert_eq!(query_info(ptr).size(), CAPACITY);

    drop(data);

    let info = query_info(ptr);
    assert_eq!(info.state(), PointerState::Deallocated);
    assert_eq!(info.size(), CAPACITY);
}

#[test]
fn counters_advance_with_allocations() {
    const BYTES: usize = 1000;

    let before = counters();
    let data = vec![1_u8; BYTES];
    black_box(&data);
    let after_allocation = counters();

    assert!(after_allocation.allocation_count() > before.allocation_count());
    let allocated = after_allocation
        .total_bytes_allocated()
        .checked_sub(before.total_bytes_allocated())
        .unwrap();
    assert!(allocated >= BYTES as u64);

    drop(data);
    let after_release = counters();

    assert!(after_release.deallocation_count() > after_allocation.deallocation_count());
    let released = after_release
        .total_bytes_deallocated()
        .checked_sub(after_allocation.total_bytes_deallocated())
        .unwrap();
    assert!(released >= BYTES as u64);
}

#[test]
fn growth_moves_tracking_to_new_block() {
    let mut data: Vec<u64> = Vec::with_capacity(4);
    data.push(7);
    let old = data.as_ptr();

    data.reserve_exact(10_000);
    let new = data.as_ptr();
    assert_ne!(old, new);

    let info = query_info(new);
    assert_eq!(info.state(), PointerState::Allocated);
    assert_eq!(info.size(), data.capacity() * size_of::<u64>());
    assert_eq!(data.first(), Some(&7));
}

#[test]
fn counters_are_never_inconsistent() {
    let snapshot = global_tracker().counters();

    assert!(snapshot.total_bytes_allocated() >= snapshot.total_bytes_deallocated());
    assert_eq!(
        snapshot.bytes_currently_allocated(),
        snapshot.total_bytes_allocated() - snapshot.total_bytes_deallocated()
    );
}

#[test]
fn allocations_from_many_threads_are_tracked() {
    const NUM_WORKER_THREADS: usize = 4;
    const ALLOCATIONS_PER_THREAD: usize = 50;

    let handles: Vec<_> = (0..NUM_WORKER_THREADS)
        .map(|thread_id| {
            thread::spawn(move || {
                for i in 0..ALLOCATIONS_PER_THREAD {
                    let size = (thread_id + 1) * 100 + i;
                    let data = vec![42_u8; size];

                    let info = query_info(data.as_ptr());
                    assert_eq!(info.state(), PointerState::Allocated);
                    assert_eq!(info.size(), size);

                    black_box(data);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread should complete successfully");
    }
}
