//! Installs the tracking allocator, leaks one allocation on purpose and prints the counters.
//!
//! When the process exits, the tracker writes a line like this to stderr:
//!
//! ```text
//! Pointer 0x55d0c3a1b2c0 of size 100 is still in allocated state at application close.
//! ```

use alloc_audit::{Allocator, PointerState};

#[global_allocator]
static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();

fn main() {
    let kept = vec![0_u8; 100];
    let released = String::from("released before exit");

    let info = alloc_audit::query_info(kept.as_ptr());
    println!(
        "kept buffer: {:?}, {} bytes",
        info.state(),
        info.size()
    );
    assert_eq!(info.state(), PointerState::Allocated);

    let released_ptr = released.as_ptr();
    drop(released);
    println!(
        "released string: {:?}",
        alloc_audit::query_info(released_ptr).state()
    );

    let counters = alloc_audit::counters();
    println!("allocations:             {}", counters.allocation_count());
    println!("bytes allocated:         {}", counters.total_bytes_allocated());
    println!("deallocations:           {}", counters.deallocation_count());
    println!("bytes deallocated:       {}", counters.total_bytes_deallocated());
    println!("bytes still allocated:   {}", counters.bytes_currently_allocated());

    // Leaked on purpose so the exit report has something to say.
    std::mem::forget(kept);
}
