//! Routes the diagnostics of an application-owned tracker into `tracing`.
//!
//! The subscriber is set to show debug events so that the lookup misses are visible next to the
//! leak warning.

use std::alloc::{GlobalAlloc, Layout, System};

use alloc_audit::{Tracker, TracingSink};
use tracing::Level;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let tracker = Tracker::with_sink(TracingSink);
    let layout = Layout::from_size_align(48, 8).unwrap();

    // SAFETY: The layout has a non-zero size.
    let ptr = unsafe { tracker.allocate(&System, layout) };

    // SAFETY: The pointer came from this tracker with this layout.
    unsafe { tracker.deallocate(&System, ptr, layout) };

    // Memory the tracker never saw is reported at debug level and still freed.
    // SAFETY: The layout has a non-zero size.
    let foreign = unsafe { System.alloc(layout) };
    // SAFETY: Allocated from System above with the same layout.
    unsafe { tracker.deallocate(&System, foreign, layout) };

    // So is asking about it.
    let stack_value = 0_u64;
    let info = tracker.query_info(&raw const stack_value);
    tracing::info!(state = ?info.state(), size = info.size(), "stack value");

    // SAFETY: The layout has a non-zero size.
    let leaked = unsafe { tracker.allocate(&System, layout) };

    // Dropping the tracker reports the outstanding allocation as a warning.
    drop(tracker);

    // SAFETY: Allocated from System with this layout and never released.
    unsafe { System.dealloc(leaked, layout) };
}
