//! The process-wide tracker behind [`Allocator`](crate::Allocator).

use crate::{Counters, PointerInfo, StderrSink, Tracker};

static GLOBAL_TRACKER: Tracker = Tracker::with_exit_hook(StderrSink, report_global_tracker);

extern "C" fn report_global_tracker() {
    GLOBAL_TRACKER.report_at_exit();
}

/// The process-wide tracker.
///
/// Every allocation made through an [`Allocator`](crate::Allocator) in tracked mode is recorded
/// here. On its first allocation the tracker installs an exit hook that writes a line to stderr
/// for every pointer still outstanding when the process terminates normally.
///
/// # Examples
///
/// ```
/// use alloc_audit::{Allocator, PointerState, global_tracker};
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
///
/// fn main() {
///     let data = Box::new([0_u8; 64]);
///     let info = global_tracker().query_info(&raw const *data);
///
///     assert_eq!(info.state(), PointerState::Allocated);
///     assert_eq!(info.size(), 64);
/// }
/// ```
#[must_use]
#[inline]
pub fn global_tracker() -> &'static Tracker {
    &GLOBAL_TRACKER
}

/// Returns a copy of what the process-wide tracker knows about `ptr`.
///
/// Shorthand for `global_tracker().query_info(ptr)`.
#[inline]
pub fn query_info<T: ?Sized>(ptr: *const T) -> PointerInfo {
    GLOBAL_TRACKER.query_info(ptr)
}

/// A snapshot of the process-wide tracker's counters.
#[must_use]
#[inline]
pub fn counters() -> Counters {
    GLOBAL_TRACKER.counters()
}

/// Sum of the sizes of all allocations recorded by the process-wide tracker.
#[must_use]
#[inline]
pub fn total_bytes_allocated() -> u64 {
    GLOBAL_TRACKER.total_bytes_allocated()
}

/// Number of allocations recorded by the process-wide tracker.
#[must_use]
#[inline]
pub fn allocation_count() -> u64 {
    GLOBAL_TRACKER.allocation_count()
}

/// Sum of the sizes of all allocations released through the process-wide tracker.
#[must_use]
#[inline]
pub fn total_bytes_deallocated() -> u64 {
    GLOBAL_TRACKER.total_bytes_deallocated()
}

/// Number of allocations released through the process-wide tracker.
#[must_use]
#[inline]
pub fn deallocation_count() -> u64 {
    GLOBAL_TRACKER.deallocation_count()
}

/// Bytes allocated through the process-wide tracker and not yet released.
#[must_use]
#[inline]
pub fn bytes_currently_allocated() -> u64 {
    GLOBAL_TRACKER.bytes_currently_allocated()
}
