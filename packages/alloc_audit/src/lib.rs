//! Heap allocation auditing that reports leaked and invalid pointers at process exit.
//!
//! This package records the size and lifecycle state of every heap allocation made through it,
//! keeps running totals of allocated and released bytes, and reports every pointer that was
//! never released when the process exits.
//!
//! The core functionality includes:
//! - [`Allocator`] - A Rust memory allocator wrapper that routes allocations through the tracker
//! - [`Tracker`] - The tracked allocation API: allocate, deallocate, query, counters and reports
//! - [`ExitReport`] - The pointers left outstanding when a tracker is drained
//! - [`DiagnosticSink`] - Where the tracker sends everything it notices
//!
//! This package is not a general-purpose allocator and adds no pooling or caching of its own.
//! It is a development tool meant for finding leaks and invalid frees.
//!
//! # Simple Usage
//!
//! Install the tracking allocator and the process reports leaks on stderr when it exits:
//!
//! ```
//! use alloc_audit::{Allocator, PointerState};
//!
//! #[global_allocator]
//! static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
//!
//! fn main() {
//!     let data = vec![0_u8; 100];
//!
//!     let info = alloc_audit::query_info(data.as_ptr());
//!     assert_eq!(info.state(), PointerState::Allocated);
//!     assert_eq!(info.size(), 100);
//!
//!     // Anything still allocated here is listed at exit, one line per pointer:
//!     // Pointer 0x5581c0a2e2d0 of size 100 is still in allocated state at application close.
//!     std::mem::forget(data);
//! }
//! ```
//!
//! # Build-time configuration
//!
//! The `tracking` feature is enabled by default. Without it, [`Allocator::system()`] and
//! [`Allocator::new()`] pass every call straight through to the wrapped allocator, so the
//! global allocator declaration can stay in place in builds that should not pay for tracking.
//! [`Allocator::tracked()`] and [`Allocator::passthrough()`] select a mode explicitly.
//!
//! # Trackers as context objects
//!
//! A [`Tracker`] can also be created and used directly, without touching the global allocator.
//! Such a tracker reports leaks to its [`DiagnosticSink`] when dropped:
//!
//! ```
//! use std::alloc::{Layout, System};
//!
//! use alloc_audit::{Tracker, TracingSink};
//!
//! let tracker = Tracker::with_sink(TracingSink);
//! let layout = Layout::from_size_align(32, 8).unwrap();
//!
//! // SAFETY: The layout has a non-zero size.
//! let ptr = unsafe { tracker.allocate(&System, layout) };
//! assert_eq!(tracker.allocation_count(), 1);
//!
//! // SAFETY: The pointer came from this tracker with this layout.
//! unsafe { tracker.deallocate(&System, ptr, layout) };
//! assert_eq!(tracker.bytes_currently_allocated(), 0);
//! ```
//!
//! # Diagnostics
//!
//! No operation returns an error. Untracked pointers, double frees, bookkeeping failures and
//! leaks are all reported as [`Diagnostic`]s and the operation carries on. The process-wide
//! tracker writes them to stderr via [`StderrSink`].
//!
//! # Overhead
//!
//! Every tracked allocation and deallocation takes a process-wide lock and updates a hash map.
//! Allocation-heavy multithreaded code will be noticeably slower while tracking is enabled.
//!
//! # Miri compatibility
//!
//! Miri replaces the global allocator with its own logic, so you cannot execute code that uses
//! [`Allocator`] as the global allocator under Miri.

mod address;
mod allocator;
mod diagnostics;
mod global;
mod record;
mod registry;
mod report;
mod tracker;

pub use address::Address;
pub use allocator::*;
pub use diagnostics::*;
pub use global::*;
pub use record::{PointerInfo, PointerState};
pub use report::*;
pub use tracker::{Counters, Tracker};
