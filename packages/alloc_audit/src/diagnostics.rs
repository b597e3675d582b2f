//! What the tracker says when something is off, and where it says it.
//!
//! Tracker operations never fail from the caller's point of view. Every problem the tracker
//! notices is turned into a [`Diagnostic`] and handed to a [`DiagnosticSink`], after which the
//! operation continues as well as it can.

use std::collections::TryReserveError;
use std::io::{self, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::{Address, Leak};

/// Why a registry lookup did not produce a record.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum LookupError {
    /// The pointer was null, which is never tracked.
    #[error("no pointer was given")]
    NullIdentity,

    /// Nothing is tracked at all.
    #[error("list is empty")]
    EmptyRegistry,

    /// Other pointers are tracked but not this one.
    #[error("pointer is not tracked")]
    NotTracked,
}

/// Why the tracker could not record a new allocation.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum InsertError {
    /// The pointer was null, which is never tracked.
    #[error("no pointer was given")]
    NullIdentity,

    /// A live record already exists for the same address.
    #[error("pointer is already tracked as live")]
    DuplicateIdentity,

    /// The tracker's own bookkeeping storage could not grow.
    #[error("cannot allocate new node to track memory allocations")]
    NodeAllocationFailed(#[source] TryReserveError),
}

/// A problem noticed by the tracker.
///
/// The `Display` form of each variant is the line written by [`StderrSink`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Diagnostic {
    /// The platform allocator returned null. Nothing was recorded.
    #[error("Platform allocator failed to provide {size} bytes; the allocation is not tracked.")]
    PlatformAllocationFailed {
        /// Requested size in bytes.
        size: usize,
    },

    /// A successful allocation could not be recorded.
    #[error("Cannot track pointer {address} of size {size}: {source}.")]
    TrackingFailed {
        /// The allocation that is not tracked.
        address: Address,
        /// Its size in bytes.
        size: usize,
        /// Why the record was not created.
        source: InsertError,
    },

    /// Information was requested for a pointer the tracker does not know.
    #[error("Attempting to get pointer info of non-tracked pointer {address}: {source}.")]
    QueryMiss {
        /// The pointer that was asked about.
        address: Address,
        /// Why no record was found.
        source: LookupError,
    },

    /// A pointer the tracker does not know was released through it.
    #[error("Attempting to deallocate non-tracked pointer {address}: {source}.")]
    DeallocationMiss {
        /// The pointer being released.
        address: Address,
        /// Why no record was found.
        source: LookupError,
    },

    /// A record was asked to be evicted but does not exist.
    #[error("Cannot remove pointer {address} from memory allocation tracking list: {source}.")]
    RemovalMiss {
        /// The pointer whose record was to be removed.
        address: Address,
        /// Why no record was found.
        source: LookupError,
    },

    /// A pointer was released again after already being released.
    #[error("Pointer {address} of size {size} was deallocated more than once.")]
    DoubleFree {
        /// The pointer released twice.
        address: Address,
        /// Its recorded size in bytes.
        size: usize,
    },

    /// A pointer was never released before the tracker was drained at exit.
    #[error("{0}")]
    Leak(Leak),

    /// The exit hook could not be installed, so leaks will go unreported.
    #[error("Cannot register memory tracking exit hook; leaks will not be reported at application close.")]
    ExitHookRegistrationFailed,
}

impl Diagnostic {
    /// Whether this diagnostic points at a memory safety or memory usage problem,
    /// as opposed to routine lookup noise about pointers the tracker never saw.
    #[must_use]
    pub fn is_anomaly(&self) -> bool {
        !matches!(
            self,
            Self::QueryMiss { .. } | Self::DeallocationMiss { .. } | Self::RemovalMiss { .. }
        )
    }
}

/// Receives the diagnostics produced by a tracker.
///
/// Sinks are called while the tracker is inside its bookkeeping window: allocations a sink makes
/// are not themselves tracked, but a sink must not call back into the tracker that invoked it.
#[cfg_attr(test, mockall::automock)]
pub trait DiagnosticSink: Send + Sync {
    /// Delivers one diagnostic.
    fn emit(&self, diagnostic: &Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn emit(&self, diagnostic: &Diagnostic) {
        (**self).emit(diagnostic);
    }
}

/// Writes each diagnostic as one line to standard error.
///
/// This is the sink of the process-wide tracker. The leak lines it produces at exit keep a fixed
/// wording so existing tooling can scrape them.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stderr output reliably - covered by the exit report integration test.
    fn emit(&self, diagnostic: &Diagnostic) {
        // There is nowhere left to report a failure to write to stderr.
        _ = writeln!(io::stderr().lock(), "{diagnostic}");
    }
}

/// Forwards diagnostics as `tracing` events with the `alloc_audit` target.
///
/// Anomalies are emitted at `WARN` level, lookup misses at `DEBUG` level.
///
/// Subscribers tend to allocate and cache memory of their own, so this sink suits trackers
/// created with [`Tracker::with_sink`](crate::Tracker::with_sink) rather than the process-wide
/// tracker behind the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: &Diagnostic) {
        if diagnostic.is_anomaly() {
            tracing::warn!(target: "alloc_audit", %diagnostic);
        } else {
            tracing::debug!(target: "alloc_audit", %diagnostic);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::sync::Mutex;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::LeakKind;

    assert_impl_all!(Diagnostic: Send, Sync, Debug);
    assert_impl_all!(LookupError: Send, Sync, Copy);
    assert_impl_all!(InsertError: Send, Sync, Debug);
    assert_impl_all!(StderrSink: DiagnosticSink);
    assert_impl_all!(TracingSink: DiagnosticSink);

    #[test]
    fn lookup_misses_are_not_anomalies() {
        let address = Address::NULL;

        assert!(
            !Diagnostic::QueryMiss {
                address,
                source: LookupError::NotTracked
            }
            .is_anomaly()
        );
        assert!(
            !Diagnostic::DeallocationMiss {
                address,
                source: LookupError::EmptyRegistry
            }
            .is_anomaly()
        );
        assert!(Diagnostic::DoubleFree { address, size: 8 }.is_anomaly());
        assert!(Diagnostic::PlatformAllocationFailed { size: 8 }.is_anomaly());
    }

    #[test]
    fn leak_diagnostic_uses_leak_wording() {
        let leak = Leak::new(Address::NULL, 100, LeakKind::StillAllocated);

        assert_eq!(
            Diagnostic::Leak(leak).to_string(),
            "Pointer 0x0 of size 100 is still in allocated state at application close."
        );
    }

    #[test]
    fn miss_message_names_reason() {
        let diagnostic = Diagnostic::QueryMiss {
            address: Address::NULL,
            source: LookupError::NullIdentity,
        };

        assert_eq!(
            diagnostic.to_string(),
            "Attempting to get pointer info of non-tracked pointer 0x0: no pointer was given."
        );
    }

    #[derive(Debug, Default)]
    struct Collect(Mutex<Vec<Diagnostic>>);

    impl DiagnosticSink for Collect {
        fn emit(&self, diagnostic: &Diagnostic) {
            self.0.lock().unwrap().push(diagnostic.clone());
        }
    }

    #[test]
    fn shared_sink_forwards_to_inner() {
        let inner = Arc::new(Collect::default());
        let shared = Arc::clone(&inner);

        shared.emit(&Diagnostic::ExitHookRegistrationFailed);

        assert_eq!(
            *inner.0.lock().unwrap(),
            vec![Diagnostic::ExitHookRegistrationFailed]
        );
    }

    #[test]
    fn tracing_sink_without_subscriber_is_silent() {
        TracingSink.emit(&Diagnostic::DoubleFree {
            address: Address::NULL,
            size: 1,
        });
        TracingSink.emit(&Diagnostic::RemovalMiss {
            address: Address::NULL,
            source: LookupError::NotTracked,
        });
    }
}
