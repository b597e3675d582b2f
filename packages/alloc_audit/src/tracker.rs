//! The tracked allocation API.

use std::alloc::{GlobalAlloc, Layout};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{self, AtomicBool, AtomicU64};
use std::sync::{LazyLock, Mutex, MutexGuard, Once, PoisonError};

use crate::registry::{self, Registry};
use crate::{
    Address, Diagnostic, DiagnosticSink, ExitReport, LookupError, PointerInfo, PointerState,
    StderrSink,
};

/// A process-teardown callback suitable for `atexit`.
pub(crate) type ExitHook = extern "C" fn();

thread_local! {
    // Set while the current thread is inside tracker bookkeeping. Bookkeeping allocates (the
    // registry grows, reports are collected, sinks format messages) and when the tracker sits
    // behind the global allocator those allocations come right back to it. The global allocator
    // checks this flag and sends such allocations straight to the platform instead.
    static IN_BOOKKEEPING: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside tracker bookkeeping.
#[inline]
pub(crate) fn in_bookkeeping() -> bool {
    IN_BOOKKEEPING.get()
}

/// Marks the current thread as inside tracker bookkeeping until dropped. Nests.
#[derive(Debug)]
pub(crate) struct Bookkeeping {
    was_inside: bool,
}

impl Bookkeeping {
    pub(crate) fn enter() -> Self {
        Self {
            was_inside: IN_BOOKKEEPING.replace(true),
        }
    }
}

impl Drop for Bookkeeping {
    fn drop(&mut self) {
        IN_BOOKKEEPING.set(self.was_inside);
    }
}

/// A snapshot of a tracker's allocation counters.
///
/// All four counters only ever grow over the life of a tracker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    total_bytes_allocated: u64,
    allocation_count: u64,
    total_bytes_deallocated: u64,
    deallocation_count: u64,
}

impl Counters {
    /// Sum of the sizes of all allocations made through the tracker.
    #[must_use]
    pub const fn total_bytes_allocated(&self) -> u64 {
        self.total_bytes_allocated
    }

    /// Number of allocations made through the tracker.
    #[must_use]
    pub const fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// Sum of the recorded sizes of all allocations released through the tracker.
    #[must_use]
    pub const fn total_bytes_deallocated(&self) -> u64 {
        self.total_bytes_deallocated
    }

    /// Number of tracked allocations released through the tracker.
    #[must_use]
    pub const fn deallocation_count(&self) -> u64 {
        self.deallocation_count
    }

    /// Bytes allocated and not yet released.
    #[must_use]
    pub const fn bytes_currently_allocated(&self) -> u64 {
        // A snapshot never sees a release without the allocation it releases.
        self.total_bytes_allocated - self.total_bytes_deallocated
    }
}

#[derive(Debug)]
struct CounterCells {
    bytes_allocated: AtomicU64,
    allocations: AtomicU64,
    bytes_deallocated: AtomicU64,
    deallocations: AtomicU64,
}

impl CounterCells {
    const fn new() -> Self {
        Self {
            bytes_allocated: AtomicU64::new(0),
            allocations: AtomicU64::new(0),
            bytes_deallocated: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
        }
    }

    // A deallocation is always counted after the allocation it releases. Release increments
    // paired with acquire loads keep that order visible to readers, so a reader that loads the
    // deallocation side first never sees more released than allocated.

    fn record_allocation(&self, size: usize) {
        let size: u64 = size.try_into().expect("usize always fits into u64");
        self.bytes_allocated
            .fetch_add(size, atomic::Ordering::Release);
        self.allocations.fetch_add(1, atomic::Ordering::Release);
    }

    fn record_deallocation(&self, size: usize) {
        let size: u64 = size.try_into().expect("usize always fits into u64");
        self.bytes_deallocated
            .fetch_add(size, atomic::Ordering::Release);
        self.deallocations.fetch_add(1, atomic::Ordering::Release);
    }

    fn snapshot(&self) -> Counters {
        let deallocation_count = self.deallocations.load(atomic::Ordering::Acquire);
        let total_bytes_deallocated = self.bytes_deallocated.load(atomic::Ordering::Acquire);
        let allocation_count = self.allocations.load(atomic::Ordering::Acquire);
        let total_bytes_allocated = self.bytes_allocated.load(atomic::Ordering::Acquire);

        Counters {
            total_bytes_allocated,
            allocation_count,
            total_bytes_deallocated,
            deallocation_count,
        }
    }
}

/// What a deallocation does after the bookkeeping is done.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Release {
    /// Hand the pointer to the platform allocator.
    ToPlatform,

    /// Keep the pointer away from the platform allocator.
    Withhold,
}

fn new_registry() -> Mutex<Registry> {
    Mutex::new(Registry::new())
}

/// Records the provenance, size and lifecycle of heap allocations and reports the ones that are
/// never released.
///
/// A tracker is a context object: allocations and deallocations are made through it, with the
/// platform allocator passed in on every call. The process-wide tracker used by
/// [`Allocator`](crate::Allocator) is available via [`global_tracker()`](crate::global_tracker);
/// applications and tests can also create their own.
///
/// When a tracker created by the application is dropped, it drains itself and emits a diagnostic
/// for every pointer that was never released. The process-wide tracker does the same from an exit
/// hook that it installs on its first allocation.
///
/// No tracker operation fails. Problems are reported to the tracker's [`DiagnosticSink`] and the
/// operation carries on.
///
/// # Examples
///
/// ```
/// use std::alloc::{Layout, System};
///
/// use alloc_audit::{PointerState, Tracker};
///
/// let tracker = Tracker::new();
/// let layout = Layout::from_size_align(64, 8).unwrap();
///
/// // SAFETY: The layout has a non-zero size.
/// let ptr = unsafe { tracker.allocate(&System, layout) };
///
/// let info = tracker.query_info(ptr);
/// assert_eq!(info.state(), PointerState::Allocated);
/// assert_eq!(info.size(), 64);
///
/// // SAFETY: The pointer came from this tracker with this layout.
/// unsafe { tracker.deallocate(&System, ptr, layout) };
///
/// assert_eq!(tracker.query_info(ptr).state(), PointerState::Deallocated);
/// assert_eq!(tracker.bytes_currently_allocated(), 0);
/// ```
pub struct Tracker<S: DiagnosticSink = StderrSink> {
    registry: LazyLock<Mutex<Registry>>,
    counters: CounterCells,

    // Completes during the first allocation, before any allocation returns.
    exit_hook_registration: Once,
    exit_hook: Option<ExitHook>,

    reported: AtomicBool,
    sink: S,
}

impl Tracker<StderrSink> {
    /// Creates a tracker that writes its diagnostics to stderr.
    #[expect(
        clippy::new_without_default,
        reason = "a tracker reports leaks when dropped, which a default value should not do"
    )]
    #[must_use]
    pub const fn new() -> Self {
        Self::with_sink(StderrSink)
    }
}

impl<S: DiagnosticSink> Tracker<S> {
    /// Creates a tracker that delivers its diagnostics to `sink`.
    #[must_use]
    pub const fn with_sink(sink: S) -> Self {
        Self::build(sink, None)
    }

    /// Creates a tracker that installs `exit_hook` with `atexit` on its first allocation.
    pub(crate) const fn with_exit_hook(sink: S, exit_hook: ExitHook) -> Self {
        Self::build(sink, Some(exit_hook))
    }

    const fn build(sink: S, exit_hook: Option<ExitHook>) -> Self {
        Self {
            registry: LazyLock::new(new_registry),
            counters: CounterCells::new(),
            exit_hook_registration: Once::new(),
            exit_hook,
            reported: AtomicBool::new(false),
            sink,
        }
    }

    /// Allocates memory from `platform` and starts tracking it.
    ///
    /// Returns whatever `platform` returns. A null result is not tracked and leaves the counters
    /// unchanged; a diagnostic is emitted instead.
    ///
    /// # Safety
    ///
    /// Same as [`GlobalAlloc::alloc`]: `layout` must have a non-zero size.
    #[must_use = "dropping the pointer leaks the allocation"]
    pub unsafe fn allocate<A: GlobalAlloc + ?Sized>(&self, platform: &A, layout: Layout) -> *mut u8 {
        self.ensure_exit_hook();

        // SAFETY: Forwarding the caller's guarantees about `layout`.
        let ptr = unsafe { platform.alloc(layout) };
        self.record_allocation(ptr, layout.size());
        ptr
    }

    /// Allocates zero-initialized memory from `platform` and starts tracking it.
    ///
    /// Behaves like [`allocate()`](Self::allocate) otherwise.
    ///
    /// # Safety
    ///
    /// Same as [`GlobalAlloc::alloc_zeroed`]: `layout` must have a non-zero size.
    #[must_use = "dropping the pointer leaks the allocation"]
    pub unsafe fn allocate_zeroed<A: GlobalAlloc + ?Sized>(
        &self,
        platform: &A,
        layout: Layout,
    ) -> *mut u8 {
        self.ensure_exit_hook();

        // SAFETY: Forwarding the caller's guarantees about `layout`.
        let ptr = unsafe { platform.alloc_zeroed(layout) };
        self.record_allocation(ptr, layout.size());
        ptr
    }

    /// Marks `ptr` as released and returns it to `platform`.
    ///
    /// A pointer the tracker does not know is still returned to `platform`, without touching the
    /// counters. A pointer whose record says it was already released is reported as a double free
    /// and is still returned to `platform`: the platform may have handed the address out again to
    /// an owner the tracker never saw. A null pointer is reported and ignored.
    ///
    /// # Safety
    ///
    /// Same as [`GlobalAlloc::dealloc`]: `ptr` must have been allocated by `platform` with
    /// `layout` and not yet freed.
    pub unsafe fn deallocate<A: GlobalAlloc + ?Sized>(
        &self,
        platform: &A,
        ptr: *mut u8,
        layout: Layout,
    ) {
        if self.record_deallocation(ptr) == Release::ToPlatform {
            // SAFETY: Forwarding the caller's guarantees about `ptr` and `layout`.
            unsafe { platform.dealloc(ptr, layout) };
        }
    }

    /// Returns a copy of what the tracker knows about `ptr`.
    ///
    /// For a pointer that is not tracked, emits a diagnostic and returns
    /// [`PointerInfo::INVALID`].
    pub fn query_info<T: ?Sized>(&self, ptr: *const T) -> PointerInfo {
        let _bookkeeping = Bookkeeping::enter();
        let address = Address::of(ptr);

        let found = self.lock_registry().find(address).map(|record| record.info);

        found.unwrap_or_else(|source| {
            self.sink.emit(&Diagnostic::QueryMiss { address, source });
            PointerInfo::INVALID
        })
    }

    /// Stops tracking `ptr` entirely, as if it had never been allocated through the tracker.
    ///
    /// The allocation itself is not touched and the counters do not change. Returns the record
    /// that was evicted, or `None` with a diagnostic if there was none.
    pub fn forget<T: ?Sized>(&self, ptr: *const T) -> Option<PointerInfo> {
        let _bookkeeping = Bookkeeping::enter();
        let address = Address::of(ptr);

        let removed = self.lock_registry().remove(address).map(|record| record.info);

        match removed {
            Ok(info) => Some(info),
            Err(source) => {
                self.sink.emit(&Diagnostic::RemovalMiss { address, source });
                None
            }
        }
    }

    /// A snapshot of all counters.
    ///
    /// The counters are read one by one, so a snapshot taken while other threads allocate may mix
    /// values from slightly different moments.
    #[must_use]
    pub fn counters(&self) -> Counters {
        self.counters.snapshot()
    }

    /// Sum of the sizes of all allocations made through the tracker.
    #[must_use]
    pub fn total_bytes_allocated(&self) -> u64 {
        self.counters.bytes_allocated.load(atomic::Ordering::Acquire)
    }

    /// Number of allocations made through the tracker.
    #[must_use]
    pub fn allocation_count(&self) -> u64 {
        self.counters.allocations.load(atomic::Ordering::Acquire)
    }

    /// Sum of the recorded sizes of all allocations released through the tracker.
    #[must_use]
    pub fn total_bytes_deallocated(&self) -> u64 {
        self.counters
            .bytes_deallocated
            .load(atomic::Ordering::Acquire)
    }

    /// Number of tracked allocations released through the tracker.
    #[must_use]
    pub fn deallocation_count(&self) -> u64 {
        self.counters.deallocations.load(atomic::Ordering::Acquire)
    }

    /// Bytes allocated and not yet released.
    #[must_use]
    pub fn bytes_currently_allocated(&self) -> u64 {
        self.counters().bytes_currently_allocated()
    }

    /// Takes every record out of the tracker and returns the pointers that were never released.
    ///
    /// Tracked allocations are not freed. Pointers released after draining are no longer known
    /// to the tracker and are reported as untracked.
    #[must_use]
    pub fn drain_report(&self) -> ExitReport {
        let _bookkeeping = Bookkeeping::enter();

        let drained = self.lock_registry().drain();
        ExitReport::from_records(drained)
    }

    /// Drains the tracker and emits a diagnostic for every pointer that was never released.
    ///
    /// Runs at most once per tracker; later calls do nothing. Called automatically when the
    /// tracker is dropped and, for the process-wide tracker, at process exit.
    pub fn report_at_exit(&self) {
        if self.reported.swap(true, atomic::Ordering::AcqRel) {
            return;
        }

        let _bookkeeping = Bookkeeping::enter();

        let report = self.drain_report();
        for leak in &report {
            self.sink.emit(&Diagnostic::Leak(*leak));
        }
    }

    /// Whether the first allocation has already happened and installed the exit hook.
    #[must_use]
    pub fn is_exit_hook_registered(&self) -> bool {
        self.exit_hook_registration.is_completed()
    }

    // Concurrent first allocations wait here until the hook is installed.
    fn ensure_exit_hook(&self) {
        self.exit_hook_registration.call_once(|| {
            let Some(hook) = self.exit_hook else {
                // Trackers without a hook report when dropped.
                return;
            };

            // atexit may allocate to grow its handler list.
            let _bookkeeping = Bookkeeping::enter();

            // SAFETY: The hook is a plain function with no preconditions.
            let status = unsafe { libc::atexit(hook) };

            if status != 0 {
                self.sink.emit(&Diagnostic::ExitHookRegistrationFailed);
            }
        });
    }

    fn record_allocation(&self, ptr: *mut u8, size: usize) {
        let _bookkeeping = Bookkeeping::enter();

        if ptr.is_null() {
            self.sink
                .emit(&Diagnostic::PlatformAllocationFailed { size });
            return;
        }

        self.counters.record_allocation(size);

        let address = Address::of(ptr);
        let inserted = self
            .lock_registry()
            .insert(address, registry::allocated(size));

        if let Err(source) = inserted {
            self.sink.emit(&Diagnostic::TrackingFailed {
                address,
                size,
                source,
            });
        }
    }

    fn record_deallocation(&self, ptr: *mut u8) -> Release {
        let _bookkeeping = Bookkeeping::enter();
        let address = Address::of(ptr);

        let outcome = {
            let mut registry = self.lock_registry();

            match registry.find_mut(address) {
                Ok(record) => match record.info.state() {
                    PointerState::Deallocated => Err(Diagnostic::DoubleFree {
                        address,
                        size: record.info.size(),
                    }),
                    PointerState::Allocated | PointerState::Invalid => {
                        record.retire();
                        Ok(record.info.size())
                    }
                },
                Err(source) => Err(Diagnostic::DeallocationMiss { address, source }),
            }
        };

        match outcome {
            Ok(size) => {
                self.counters.record_deallocation(size);
                Release::ToPlatform
            }
            Err(diagnostic) => {
                let release = match diagnostic {
                    Diagnostic::DeallocationMiss {
                        source: LookupError::NullIdentity,
                        ..
                    } => Release::Withhold,
                    _ => Release::ToPlatform,
                };

                self.sink.emit(&diagnostic);
                release
            }
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock leaves the registry usable.
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: DiagnosticSink> Drop for Tracker<S> {
    fn drop(&mut self) {
        self.report_at_exit();
    }
}

impl<S: DiagnosticSink> fmt::Debug for Tracker<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("counters", &self.counters())
            .field("exit_hook_registered", &self.is_exit_hook_registered())
            .field("reported", &self.reported.load(atomic::Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
