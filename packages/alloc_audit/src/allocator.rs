//! Global allocator shim that routes allocations through the process-wide tracker.

use std::alloc::{GlobalAlloc, Layout, System};
use std::fmt;

use crate::global_tracker;
use crate::tracker::in_bookkeeping;

/// Whether an [`Allocator`] records allocations or passes them straight through.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Every allocation and deallocation goes through [`global_tracker()`].
    Tracked,

    /// Allocations go directly to the wrapped allocator and are not recorded.
    Passthrough,
}

impl Mode {
    /// The mode selected at build time: [`Mode::Tracked`] when the `tracking` feature is enabled
    /// (the default), [`Mode::Passthrough`] otherwise.
    pub const BUILD_DEFAULT: Self = if cfg!(feature = "tracking") {
        Self::Tracked
    } else {
        Self::Passthrough
    };
}

/// A memory allocator that records every allocation and deallocation in the process-wide
/// tracker, so that leaks and invalid frees are reported when the process exits.
///
/// This allocator wraps any [`GlobalAlloc`] implementation and keeps its allocation behavior.
/// Reallocation is carried out as allocate, copy and deallocate, so that both pointers are
/// accounted for.
///
/// # Examples
///
/// ```rust
/// use alloc_audit::Allocator;
///
/// #[global_allocator]
/// static ALLOCATOR: Allocator<std::alloc::System> = Allocator::system();
/// ```
///
/// The mode can also be chosen explicitly, regardless of the `tracking` feature:
///
/// ```rust
/// use alloc_audit::{Allocator, Mode};
///
/// static PASSTHROUGH: Allocator<std::alloc::System> =
///     Allocator::passthrough(std::alloc::System);
///
/// assert_eq!(PASSTHROUGH.mode(), Mode::Passthrough);
/// ```
pub struct Allocator<A: GlobalAlloc> {
    inner: A,
    mode: Mode,
}

impl<A: GlobalAlloc> fmt::Debug for Allocator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("inner", &"<allocator>")
            .field("mode", &self.mode)
            .finish()
    }
}

impl Allocator<System> {
    /// Wraps the system allocator, in the mode selected at build time.
    #[must_use]
    #[inline]
    pub const fn system() -> Self {
        Self::new(System)
    }
}

impl<A: GlobalAlloc> Allocator<A> {
    /// Wraps `allocator`, in the mode selected at build time.
    #[must_use]
    #[inline]
    pub const fn new(allocator: A) -> Self {
        Self::with_mode(allocator, Mode::BUILD_DEFAULT)
    }

    /// Wraps `allocator` and records all allocations in the process-wide tracker.
    #[must_use]
    #[inline]
    pub const fn tracked(allocator: A) -> Self {
        Self::with_mode(allocator, Mode::Tracked)
    }

    /// Wraps `allocator` without recording anything.
    #[must_use]
    #[inline]
    pub const fn passthrough(allocator: A) -> Self {
        Self::with_mode(allocator, Mode::Passthrough)
    }

    /// Wraps `allocator` in the given mode.
    #[must_use]
    #[inline]
    pub const fn with_mode(allocator: A, mode: Mode) -> Self {
        Self {
            inner: allocator,
            mode,
        }
    }

    /// The mode this allocator operates in.
    #[must_use]
    #[inline]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    // Allocations made by the tracker's own bookkeeping bypass it.
    #[inline]
    fn routes_through_tracker(&self) -> bool {
        matches!(self.mode, Mode::Tracked) && !in_bookkeeping()
    }
}

// SAFETY: We delegate all allocation operations to the underlying allocator, either directly
// or via the tracker, which forwards the same arguments.
unsafe impl<A: GlobalAlloc> GlobalAlloc for Allocator<A> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if self.routes_through_tracker() {
            // SAFETY: Forwarding the caller's guarantees about `layout`.
            unsafe { global_tracker().allocate(&self.inner, layout) }
        } else {
            // SAFETY: Forwarding the caller's guarantees about `layout`.
            unsafe { self.inner.alloc(layout) }
        }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if self.routes_through_tracker() {
            // SAFETY: Forwarding the caller's guarantees about `layout`.
            unsafe { global_tracker().allocate_zeroed(&self.inner, layout) }
        } else {
            // SAFETY: Forwarding the caller's guarantees about `layout`.
            unsafe { self.inner.alloc_zeroed(layout) }
        }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if self.routes_through_tracker() {
            // SAFETY: Forwarding the caller's guarantees about `ptr` and `layout`.
            unsafe { global_tracker().deallocate(&self.inner, ptr, layout) }
        } else {
            // SAFETY: Forwarding the caller's guarantees about `ptr` and `layout`.
            unsafe { self.inner.dealloc(ptr, layout) }
        }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if self.routes_through_tracker() {
            // Allocate, copy and deallocate through our own entry points so that the old pointer
            // is retired and the new one recorded.
            // SAFETY: Forwarding the caller's guarantees; alignment and size were validated by
            // the caller as required by `GlobalAlloc::realloc`.
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };

            // SAFETY: `new_size` is non-zero per the `GlobalAlloc::realloc` contract.
            let new_ptr = unsafe { self.alloc(new_layout) };

            if !new_ptr.is_null() {
                let copy_len = layout.size().min(new_size);

                // SAFETY: Both blocks are valid for `copy_len` bytes and cannot overlap
                // because the new block was just handed out while the old one is still live.
                unsafe { std::ptr::copy_nonoverlapping(ptr, new_ptr, copy_len) };

                // SAFETY: `ptr` was allocated by us with `layout`.
                unsafe { self.dealloc(ptr, layout) };
            }

            new_ptr
        } else {
            // SAFETY: Forwarding the caller's guarantees.
            unsafe { self.inner.realloc(ptr, layout, new_size) }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::PointerState;
    use crate::tracker::Bookkeeping;

    static_assertions::assert_impl_all!(Allocator<System>: Send, Sync);

    fn layout(size: usize) -> Layout {
        Layout::from_size_align(size, 8).unwrap()
    }

    #[test]
    #[cfg(feature = "tracking")]
    fn tracking_feature_selects_tracked_mode() {
        assert_eq!(Mode::BUILD_DEFAULT, Mode::Tracked);
        assert_eq!(Allocator::system().mode(), Mode::Tracked);
    }

    #[test]
    #[cfg(not(feature = "tracking"))]
    fn no_tracking_feature_selects_passthrough_mode() {
        assert_eq!(Mode::BUILD_DEFAULT, Mode::Passthrough);
        assert_eq!(Allocator::system().mode(), Mode::Passthrough);
    }

    #[test]
    fn explicit_modes_override_build_default() {
        assert_eq!(Allocator::tracked(System).mode(), Mode::Tracked);
        assert_eq!(Allocator::passthrough(System).mode(), Mode::Passthrough);
        assert_eq!(
            Allocator::with_mode(System, Mode::Passthrough).mode(),
            Mode::Passthrough
        );
    }

    // The unit test binary does not install a global allocator, so the process-wide tracker
    // only sees what these tests send to it explicitly.

    #[test]
    fn tracked_mode_records_in_global_tracker() {
        let allocator = Allocator::tracked(System);

        // SAFETY: Non-zero size.
        let ptr = unsafe { allocator.alloc(layout(72)) };
        let info = global_tracker().query_info(ptr);
        assert_eq!(info.state(), PointerState::Allocated);
        assert_eq!(info.size(), 72);

        // SAFETY: Allocated above with the same layout.
        unsafe { allocator.dealloc(ptr, layout(72)) };
        assert_eq!(
            global_tracker().query_info(ptr).state(),
            PointerState::Deallocated
        );
    }

    #[test]
    fn tracked_realloc_retires_old_and_records_new() {
        let allocator = Allocator::tracked(System);

        // SAFETY: Non-zero size.
        let old = unsafe { allocator.alloc_zeroed(layout(16)) };
        // SAFETY: `old` holds 16 bytes.
        unsafe { old.write(0xA5) };

        // SAFETY: Allocated above with this layout; new size is non-zero.
        let new = unsafe { allocator.realloc(old, layout(16), 4096) };
        assert!(!new.is_null());

        // SAFETY: The first byte was copied over from the old block.
        assert_eq!(unsafe { new.read() }, 0xA5);

        let info = global_tracker().query_info(new);
        assert_eq!(info.state(), PointerState::Allocated);
        assert_eq!(info.size(), 4096);

        // SAFETY: Reallocated above to this layout.
        unsafe { allocator.dealloc(new, layout(4096)) };
    }

    #[test]
    fn passthrough_mode_records_nothing() {
        let allocator = Allocator::passthrough(System);

        // SAFETY: Non-zero size.
        let ptr = unsafe { allocator.alloc(layout(56)) };
        // Freed pointers of other tests may share the address, so only rule out a live record.
        assert_ne!(
            global_tracker().query_info(ptr).state(),
            PointerState::Allocated
        );

        // SAFETY: Allocated above with the same layout.
        unsafe { allocator.dealloc(ptr, layout(56)) };
    }

    #[test]
    fn bookkeeping_allocations_bypass_tracker() {
        let allocator = Allocator::tracked(System);

        let ptr = {
            let _bookkeeping = Bookkeeping::enter();
            // SAFETY: Non-zero size.
            unsafe { allocator.alloc(layout(88)) }
        };

        // Freed pointers of other tests may share the address, so only rule out a live record.
        assert_ne!(
            global_tracker().query_info(ptr).state(),
            PointerState::Allocated
        );

        {
            let _bookkeeping = Bookkeeping::enter();
            // SAFETY: Allocated above with the same layout, also bypassing the tracker.
            unsafe { allocator.dealloc(ptr, layout(88)) };
        }
    }
}
