//! Per-pointer allocation metadata.

/// Lifecycle state of a tracked pointer.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum PointerState {
    /// The pointer is not tracked, or its record exists without a successful allocation behind it.
    #[default]
    Invalid,

    /// The allocation is outstanding.
    Allocated,

    /// The allocation was released through the tracker. The record is retained so that
    /// repeated releases of the same pointer can be recognized.
    Deallocated,
}

impl PointerState {
    /// Whether a pointer in this state was never properly released through the tracker.
    ///
    /// Such pointers are reported when the tracker is drained at exit.
    #[must_use]
    #[inline]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, Self::Invalid | Self::Allocated)
    }
}

/// A copy of what the tracker knows about one pointer.
///
/// Returned by value so callers can never mutate the tracker's own bookkeeping.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct PointerInfo {
    state: PointerState,
    size: usize,
}

impl PointerInfo {
    /// What the tracker reports for a pointer it does not know about.
    pub const INVALID: Self = Self::new(PointerState::Invalid, 0);

    /// Creates pointer info for an allocation of `size` bytes in the given state.
    #[must_use]
    #[inline]
    pub const fn new(state: PointerState, size: usize) -> Self {
        Self { state, size }
    }

    /// Lifecycle state of the pointer.
    #[must_use]
    #[inline]
    pub const fn state(&self) -> PointerState {
        self.state
    }

    /// Size of the allocation in bytes, as requested from the allocator.
    #[must_use]
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Registry entry: the public pointer info plus the insertion order used to sort reports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Record {
    pub(crate) info: PointerInfo,
    pub(crate) sequence: u64,
}

impl Record {
    pub(crate) const fn new(info: PointerInfo, sequence: u64) -> Self {
        Self { info, sequence }
    }

    /// Marks the allocation as released. The size is kept for accounting and reporting.
    pub(crate) fn retire(&mut self) {
        self.info.state = PointerState::Deallocated;
    }
}
