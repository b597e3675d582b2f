//! Exit-time leak reports.

use std::fmt;
use std::slice;

use crate::record::Record;
use crate::{Address, PointerState};

/// How a leaked pointer was left behind.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LeakKind {
    /// The record never reached a valid allocated state.
    Invalid,

    /// The allocation was never released.
    StillAllocated,
}

/// A pointer that was not released through the tracker before the tracker was drained.
///
/// The `Display` form is the exact line reported at application close.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Leak {
    address: Address,
    size: usize,
    kind: LeakKind,
}

impl Leak {
    /// Creates a leak entry.
    #[must_use]
    pub const fn new(address: Address, size: usize, kind: LeakKind) -> Self {
        Self {
            address,
            size,
            kind,
        }
    }

    /// The leaked pointer.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Size of the leaked allocation in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// What state the pointer was left in.
    #[must_use]
    pub const fn kind(&self) -> LeakKind {
        self.kind
    }

    fn from_record(address: Address, record: &Record) -> Option<Self> {
        let kind = match record.info.state() {
            PointerState::Invalid => LeakKind::Invalid,
            PointerState::Allocated => LeakKind::StillAllocated,
            PointerState::Deallocated => return None,
        };

        Some(Self::new(address, record.info.size(), kind))
    }
}

impl fmt::Display for Leak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LeakKind::Invalid => write!(
                f,
                "Pointer {} of size {} is in an invalid state at application close.",
                self.address, self.size
            ),
            LeakKind::StillAllocated => write!(
                f,
                "Pointer {} of size {} is still in allocated state at application close.",
                self.address, self.size
            ),
        }
    }
}

/// Result of draining a tracker: every pointer that was not cleanly released.
///
/// # Examples
///
/// ```
/// use std::alloc::{Layout, System};
///
/// use alloc_audit::{LeakKind, Tracker};
///
/// let tracker = Tracker::new();
/// let layout = Layout::from_size_align(100, 8).unwrap();
///
/// // SAFETY: The layout has a non-zero size.
/// let ptr = unsafe { tracker.allocate(&System, layout) };
///
/// let report = tracker.drain_report();
/// assert_eq!(report.len(), 1);
///
/// let leak = report.iter().next().unwrap();
/// assert_eq!(leak.size(), 100);
/// assert_eq!(leak.kind(), LeakKind::StillAllocated);
///
/// // Draining forgets the record but never frees the payload.
/// // SAFETY: The pointer came from `System` with this layout and was not freed.
/// unsafe { std::alloc::GlobalAlloc::dealloc(&System, ptr, layout) };
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExitReport {
    leaks: Vec<Leak>,
    released: usize,
}

impl ExitReport {
    pub(crate) fn from_records(records: Vec<(Address, Record)>) -> Self {
        let total = records.len();

        let leaks: Vec<_> = records
            .iter()
            .filter_map(|(address, record)| Leak::from_record(*address, record))
            .collect();

        let released = total
            .checked_sub(leaks.len())
            .expect("leaks are a subset of the drained records");

        Self { leaks, released }
    }

    /// Whether every drained record had been released.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }

    /// Number of leaked pointers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leaks.len()
    }

    /// Whether there are no leaked pointers. Same as [`is_clean()`](Self::is_clean).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaks.is_empty()
    }

    /// Number of drained records that had been released properly.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released
    }

    /// Leaked pointers, most recently allocated first.
    #[must_use]
    pub fn leaks(&self) -> &[Leak] {
        &self.leaks
    }

    /// Iterates over the leaked pointers, most recently allocated first.
    pub fn iter(&self) -> slice::Iter<'_, Leak> {
        self.leaks.iter()
    }

    /// Writes the report to stderr, one line per leak. Prints nothing for a clean report.
    #[cfg_attr(test, mutants::skip)] // Too difficult to test stderr output reliably - manually tested.
    pub fn print_to_stderr(&self) {
        if self.is_clean() {
            return;
        }

        eprint!("{self}");
    }
}

impl<'a> IntoIterator for &'a ExitReport {
    type Item = &'a Leak;
    type IntoIter = slice::Iter<'a, Leak>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for leak in &self.leaks {
            writeln!(f, "{leak}")?;
        }

        Ok(())
    }
}
