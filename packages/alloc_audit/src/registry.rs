//! Address-keyed store of allocation records.

use std::mem;

use foldhash::{HashMap, HashMapExt};

use crate::record::Record;
use crate::{Address, InsertError, LookupError, PointerInfo, PointerState};

/// Records of every pointer a tracker has seen, keyed by address.
///
/// At most one record exists per address. Released records stay in place until the address is
/// handed out again by the platform allocator, at which point the new allocation supersedes them.
#[derive(Debug)]
pub(crate) struct Registry {
    records: HashMap<Address, Record>,

    // Incremented on every insert. Lets reports list the most recent allocations first.
    next_sequence: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Number of records held, released ones included.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Adds a record for `address`.
    ///
    /// Rejects null addresses and addresses that already have a live record. Storage for the
    /// new record is reserved up front so that a failure leaves the registry untouched.
    pub(crate) fn insert(&mut self, address: Address, info: PointerInfo) -> Result<(), InsertError> {
        if address.is_null() {
            return Err(InsertError::NullIdentity);
        }

        if self
            .records
            .get(&address)
            .is_some_and(|existing| existing.info.state().is_outstanding())
        {
            return Err(InsertError::DuplicateIdentity);
        }

        self.records
            .try_reserve(1)
            .map_err(InsertError::NodeAllocationFailed)?;

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.records.insert(address, Record::new(info, sequence));
        Ok(())
    }

    pub(crate) fn find(&self, address: Address) -> Result<&Record, LookupError> {
        self.check_lookup(address)?;
        self.records.get(&address).ok_or(LookupError::NotTracked)
    }

    pub(crate) fn find_mut(&mut self, address: Address) -> Result<&mut Record, LookupError> {
        self.check_lookup(address)?;
        self.records
            .get_mut(&address)
            .ok_or(LookupError::NotTracked)
    }

    /// Evicts the record for `address` entirely.
    pub(crate) fn remove(&mut self, address: Address) -> Result<Record, LookupError> {
        self.check_lookup(address)?;
        self.records.remove(&address).ok_or(LookupError::NotTracked)
    }

    /// Takes every record out of the registry, most recently inserted first.
    ///
    /// The registry's own storage is released; the tracked allocations themselves are not touched.
    pub(crate) fn drain(&mut self) -> Vec<(Address, Record)> {
        let mut drained: Vec<_> = mem::replace(&mut self.records, HashMap::new())
            .into_iter()
            .collect();

        drained.sort_unstable_by(|(_, a), (_, b)| b.sequence.cmp(&a.sequence));
        drained
    }

    fn check_lookup(&self, address: Address) -> Result<(), LookupError> {
        if address.is_null() {
            Err(LookupError::NullIdentity)
        } else if self.is_empty() {
            Err(LookupError::EmptyRegistry)
        } else {
            Ok(())
        }
    }
}

/// Convenience for the common case of recording a fresh, live allocation.
pub(crate) const fn allocated(size: usize) -> PointerInfo {
    PointerInfo::new(PointerState::Allocated, size)
}
