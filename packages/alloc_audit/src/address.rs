//! Opaque pointer identity.

use std::fmt;

/// The numeric address of a heap pointer, used as the identity of a tracked allocation.
///
/// An `Address` is only ever compared and printed. It carries no provenance and is never
/// turned back into a pointer, so holding one does not keep the memory alive or give access to it.
///
/// # Examples
///
/// ```
/// use alloc_audit::Address;
///
/// let value = 42_u32;
/// let address = Address::of(&raw const value);
///
/// assert!(!address.is_null());
/// assert!(address.to_string().starts_with("0x"));
/// ```
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(usize);

impl Address {
    /// The address of a null pointer. Never tracked.
    pub const NULL: Self = Self(0);

    /// Takes the address of `ptr`, discarding its provenance and any pointer metadata.
    #[must_use]
    #[inline]
    pub fn of<T: ?Sized>(ptr: *const T) -> Self {
        Self(ptr.addr())
    }

    /// The raw numeric value of the address.
    #[must_use]
    #[inline]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Whether this is the address of a null pointer.
    #[must_use]
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address")
            .field(&format_args!("{:#x}", self.0))
            .finish()
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::ptr;

    use super::*;

    static_assertions::assert_impl_all!(Address: Send, Sync, Copy);

    #[test]
    fn null_pointer_has_null_address() {
        let address = Address::of(ptr::null::<u8>());

        assert!(address.is_null());
        assert_eq!(address, Address::NULL);
    }

    #[test]
    fn same_pointer_same_address() {
        let values = [1_u64, 2, 3];

        let first = Address::of(values.as_ptr());
        let again = Address::of(&raw const values[0]);
        let second = Address::of(&raw const values[1]);

        assert_eq!(first, again);
        assert_ne!(first, second);
    }

    #[test]
    fn wide_pointer_uses_data_address() {
        let values = [7_u8; 16];
        let slice: &[u8] = &values;

        assert_eq!(Address::of(ptr::from_ref(slice)), Address::of(values.as_ptr()));
    }

    #[test]
    fn formats_as_prefixed_hex() {
        let address = Address(0xdead_beef);

        assert_eq!(address.to_string(), "0xdeadbeef");
        assert_eq!(format!("{address:x}"), "deadbeef");
        assert_eq!(format!("{address:?}"), "Address(0xdeadbeef)");
    }
}
