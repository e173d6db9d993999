//! Interned field identities.
//!
//! The front end hashes a field's declaring type, type, and source name
//! into a single `i64`; analyses compare fields only by that hash, so the
//! interned value is the hash itself. Declared fields always hash to a
//! non-negative value — the negative range is reserved for sentinels.

use std::cmp::Ordering;
use std::fmt;

/// An interned field. Identity, ordering, and hashing are all by `hash`.
#[derive(Clone, Copy)]
pub struct Field {
    hash: i64,
}

impl Field {
    /// Sentinel standing in for every array element. All array indices are
    /// indistinguishable to the analyses, so reads and writes through any
    /// index hit this one slot.
    pub const INTESTINES: Field = Field { hash: -1 };

    /// Sentinel for the synthetic return slot: `return x` is modelled as
    /// `ret.RETURN_VALUE = x`, unifying return handling with field-write
    /// handling.
    pub const RETURN_VALUE: Field = Field { hash: -2 };

    /// A field declared in source. The hash must be non-negative; the
    /// negative range is reserved for sentinels.
    pub fn declared(hash: i64) -> Self {
        debug_assert!(hash >= 0, "declared field hash must be non-negative");
        Field { hash }
    }

    /// The interned hash.
    #[inline]
    pub fn hash(self) -> i64 {
        self.hash
    }

    /// Whether this is one of the two sentinel fields.
    #[inline]
    pub fn is_sentinel(self) -> bool {
        self.hash < 0
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Field {}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Field {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl std::hash::Hash for Field {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hash {
            -1 => write!(f, "Field(<intestines>)"),
            -2 => write!(f, "Field(<return>)"),
            hash => write!(f, "Field({hash})"),
        }
    }
}
