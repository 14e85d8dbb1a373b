//! Access right bitmask

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Permission bits held by a subject on a policy.
    ///
    /// Combination is bitwise OR; a mask grants a request when
    /// `(mask & requested) == requested`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AccessRight: u32 {
        const VIEW          = 1;
        const CREATE        = 1 << 1;
        const CHANGE        = 1 << 2;
        const DELETE        = 1 << 3;
        const COPY          = 1 << 4;
        const MOVE          = 1 << 5;
        const MANAGE_RIGHTS = 1 << 6;
    }
}

// Right name mappings
const NAMES: &[(&str, AccessRight)] = &[
    ("view", AccessRight::VIEW),
    ("create", AccessRight::CREATE),
    ("change", AccessRight::CHANGE),
    ("delete", AccessRight::DELETE),
    ("copy", AccessRight::COPY),
    ("move", AccessRight::MOVE),
    ("manage_rights", AccessRight::MANAGE_RIGHTS),
];

impl AccessRight {
    pub const NO_ACCESS: Self = Self::empty();
    pub const FULL_ACCESS: Self = Self::all();

    /// True when every requested bit is present
    #[inline]
    pub fn grants(self, requested: AccessRight) -> bool {
        (self & requested) == requested
    }

    /// Decode a persisted value, dropping bits that name no flag
    #[inline]
    pub fn from_stored(value: u64) -> Self {
        Self::from_bits_truncate(value as u32)
    }

    #[inline]
    pub fn to_stored(self) -> u64 {
        u64::from(self.bits())
    }

    /// Convert a mask to a list of right names
    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(_, r)| self.contains(*r))
            .map(|(n, _)| *n)
            .collect()
    }

    /// Convert a list of right names to a mask (unknown names are ignored)
    pub fn from_names(names: &[&str]) -> Self {
        names
            .iter()
            .filter_map(|n| NAMES.iter().find(|(k, _)| k == n).map(|(_, r)| *r))
            .fold(Self::NO_ACCESS, |a, b| a | b)
    }
}

impl fmt::Display for AccessRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        write!(f, "{}", self.names().join("|"))
    }
}
