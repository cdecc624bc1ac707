//! Three-valued logic for load-time facts that may depend on runtime paths.

use serde::{Deserialize, Serialize};

/// A boolean that may also be "unknown".
///
/// Used by the chain builder to track whether a delay has happened before a
/// given step: definitely (`True`), definitely not (`False`), or only on some
/// paths (`Unknown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kleenean {
    #[default]
    False,
    Unknown,
    True,
}

impl Kleenean {
    #[must_use]
    pub const fn from_bool(value: bool) -> Self {
        if value { Kleenean::True } else { Kleenean::False }
    }

    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Kleenean::True)
    }

    #[must_use]
    pub const fn is_false(self) -> bool {
        matches!(self, Kleenean::False)
    }

    #[must_use]
    pub const fn is_unknown(self) -> bool {
        matches!(self, Kleenean::Unknown)
    }

    /// True if either side is true, unknown if either side is unknown.
    #[must_use]
    pub const fn or(self, other: Self) -> Self {
        match (self, other) {
            (Kleenean::True, _) | (_, Kleenean::True) => Kleenean::True,
            (Kleenean::Unknown, _) | (_, Kleenean::Unknown) => Kleenean::Unknown,
            _ => Kleenean::False,
        }
    }

    /// False if either side is false, unknown if either side is unknown.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        match (self, other) {
            (Kleenean::False, _) | (_, Kleenean::False) => Kleenean::False,
            (Kleenean::Unknown, _) | (_, Kleenean::Unknown) => Kleenean::Unknown,
            _ => Kleenean::True,
        }
    }

    #[must_use]
    pub const fn not(self) -> Self {
        match self {
            Kleenean::True => Kleenean::False,
            Kleenean::False => Kleenean::True,
            Kleenean::Unknown => Kleenean::Unknown,
        }
    }
}

impl From<bool> for Kleenean {
    fn from(value: bool) -> Self {
        Self::from_bool(value)
    }
}
