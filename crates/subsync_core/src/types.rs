//! Core type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Version of a subscription set.
///
/// Versions increase by exactly one per successful commit and are never
/// reused. Version 0 is the empty set every session starts with.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SetVersion(pub u64);

impl SetVersion {
    /// The initial, never-uploaded version.
    pub const INITIAL: Self = Self(0);

    /// Creates a version from a raw value.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the version that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Wall-clock timestamp in milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self(millis)
    }

    /// Returns the current time, or one millisecond after `previous` if the
    /// clock has not moved past it.
    #[must_use]
    pub fn now_after(previous: Self) -> Self {
        Self::now().max(Self(previous.0 + 1))
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_next_and_order() {
        let v = SetVersion::INITIAL;
        assert_eq!(v.next(), SetVersion::new(1));
        assert!(v < v.next());
        assert_eq!(format!("{}", SetVersion::new(7)), "v7");
    }

    #[test]
    fn now_after_is_strictly_later() {
        let far_future = Timestamp::from_millis(u64::MAX / 2);
        assert_eq!(
            Timestamp::now_after(far_future),
            Timestamp::from_millis(u64::MAX / 2 + 1)
        );

        let past = Timestamp::from_millis(1);
        assert!(Timestamp::now_after(past) > past);
    }
}
