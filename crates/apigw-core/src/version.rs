//! Snapshot version tracking.
//!
//! This module provides [`SnapshotVersion`], the per-label version attached to
//! every published snapshot. Versions start at 1 and strictly increase on each
//! publish for a label; a version is never handed out twice.

use std::fmt;

/// Version identifier for a published snapshot.
///
/// # Example
///
/// ```rust
/// use apigw_core::SnapshotVersion;
///
/// let v1 = SnapshotVersion::initial();
/// let v2 = v1.next();
///
/// assert!(v2 > v1);
/// assert_eq!(v2.to_string(), "2");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotVersion(u64);

impl SnapshotVersion {
    /// The version of the first snapshot published for a label.
    #[must_use]
    pub const fn initial() -> Self {
        Self(1)
    }

    /// Create a version from its numeric value.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// The version following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SnapshotVersion> for String {
    fn from(v: SnapshotVersion) -> Self {
        v.0.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_version() {
        assert_eq!(SnapshotVersion::initial().as_u64(), 1);
    }

    #[test]
    fn test_next_is_strictly_greater() {
        let mut v = SnapshotVersion::initial();
        for expected in 2..=10 {
            let next = v.next();
            assert!(next > v);
            assert_eq!(next.as_u64(), expected);
            v = next;
        }
    }

    #[test]
    fn test_version_display() {
        let v = SnapshotVersion::new(42);
        assert_eq!(format!("{v}"), "42");
        assert_eq!(String::from(v), "42");
    }
}
