use serde::{Deserialize, Serialize};

/// Row version of a stored transaction.
///
/// Every committed write bumps it by one; an update carries the version it
/// read and is refused when the row has moved on. An unsaved transaction sits
/// at [`Version::initial`], and the insert stores [`Version::first`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn initial() -> Self {
        Self::default()
    }

    pub fn first() -> Self {
        Self::initial().next()
    }

    /// The version a successful write against `self` produces.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw value for the `version` column.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}
