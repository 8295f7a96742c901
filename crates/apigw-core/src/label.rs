//! Deployment labels and API definition identity.
//!
//! A [`Label`] names a deployment grouping: every proxy declaring the label
//! receives the snapshot published for it. An [`ApiKey`] identifies one
//! ingested API definition by its name and version.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A deployment grouping tag.
///
/// # Example
///
/// ```rust
/// use apigw_core::Label;
///
/// let prod = Label::new("prod");
/// assert_eq!(prod.as_str(), "prod");
/// assert!(Label::default_label().is_default());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Name of the implicit label used when a definition declares none.
    pub const DEFAULT: &'static str = "default";

    /// Create a label from a string.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The implicit label.
    #[must_use]
    pub fn default_label() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Check if this is the implicit label.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }

    /// Get the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::default_label()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Label {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity of an ingested API definition: `(name, version)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApiKey {
    name: String,
    version: String,
}

impl ApiKey {
    /// Create a key from an API name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// API name (the definition title).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// API version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_label() {
        let label = Label::default();
        assert!(label.is_default());
        assert_eq!(label.to_string(), "default");
        assert!(!Label::new("prod").is_default());
    }

    #[test]
    fn test_label_serde_transparent() {
        let label: Label = serde_json::from_str("\"sandbox\"").unwrap();
        assert_eq!(label, Label::new("sandbox"));
    }

    #[test]
    fn test_api_key_display_and_equality() {
        let a = ApiKey::new("pets", "1.0");
        let b = ApiKey::new("pets", "1.0");
        let c = ApiKey::new("pets", "2.0");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "pets:1.0");
        assert_eq!(a.name(), "pets");
        assert_eq!(a.version(), "1.0");
    }
}
