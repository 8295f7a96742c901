//! Error types for adapter operations.
//!
//! This module provides [`AdapterError`], the error type shared by definition
//! indexing, snapshot publishing and service discovery. Each variant maps to one
//! failure class with its own propagation policy:
//!
//! | Variant | Scope of the failure |
//! |---------|----------------------|
//! | [`AdapterError::Parse`] | the single rejected definition |
//! | [`AdapterError::ConsistencyViolation`] | one publish attempt for one label |
//! | [`AdapterError::DiscoveryTransport`] / [`AdapterError::Decode`] | one watch loop, retried |
//! | [`AdapterError::DiscoveryAuth`] | one watch loop, paused until an operator acts |
//! | [`AdapterError::CredentialLoad`] | the discovery subsystem as a whole |

/// Error type for adapter operations.
///
/// # Example
///
/// ```rust
/// use apigw_core::AdapterError;
///
/// fn require_title(title: &str) -> Result<(), AdapterError> {
///     if title.is_empty() {
///         return Err(AdapterError::parse("info.title is required"));
///     }
///     Ok(())
/// }
///
/// assert!(require_title("").is_err());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Malformed definition or discovery query syntax.
    #[error("parse error: {reason}")]
    Parse {
        /// Structural reason the definition was rejected.
        reason: String,
    },

    /// An internal invariant was broken while assembling a snapshot.
    #[error("consistency violation for label {label}: {reason}")]
    ConsistencyViolation {
        /// Label whose publish attempt was aborted.
        label: String,
        /// Description of the broken invariant.
        reason: String,
    },

    /// Network or timeout failure talking to the service registry.
    #[error("discovery transport error: {message}")]
    DiscoveryTransport {
        /// Error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The service registry rejected the configured credentials.
    #[error("discovery authentication rejected (status {status}): {message}")]
    DiscoveryAuth {
        /// HTTP status returned by the registry.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Registry response could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// Error message.
        message: String,
    },

    /// TLS material or token files could not be read or parsed.
    #[error("failed to load credential {path}: {message}")]
    CredentialLoad {
        /// Path of the credential file (or a description of the material).
        path: String,
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The component is shutting down.
    #[error("adapter is shutting down")]
    Shutdown,

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl AdapterError {
    /// Create a parse error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create a consistency violation for a label.
    pub fn consistency(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConsistencyViolation {
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create a discovery transport error from any error type.
    pub fn transport<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::DiscoveryTransport {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a credential load error.
    pub fn credential(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CredentialLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an internal error from any error type.
    pub fn internal<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether a watch loop may retry the failed query with the same index.
    ///
    /// Authentication failures are not retriable without operator intervention.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AdapterError::DiscoveryTransport { .. } | AdapterError::Decode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdapterError::consistency("prod", "route r1 references unknown cluster c9");
        let msg = err.to_string();
        assert!(msg.contains("prod"));
        assert!(msg.contains("c9"));
    }

    #[test]
    fn test_retriable_classification() {
        let io_err = std::io::Error::other("connection refused");
        assert!(AdapterError::transport("query failed", io_err).is_retriable());
        assert!(AdapterError::decode("bad json").is_retriable());
        assert!(!AdapterError::DiscoveryAuth {
            status: 403,
            message: "ACL not found".to_string(),
        }
        .is_retriable());
        assert!(!AdapterError::parse("missing urls").is_retriable());
    }

    #[test]
    fn test_internal_error_helper() {
        let io_err = std::io::Error::other("test error");
        let err = AdapterError::internal("operation failed", io_err);
        assert!(matches!(err, AdapterError::Internal { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
