//! # apigw-core
//!
//! Core types, traits, and error handling for the API gateway adapter.
//!
//! This crate provides the foundational types used across all other adapter crates:
//!
//! - [`AdapterError`] - Error taxonomy shared by indexing, publishing and discovery
//! - [`SnapshotVersion`] - Per-label monotonically increasing snapshot version
//! - [`Label`] and [`ApiKey`] - Deployment grouping and API definition identity
//! - [`Resource`] - Trait implemented by every proxy resource kept in a snapshot
//! - [`TypeUrl`] - Type URL handling and constants
//! - [`DiscoveryQuery`] - Service-discovery query descriptor embedded in endpoint URLs
//!
//! ## Example
//!
//! ```rust
//! use apigw_core::{ApiKey, Label, SnapshotVersion};
//!
//! let key = ApiKey::new("pets", "1.0");
//! assert_eq!(key.to_string(), "pets:1.0");
//!
//! let label = Label::default_label();
//! assert_eq!(label.as_str(), "default");
//!
//! let version = SnapshotVersion::initial();
//! assert_eq!(version.as_u64(), 1);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod label;
mod query;
mod resource;
mod type_url;
mod version;

pub use error::AdapterError;
pub use label::{ApiKey, Label};
pub use query::{DiscoveryQuery, DiscoveryUrl, DISCOVERY_MARKER};
pub use resource::{
    BoxResource, Cluster, ClusterLoadAssignment, Endpoint, Listener, Resource, Route,
    RouteConfiguration, UpstreamScheme,
};
pub use type_url::TypeUrl;
pub use version::SnapshotVersion;

/// Result type alias using [`AdapterError`].
pub type Result<T> = std::result::Result<T, AdapterError>;
