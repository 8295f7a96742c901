//! # apigw-adapter
//!
//! Control plane core of an API gateway adapter.
//!
//! API definitions are indexed per deployment label and folded into versioned
//! proxy snapshots; clusters bound to a service registry follow the
//! registry's membership through long-poll watches.
//!
//! ## Quick Start
//!
//! ```rust
//! use apigw_adapter::prelude::*;
//!
//! # fn example() -> apigw_adapter::prelude::Result<()> {
//! let orchestrator = Orchestrator::from_config(&AdapterConfig::default())?;
//!
//! let definition = br#"{
//!     "info": {"title": "orders", "version": "v2"},
//!     "x-wso2-production-endpoints": {"urls": ["http://orders.internal:8080"]},
//!     "paths": {"/orders": {}}
//! }"#;
//! orchestrator.submit_definition(definition)?;
//!
//! let snapshot = orchestrator.current_snapshot(&Label::default_label()).unwrap();
//! assert_eq!(snapshot.version(), SnapshotVersion::initial());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Architecture
//!
//! - `apigw-core` - resources, labels, discovery queries and the error type
//! - `apigw-cache` - per-label versioned snapshot cache with subscriptions
//! - `apigw-discovery` - registry client and watch coordinator
//! - `apigw-sync` - definition parsing, indexing and the update orchestrator
//!
//! This crate re-exports all public APIs and ships the `apigw-adapter` binary.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub use apigw_cache as cache;
pub use apigw_core as core;
pub use apigw_discovery as discovery;
pub use apigw_sync as sync;

pub mod definitions;

/// Prelude module for convenient imports.
///
/// ```rust
/// use apigw_adapter::prelude::*;
/// ```
pub mod prelude {
    pub use apigw_core::{
        AdapterError, ApiKey, Cluster, DiscoveryQuery, Endpoint, Label, Result, Route,
        SnapshotVersion,
    };

    pub use apigw_cache::{Cache, CacheStats, ResourceSet, Snapshot, SnapshotCache, SnapshotWatch};

    pub use apigw_discovery::{
        EndpointList, MeshCredentialWatcher, RegistryClient, RegistryClientConfig, ServiceRegistry,
        TlsMaterial, WatchCoordinator, WatchSettings,
    };

    pub use apigw_sync::{
        AdapterConfig, DefinitionParser, OpenApiParser, Orchestrator, ShutdownController,
        UpdateReport,
    };
}

/// Version information for this crate.
pub mod version {
    /// Crate version.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Minimum supported Rust version.
    pub const MSRV: &str = "1.75";

    /// Get version info as a string.
    pub fn version_string() -> String {
        format!("apigw-adapter {} (MSRV {})", VERSION, MSRV)
    }
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_imports_work() {
        let orchestrator = Orchestrator::builder().build();
        let definition = br#"{
            "info": {"title": "orders", "version": "v2"},
            "x-wso2-labels": ["edge"],
            "x-wso2-production-endpoints": {"urls": ["http://orders.internal:8080"]}
        }"#;

        let report = orchestrator.submit_definition(definition).unwrap();
        assert_eq!(
            report.version_of(&Label::new("edge")),
            Some(SnapshotVersion::initial())
        );
        assert_eq!(orchestrator.cache().stats().commits(), 1);
    }

    #[test]
    fn version_info() {
        let version = super::version::version_string();
        assert!(version.contains("apigw-adapter"));
    }
}
