//! # apigw-cache
//!
//! Per-label snapshot cache for the API gateway adapter.
//!
//! - [`SnapshotCache`] - DashMap-based cache holding one snapshot per label
//! - [`Snapshot`] / [`ResourceSet`] - immutable, versioned proxy resources
//! - [`check_consistency`] - cross-reference validation run before every commit
//! - [`SnapshotWatch`] - subscription to a label's committed snapshots
//!
//! ## Key Design Decisions
//!
//! - Snapshots are immutable and atomically replaced
//! - Versions start at 1 per label and are never reused, even after removal
//! - All `DashMap` references are dropped before subscribers are notified
//!
//! ## Example
//!
//! ```rust
//! use apigw_cache::{Cache, ResourceSet, SnapshotCache};
//! use apigw_core::{Cluster, Endpoint, Label, Route};
//!
//! let cache = SnapshotCache::new();
//! let label = Label::new("prod");
//!
//! let resources = ResourceSet::builder("default")
//!     .routes([Route::new("pets", "/pets", "clusterProd_pets_v1")])
//!     .clusters([Cluster::with_static_endpoints(
//!         "clusterProd_pets_v1",
//!         vec![Endpoint::new("10.0.0.1", 80)],
//!     )])
//!     .build();
//!
//! let snapshot = cache.commit(&label, resources).unwrap();
//! assert_eq!(snapshot.version().as_u64(), 1);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod consistency;
mod snapshot;
mod stats;
mod watch;

pub use cache::{Cache, CacheBuilder, SnapshotCache};
pub use consistency::check_consistency;
pub use snapshot::{ResourceSet, ResourceSetBuilder, Snapshot};
pub use stats::CacheStats;
pub use watch::{SnapshotWatch, WatchId, WatchManager};
