//! # apigw-discovery
//!
//! Service-registry integration for discovery-bound clusters.
//!
//! - [`RegistryClient`] - blocking health queries against a Consul-compatible
//!   registry, over HTTP or mutually authenticated HTTPS
//! - [`ServiceRegistry`] - the query seam, implemented by the client and by
//!   test doubles
//! - [`WatchCoordinator`] - one supervised long-poll task per cluster,
//!   delivering membership changes on a [`WatchSubscription`]
//! - [`EndpointList`] - membership compared without regard to order
//! - [`MeshCredentialWatcher`] - long-polls the registry's Connect CA and feeds
//!   renewed credentials to [`RegistryClient::spawn_rotation_listener`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use apigw_core::DiscoveryQuery;
//! use apigw_discovery::{RegistryClient, RegistryClientConfig, WatchCoordinator, WatchSettings};
//!
//! # async fn example() -> apigw_core::Result<()> {
//! let client = RegistryClient::new(
//!     RegistryClientConfig::new("http://127.0.0.1:8500").wait(Duration::from_secs(30)),
//! )?;
//! let coordinator = WatchCoordinator::new(Arc::new(client), WatchSettings::default());
//!
//! let mut members = coordinator.start_watch("clusterProd_pets_v1", DiscoveryQuery::parse("pets.prod")?)?;
//! while let Some(endpoints) = members.next().await {
//!     println!("pets is served by {endpoints}");
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod coordinator;
mod endpoint;
mod mesh;
mod registry;
mod tls;

pub use client::{RegistryClient, RegistryClientConfig, INDEX_HEADER, TOKEN_HEADER};
pub use coordinator::{WatchCoordinator, WatchSettings, WatchSubscription};
pub use endpoint::EndpointList;
pub use mesh::MeshCredentialWatcher;
pub use registry::{BlockingIndex, QueryResult, ServiceRegistry};
pub use tls::TlsMaterial;
