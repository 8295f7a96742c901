//! # apigw-sync
//!
//! Keeps per-label proxy snapshots in line with deployed API definitions and
//! the service registry.
//!
//! - [`OpenApiParser`] - turns a JSON OpenAPI definition into routes and clusters
//! - [`ApiRegistry`] - deployed definitions, change detection and label folding
//! - [`Orchestrator`] - serializes ingestion and discovery results, publishes
//!   snapshots and keeps one discovery watch per referenced cluster
//! - [`AdapterConfig`] - TOML configuration
//!
//! ## Example
//!
//! ```rust
//! use apigw_core::Label;
//! use apigw_sync::Orchestrator;
//!
//! # fn example() -> apigw_core::Result<()> {
//! let orchestrator = Orchestrator::builder().build();
//!
//! let definition = br#"{
//!     "info": {"title": "pets", "version": "v1"},
//!     "x-wso2-labels": ["prod"],
//!     "x-wso2-basePath": "/pets",
//!     "x-wso2-production-endpoints": {"urls": ["http://10.0.0.1:8080"]},
//!     "paths": {"/list": {}}
//! }"#;
//! let report = orchestrator.submit_definition(definition)?;
//! assert!(report.changed);
//!
//! let snapshot = orchestrator.current_snapshot(&Label::new("prod")).unwrap();
//! assert_eq!(snapshot.resources().clusters().len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod definition;
mod indexer;
pub mod metrics;
mod openapi;
mod orchestrator;
pub mod shutdown;

pub use config::{AdapterConfig, DiscoveryConfig, ListenerConfig};
pub use definition::{Contribution, DefinitionParser, ParsedDefinition};
pub use indexer::{ApiRecord, ApiRegistry, IngestOutcome, ListenerSettings};
pub use metrics::AdapterMetrics;
pub use openapi::OpenApiParser;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, UpdateReport};
pub use shutdown::{OperationGuard, ShutdownController, ShutdownSignal};
