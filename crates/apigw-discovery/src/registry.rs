//! The service registry seam.

use std::collections::BTreeMap;
use std::fmt;

use apigw_core::{DiscoveryQuery, Result};
use async_trait::async_trait;

use crate::EndpointList;

/// Key under which the local datacenter's index is tracked.
const LOCAL_DC: &str = "";

/// Opaque long-poll position, tracked per datacenter.
///
/// A fresh index (all zeros) makes the registry answer immediately; passing
/// back the index of the previous answer blocks until something changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockingIndex(BTreeMap<String, u64>);

impl BlockingIndex {
    /// Index for a datacenter, `None` selecting the local one.
    pub fn get(&self, datacenter: Option<&str>) -> u64 {
        self.0
            .get(datacenter.unwrap_or(LOCAL_DC))
            .copied()
            .unwrap_or(0)
    }

    /// Record the index returned for a datacenter.
    pub fn set(&mut self, datacenter: Option<&str>, index: u64) {
        self.0
            .insert(datacenter.unwrap_or(LOCAL_DC).to_string(), index);
    }

    /// Check if no datacenter has been queried yet.
    pub fn is_initial(&self) -> bool {
        self.0.values().all(|&i| i == 0)
    }
}

impl fmt::Display for BlockingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (dc, index) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            let dc = if dc.is_empty() { "local" } else { dc.as_str() };
            write!(f, "{dc}={index}")?;
        }
        Ok(())
    }
}

/// Answer to one registry query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryResult {
    /// Healthy members across every queried datacenter.
    pub endpoints: EndpointList,
    /// Index to pass to the next query.
    pub index: BlockingIndex,
}

/// A service registry answering blocking membership queries.
///
/// [`RegistryClient`](crate::RegistryClient) is the HTTP implementation;
/// tests substitute their own.
#[async_trait]
pub trait ServiceRegistry: Send + Sync + 'static {
    /// Return the members matching `query`, blocking until they differ from
    /// the state at `index` or the registry's wait time elapses.
    async fn query(&self, query: &DiscoveryQuery, index: &BlockingIndex) -> Result<QueryResult>;
}
