//! Endpoint lists returned by the registry.

use std::fmt;

use apigw_core::Endpoint;
use serde::Deserialize;

/// The healthy members of a service, compared without regard to order.
///
/// The list is kept sorted and deduplicated, so two lists holding the same
/// members in a different order (or with repeated entries) are equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EndpointList(Vec<Endpoint>);

impl EndpointList {
    /// Create a list from endpoints in any order.
    pub fn new(mut endpoints: Vec<Endpoint>) -> Self {
        endpoints.sort_unstable();
        endpoints.dedup();
        Self(endpoints)
    }

    /// An empty list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Merge the lists of several datacenters.
    pub fn merge(lists: impl IntoIterator<Item = EndpointList>) -> Self {
        Self::new(lists.into_iter().flat_map(|l| l.0).collect())
    }

    /// Endpoints in canonical order.
    #[inline]
    pub fn as_slice(&self) -> &[Endpoint] {
        &self.0
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the service has no healthy members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Endpoint>> for EndpointList {
    fn from(endpoints: Vec<Endpoint>) -> Self {
        Self::new(endpoints)
    }
}

impl FromIterator<Endpoint> for EndpointList {
    fn from_iter<I: IntoIterator<Item = Endpoint>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for EndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, endpoint) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{endpoint}")?;
        }
        f.write_str("]")
    }
}

/// One entry of a `/v1/health/service/<name>` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthEntry {
    pub node: HealthNode,
    pub service: HealthService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthNode {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct HealthService {
    #[serde(default)]
    pub address: String,
    pub port: u16,
}

impl HealthEntry {
    /// The service address, or the node address when the service registered
    /// without one.
    pub(crate) fn into_endpoint(self) -> Endpoint {
        let host = if self.service.address.is_empty() {
            self.node.address
        } else {
            self.service.address
        };
        Endpoint::new(host, self.service.port)
    }
}
