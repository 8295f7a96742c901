//! Parsed API definitions and the parser seam.
//!
//! A definition arrives as raw bytes and is turned into a [`ParsedDefinition`]
//! by a [`DefinitionParser`]. The parsed form carries everything the indexer
//! needs: the API key, the labels the API is deployed to, and the routes and
//! clusters it contributes to each of those labels.

use apigw_core::{ApiKey, Cluster, DiscoveryQuery, Label, Result, Route};
use serde_json::Value;

/// Routes and clusters one environment of an API contributes to a label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Contribution {
    /// Routes, in match order.
    pub routes: Vec<Route>,
    /// Clusters the routes point at.
    pub clusters: Vec<Cluster>,
}

impl Contribution {
    /// Check if the contribution adds nothing.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.clusters.is_empty()
    }
}

/// A definition after parsing.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedDefinition {
    /// Identity of the API.
    pub key: ApiKey,
    /// Parsed document; two submissions are the same definition when their
    /// content is equal.
    pub content: Value,
    /// Labels the API is deployed to, never empty.
    pub labels: Vec<Label>,
    /// Production environment contribution.
    pub production: Contribution,
    /// Sandbox environment contribution.
    pub sandbox: Contribution,
}

impl ParsedDefinition {
    /// Every cluster, production first.
    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.production
            .clusters
            .iter()
            .chain(self.sandbox.clusters.iter())
    }

    /// Discovery-bound clusters with their queries.
    pub fn discovery_clusters(&self) -> impl Iterator<Item = (&Cluster, &DiscoveryQuery)> {
        self.clusters()
            .filter_map(|c| c.discovery.as_ref().map(|q| (c, q)))
    }

    /// Check if the definition is deployed to `label`.
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }
}

/// Converts raw definition bytes into a [`ParsedDefinition`].
///
/// Implementations reject malformed input with
/// [`AdapterError::Parse`](apigw_core::AdapterError::Parse).
pub trait DefinitionParser: Send + Sync {
    /// Parse one definition.
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDefinition>;
}

impl<F> DefinitionParser for F
where
    F: Fn(&[u8]) -> Result<ParsedDefinition> + Send + Sync,
{
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDefinition> {
        self(bytes)
    }
}
