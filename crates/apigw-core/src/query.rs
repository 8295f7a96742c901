//! Service-discovery query descriptors.
//!
//! An endpoint URL in an API definition may ask for its members to be resolved
//! through the service registry instead of being configured statically:
//!
//! ```text
//! consul(<query>, <default-url>)
//!
//! <query> := [ "[" dc ("," dc)* "]" "." ] service [ "." tag ]
//! ```
//!
//! The default URL is served until the registry delivers its first result.
//! A datacenter list of `[*]` (or an absent list) selects the registry's local
//! datacenter; `*` cannot be mixed with named datacenters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AdapterError, Result};

/// Prefix marking an endpoint URL as discovery-bound.
pub const DISCOVERY_MARKER: &str = "consul(";

/// A parsed registry query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Registered service name.
    pub service: String,
    /// Optional tag filter.
    pub tag: Option<String>,
    /// Datacenters to query; empty means the local datacenter.
    pub datacenters: Vec<String>,
}

impl DiscoveryQuery {
    /// Query for every instance of a service in the local datacenter.
    #[must_use]
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            service: name.into(),
            tag: None,
            datacenters: Vec::new(),
        }
    }

    /// Restrict the query to instances carrying `tag`.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Add a datacenter to query.
    #[must_use]
    pub fn in_datacenter(mut self, dc: impl Into<String>) -> Self {
        self.datacenters.push(dc.into());
        self
    }

    /// Parse the `<query>` part of a discovery URL.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (datacenters, rest) = match input.strip_prefix('[') {
            Some(after) => {
                let (list, rest) = after.split_once(']').ok_or_else(|| {
                    AdapterError::parse(format!("unterminated datacenter list in query {input:?}"))
                })?;
                let rest = rest.strip_prefix('.').ok_or_else(|| {
                    AdapterError::parse(format!(
                        "expected '.' after datacenter list in query {input:?}"
                    ))
                })?;
                let mut dcs = Vec::new();
                let mut local = false;
                for dc in list.split(',').map(str::trim) {
                    if dc.is_empty() {
                        return Err(AdapterError::parse(format!(
                            "empty datacenter name in query {input:?}"
                        )));
                    }
                    if dc == "*" {
                        local = true;
                    } else if !dcs.iter().any(|d| d == dc) {
                        dcs.push(dc.to_string());
                    }
                }
                // `*` is the local datacenter, which has no name to list
                // alongside others.
                if local && !dcs.is_empty() {
                    return Err(AdapterError::parse(format!(
                        "'*' cannot be combined with named datacenters in query {input:?}"
                    )));
                }
                (dcs, rest)
            }
            None => (Vec::new(), input),
        };

        let mut parts = rest.split('.');
        let service = parts.next().unwrap_or_default().trim();
        if service.is_empty() {
            return Err(AdapterError::parse(format!(
                "service name is missing in query {input:?}"
            )));
        }
        let tag = match parts.next().map(str::trim) {
            Some("") => {
                return Err(AdapterError::parse(format!("empty tag in query {input:?}")));
            }
            Some(tag) => Some(tag.to_string()),
            None => None,
        };
        if parts.next().is_some() {
            return Err(AdapterError::parse(format!(
                "too many segments in query {input:?}, expected [dcs].service.tag"
            )));
        }

        Ok(Self {
            service: service.to_string(),
            tag,
            datacenters,
        })
    }
}

impl fmt::Display for DiscoveryQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.datacenters.is_empty() {
            write!(f, "[{}].", self.datacenters.join(","))?;
        }
        f.write_str(&self.service)?;
        if let Some(tag) = &self.tag {
            write!(f, ".{tag}")?;
        }
        Ok(())
    }
}

/// A discovery-bound endpoint URL: the query plus its fallback URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryUrl {
    /// Registry query resolving the cluster members.
    pub query: DiscoveryQuery,
    /// URL served until the first discovery result arrives.
    pub default_url: Option<String>,
}

impl DiscoveryUrl {
    /// Check whether an endpoint URL carries the discovery marker.
    #[must_use]
    pub fn is_discovery_url(url: &str) -> bool {
        url.trim_start().starts_with(DISCOVERY_MARKER)
    }

    /// Parse `consul(<query>, <default-url>)`.
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        let inner = trimmed
            .strip_prefix(DISCOVERY_MARKER)
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| {
                AdapterError::parse(format!(
                    "discovery URL {url:?} must have the form consul(<query>, <default-url>)"
                ))
            })?;

        let (query, default_url) = match inner.split_once(',') {
            Some((query, default_url)) if !query.trim_start().starts_with('[') => {
                (query, Some(default_url))
            }
            // The datacenter list may itself contain commas.
            Some(_) => match inner.find(']') {
                Some(end) => match inner[end..].split_once(',') {
                    Some((tail, default_url)) => (&inner[..end + tail.len()], Some(default_url)),
                    None => (inner, None),
                },
                None => (inner, None),
            },
            None => (inner, None),
        };

        let default_url = default_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(Self {
            query: DiscoveryQuery::parse(query)?,
            default_url,
        })
    }
}
