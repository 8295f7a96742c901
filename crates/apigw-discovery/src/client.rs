//! HTTP client for a Consul-compatible service registry.
//!
//! Membership is read from the health endpoint with blocking queries:
//!
//! ```text
//! GET {base}/v1/health/service/{service}?dc=..&tag=..&passing=true&index=..&wait=..s
//! X-Consul-Token: <acl token>
//! ```
//!
//! The response carries the new index in the `X-Consul-Index` header. Connect
//! CA requests (see [`MeshCredentialWatcher`](crate::MeshCredentialWatcher))
//! use the same blocking-query machinery.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apigw_core::{AdapterError, DiscoveryQuery, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::endpoint::HealthEntry;
use crate::tls::build_http_client;
use crate::{BlockingIndex, EndpointList, QueryResult, ServiceRegistry, TlsMaterial};

/// Header carrying the ACL token.
pub const TOKEN_HEADER: &str = "X-Consul-Token";

/// Header carrying the blocking-query index.
pub const INDEX_HEADER: &str = "X-Consul-Index";

/// Lower bound for the per-request timeout.
const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for [`RegistryClient`].
#[derive(Clone, Debug)]
pub struct RegistryClientConfig {
    /// Registry base URL; its scheme selects HTTP or HTTPS.
    pub base_url: String,
    /// ACL token sent with every request.
    pub acl_token: Option<String>,
    /// How long the registry may hold a blocking query.
    pub wait: Duration,
    /// Only return instances whose health checks pass.
    pub passing_only: bool,
    /// Client credentials, required for an `https` base URL.
    pub tls: Option<TlsMaterial>,
}

impl RegistryClientConfig {
    /// Create settings for a registry URL with default options.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            acl_token: None,
            wait: Duration::from_secs(60),
            passing_only: true,
            tls: None,
        }
    }

    /// Set the ACL token.
    pub fn acl_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into().trim().to_string();
        self.acl_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Set the blocking-query wait time.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Select whether only passing instances are returned.
    pub fn passing_only(mut self, passing_only: bool) -> Self {
        self.passing_only = passing_only;
        self
    }

    /// Set client TLS material.
    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Registry client issuing blocking health queries.
///
/// The underlying HTTP client sits behind an [`ArcSwap`] so TLS material can
/// be rotated while watches are running. A query loads the client once when it
/// starts and keeps using it until it completes.
#[derive(Debug)]
pub struct RegistryClient {
    base_url: Url,
    secure: bool,
    acl_token: Option<String>,
    wait: Duration,
    passing_only: bool,
    timeout: Duration,
    http: ArcSwap<reqwest::Client>,
    rotations: AtomicU64,
}

impl RegistryClient {
    /// Create a client.
    ///
    /// An `https` URL requires TLS material; material given for an `http` URL
    /// is ignored.
    pub fn new(config: RegistryClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            AdapterError::Configuration(format!("invalid registry URL {:?}: {e}", config.base_url))
        })?;

        let secure = match base_url.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(AdapterError::Configuration(format!(
                    "unsupported registry URL scheme {other:?}, expected http or https"
                )))
            }
        };
        if base_url.cannot_be_a_base() {
            return Err(AdapterError::Configuration(format!(
                "registry URL {base_url} cannot be used as a base"
            )));
        }

        let tls = if secure {
            Some(config.tls.as_ref().ok_or_else(|| {
                AdapterError::Configuration(
                    "an https registry URL requires a CA certificate, certificate and key".into(),
                )
            })?)
        } else {
            if config.tls.is_some() {
                debug!(url = %base_url, "ignoring TLS material for plain HTTP registry");
            }
            None
        };

        let timeout = (config.wait * 2).max(MIN_REQUEST_TIMEOUT);
        let http = build_http_client(tls, timeout)?;

        info!(url = %base_url, secure, wait_secs = config.wait.as_secs(), "created registry client");

        Ok(Self {
            base_url,
            secure,
            acl_token: config.acl_token,
            wait: config.wait,
            passing_only: config.passing_only,
            timeout,
            http: ArcSwap::from_pointee(http),
            rotations: AtomicU64::new(0),
        })
    }

    /// Check if the client talks HTTPS.
    #[inline]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Replace the TLS material.
    ///
    /// Queries already in flight finish on the previous client; every query
    /// started afterwards uses the new material. On error the current client
    /// stays in place.
    pub fn rotate(&self, material: TlsMaterial) -> Result<()> {
        if !self.secure {
            return Err(AdapterError::Configuration(
                "cannot rotate TLS material of a plain HTTP registry client".into(),
            ));
        }
        let http = build_http_client(Some(&material), self.timeout)?;
        self.http.store(Arc::new(http));
        let rotations = self.rotations.fetch_add(1, Ordering::Relaxed) + 1;
        info!(url = %self.base_url, rotations, "rotated registry TLS material");
        Ok(())
    }

    /// Apply TLS material delivered on `updates` until the channel closes or
    /// `shutdown` fires.
    ///
    /// A rotation that fails is logged and the current material kept.
    pub fn spawn_rotation_listener(
        self: &Arc<Self>,
        mut updates: mpsc::Receiver<TlsMaterial>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let material = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    material = updates.recv() => match material {
                        Some(material) => material,
                        None => break,
                    },
                };
                if let Err(err) = client.rotate(material) {
                    error!(error = %err, "TLS rotation failed, keeping current credentials");
                }
            }
            debug!("TLS rotation listener stopped");
        })
    }

    /// Number of successful TLS rotations.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Current HTTP client; a query keeps the one it loaded until it ends.
    pub(crate) fn http(&self) -> Arc<reqwest::Client> {
        self.http.load_full()
    }

    /// URL of an API path below the base URL, e.g. `["health", "service", name]`.
    pub(crate) fn api_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                AdapterError::Configuration(format!(
                    "registry URL {} cannot be used as a base",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    fn health_url(&self, service: &str) -> Result<Url> {
        self.api_url(&["health", "service", service])
    }

    /// Issue one blocking GET and decode its JSON body.
    ///
    /// `index` 0 asks for an immediate answer. The returned index is never
    /// lower than 1, so the next call always blocks.
    pub(crate) async fn blocking_get<T: DeserializeOwned>(
        &self,
        http: &reqwest::Client,
        mut url: Url,
        index: u64,
        subject: &str,
    ) -> Result<(T, u64)> {
        if index > 0 {
            url.query_pairs_mut()
                .append_pair("index", &index.to_string())
                .append_pair("wait", &format!("{}s", self.wait.as_secs()));
        }

        trace!(url = %url, index, "querying registry");

        let mut request = http.get(url);
        if let Some(token) = &self.acl_token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::transport(format!("request for {subject} failed"), e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::DiscoveryAuth {
                status: status.as_u16(),
                message: message.trim().to_string(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AdapterError::DiscoveryTransport {
                message: format!("registry returned {status} for {subject}: {}", message.trim()),
                source: None,
            });
        }

        let new_index = parse_index(response.headers().get(INDEX_HEADER))?;

        let body = response.bytes().await.map_err(|e| {
            AdapterError::transport(format!("reading response for {subject} failed"), e)
        })?;
        let value: T = serde_json::from_slice(&body)
            .map_err(|e| AdapterError::decode(format!("malformed response for {subject}: {e}")))?;

        // An index of 0 is treated as 1 so the next request blocks.
        let new_index = new_index.max(1);
        // A registry restart moves the index backwards.
        let new_index = if new_index < index {
            warn!(subject, sent = index, received = new_index, "registry index went backwards, resetting");
            1
        } else {
            new_index
        };

        Ok((value, new_index))
    }

    async fn query_datacenter(
        &self,
        http: &reqwest::Client,
        query: &DiscoveryQuery,
        datacenter: Option<&str>,
        index: u64,
    ) -> Result<(EndpointList, u64)> {
        let mut url = self.health_url(&query.service)?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(dc) = datacenter {
                pairs.append_pair("dc", dc);
            }
            if let Some(tag) = &query.tag {
                pairs.append_pair("tag", tag);
            }
            if self.passing_only {
                pairs.append_pair("passing", "true");
            }
        }

        let subject = format!("service {}", query.service);
        let (entries, new_index): (Vec<HealthEntry>, u64) =
            self.blocking_get(http, url, index, &subject).await?;

        Ok((
            entries.into_iter().map(HealthEntry::into_endpoint).collect(),
            new_index,
        ))
    }
}

fn parse_index(header: Option<&reqwest::header::HeaderValue>) -> Result<u64> {
    let value = header.ok_or_else(|| {
        AdapterError::decode(format!("registry response is missing the {INDEX_HEADER} header"))
    })?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| AdapterError::decode(format!("invalid {INDEX_HEADER} header {value:?}")))
}

#[async_trait]
impl ServiceRegistry for RegistryClient {
    async fn query(&self, query: &DiscoveryQuery, index: &BlockingIndex) -> Result<QueryResult> {
        let http = self.http();

        let datacenters: Vec<Option<&str>> = if query.datacenters.is_empty() {
            vec![None]
        } else {
            query.datacenters.iter().map(|dc| Some(dc.as_str())).collect()
        };

        let results = join_all(
            datacenters
                .iter()
                .map(|dc| self.query_datacenter(&http, query, *dc, index.get(*dc))),
        )
        .await;

        let mut next = BlockingIndex::default();
        let mut lists = Vec::with_capacity(results.len());
        for (dc, result) in datacenters.iter().zip(results) {
            let (endpoints, dc_index) = result?;
            next.set(*dc, dc_index);
            lists.push(endpoints);
        }

        let endpoints = EndpointList::merge(lists);
        debug!(
            query = %query,
            index = %next,
            endpoints = endpoints.len(),
            "registry query completed"
        );

        Ok(QueryResult {
            endpoints,
            index: next,
        })
    }
}
