//! Service-mesh credentials delivered by the registry.
//!
//! With Consul Connect the registry acts as certificate authority. The adapter
//! long-polls two agent endpoints:
//!
//! ```text
//! GET {base}/v1/agent/connect/ca/roots            -> trusted root certificates
//! GET {base}/v1/agent/connect/ca/leaf/{service}   -> certificate and key of `service`
//! ```
//!
//! Both use the same blocking index as health queries. Whenever either answer
//! changes and both are known, the combined [`TlsMaterial`] is sent on the
//! rotation channel consumed by
//! [`RegistryClient::spawn_rotation_listener`](crate::RegistryClient::spawn_rotation_listener).

use std::sync::Arc;

use apigw_core::{AdapterError, Result};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::coordinator::pause;
use crate::{RegistryClient, TlsMaterial, WatchSettings};

/// `GET /v1/agent/connect/ca/roots` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CaRoots {
    #[serde(default, rename = "ActiveRootID")]
    active_root_id: String,
    #[serde(default)]
    roots: Vec<CaRoot>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CaRoot {
    #[serde(default, rename = "ID")]
    id: String,
    root_cert: String,
}

/// `GET /v1/agent/connect/ca/leaf/{service}` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LeafCert {
    #[serde(rename = "CertPEM")]
    cert_pem: String,
    #[serde(rename = "PrivateKeyPEM")]
    private_key_pem: String,
}

impl CaRoots {
    /// Every root, active one first. Rotating CAs publish old and new roots
    /// side by side, and both must stay trusted.
    fn bundle(mut self) -> Result<String> {
        if self.roots.is_empty() {
            return Err(AdapterError::decode("connect CA has no root certificates"));
        }
        let active = std::mem::take(&mut self.active_root_id);
        self.roots.sort_by_key(|root| root.id != active);

        let mut bundle = String::new();
        for root in self.roots {
            bundle.push_str(root.root_cert.trim_end());
            bundle.push('\n');
        }
        Ok(bundle)
    }
}

impl RegistryClient {
    async fn connect_roots(&self, index: u64) -> Result<(String, u64)> {
        let url = self.api_url(&["agent", "connect", "ca", "roots"])?;
        let (roots, index): (CaRoots, u64) = self
            .blocking_get(&self.http(), url, index, "connect CA roots")
            .await?;
        Ok((roots.bundle()?, index))
    }

    async fn connect_leaf(&self, service: &str, index: u64) -> Result<(LeafCert, u64)> {
        let url = self.api_url(&["agent", "connect", "ca", "leaf", service])?;
        let subject = format!("leaf certificate of {service}");
        self.blocking_get(&self.http(), url, index, &subject).await
    }
}

/// One half of the mesh credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MeshPart {
    Roots(String),
    Leaf { cert: String, key: String },
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Roots,
    Leaf,
}

/// Long-polls the registry's Connect CA for the adapter's mesh credentials.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use apigw_discovery::{
///     MeshCredentialWatcher, RegistryClient, RegistryClientConfig, TlsMaterial, WatchSettings,
/// };
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(tls: TlsMaterial) -> apigw_core::Result<()> {
/// let client = Arc::new(RegistryClient::new(
///     RegistryClientConfig::new("https://127.0.0.1:8501").tls(tls),
/// )?);
/// let token = CancellationToken::new();
/// let (tx, rx) = mpsc::channel(4);
///
/// let listener = client.spawn_rotation_listener(rx, token.clone());
/// let watcher = MeshCredentialWatcher::new(Arc::clone(&client), "apigw-router", WatchSettings::default())
///     .spawn(tx, token.clone());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MeshCredentialWatcher {
    client: Arc<RegistryClient>,
    service: String,
    settings: WatchSettings,
}

impl MeshCredentialWatcher {
    /// Watch the credentials of `service`, the adapter's registered name.
    pub fn new(client: Arc<RegistryClient>, service: impl Into<String>, settings: WatchSettings) -> Self {
        Self {
            client,
            service: service.into(),
            settings,
        }
    }

    /// Start polling. The task sends combined material on `updates` and stops
    /// when `shutdown` fires or the receiver is dropped.
    pub fn spawn(self, updates: mpsc::Sender<TlsMaterial>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(service = %self.service, "watching mesh credentials");
            let (parts_tx, parts_rx) = mpsc::channel(4);
            // Cancelled by the combiner too, so pollers blocked in a long-poll
            // stop once nobody consumes their results.
            let token = shutdown.child_token();
            tokio::join!(
                self.poll(Source::Roots, parts_tx.clone(), token.clone()),
                self.poll(Source::Leaf, parts_tx, token.clone()),
                async {
                    combine(parts_rx, updates, token.clone()).await;
                    token.cancel();
                },
            );
            debug!(service = %self.service, "mesh credential watcher stopped");
        })
    }

    async fn fetch(&self, source: Source, index: u64) -> Result<(MeshPart, u64)> {
        match source {
            Source::Roots => {
                let (bundle, index) = self.client.connect_roots(index).await?;
                Ok((MeshPart::Roots(bundle), index))
            }
            Source::Leaf => {
                let (leaf, index) = self.client.connect_leaf(&self.service, index).await?;
                let part = MeshPart::Leaf {
                    cert: leaf.cert_pem,
                    key: leaf.private_key_pem,
                };
                Ok((part, index))
            }
        }
    }

    async fn poll(&self, source: Source, parts: mpsc::Sender<MeshPart>, token: CancellationToken) {
        let mut index = 0;
        let mut last: Option<MeshPart> = None;

        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.fetch(source, index) => result,
            };

            let delay = match result {
                Ok((part, next)) => {
                    index = next;
                    if last.as_ref() == Some(&part) {
                        trace!(?source, index, "mesh credentials unchanged");
                    } else {
                        debug!(?source, index, "mesh credentials changed");
                        last = Some(part.clone());
                        if parts.send(part).await.is_err() {
                            break;
                        }
                    }
                    self.settings.min_poll_interval
                }
                Err(err) if err.is_retriable() => {
                    warn!(?source, error = %err, "mesh credential query failed, retrying");
                    self.settings.retry_interval
                }
                Err(err) => {
                    error!(?source, error = %err, "registry refused mesh credential query");
                    self.settings.auth_retry_interval
                }
            };

            if !pause(&token, delay).await {
                break;
            }
        }
    }
}

/// Pair the latest roots with the latest leaf and forward each combination.
async fn combine(
    mut parts: mpsc::Receiver<MeshPart>,
    updates: mpsc::Sender<TlsMaterial>,
    token: CancellationToken,
) {
    let mut roots: Option<String> = None;
    let mut leaf: Option<(String, String)> = None;

    loop {
        let part = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            part = parts.recv() => match part {
                Some(part) => part,
                None => break,
            },
        };
        match part {
            MeshPart::Roots(bundle) => roots = Some(bundle),
            MeshPart::Leaf { cert, key } => leaf = Some((cert, key)),
        }

        let (Some(bundle), Some((cert, key))) = (&roots, &leaf) else {
            continue;
        };
        let material = TlsMaterial::from_pem(bundle.as_str(), cert.as_str(), key.as_str());
        let sent = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = updates.send(material) => sent,
        };
        if sent.is_err() {
            break;
        }
        info!("mesh credentials updated");
    }
}
