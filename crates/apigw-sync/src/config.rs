//! Adapter configuration, read from TOML.
//!
//! ```toml
//! [listener]
//! address = "0.0.0.0"
//! port = 9090
//! route_config_name = "default"
//!
//! [discovery]
//! enabled = true
//! url = "https://consul.internal:8501"
//! acl_token_file = "/etc/apigw/consul.token"
//! ca_cert_file = "/etc/apigw/ca.pem"
//! cert_file = "/etc/apigw/client.pem"
//! key_file = "/etc/apigw/client-key.pem"
//! mesh_service = "apigw-router"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use apigw_core::{AdapterError, Result};
use apigw_discovery::{RegistryClientConfig, TlsMaterial, WatchSettings};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::indexer::ListenerSettings;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterConfig {
    /// Listener shared by every label.
    pub listener: ListenerConfig,
    /// Service-registry integration.
    pub discovery: DiscoveryConfig,
}

/// `[listener]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    /// Bind address.
    pub address: String,
    /// Bind port.
    pub port: u16,
    /// Route configuration served on the listener.
    pub route_config_name: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        let defaults = ListenerSettings::default();
        Self {
            address: defaults.address,
            port: defaults.port,
            route_config_name: defaults.route_config_name,
        }
    }
}

/// `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Whether discovery-bound clusters are watched at all.
    pub enabled: bool,
    /// Registry base URL; `https` requires the three TLS files.
    pub url: Option<String>,
    /// Backoff after a failed query, in seconds.
    pub poll_interval_secs: u64,
    /// Long-poll wait, in seconds.
    pub wait_secs: u64,
    /// Backoff after the registry rejected the credentials, in seconds.
    pub auth_retry_secs: u64,
    /// Minimum delay between two answered queries of one watch, in milliseconds.
    pub min_poll_interval_ms: u64,
    /// Inline ACL token.
    pub acl_token: Option<String>,
    /// File holding the ACL token; read at startup, surrounding whitespace trimmed.
    pub acl_token_file: Option<PathBuf>,
    /// CA bundle used to verify the registry.
    pub ca_cert_file: Option<PathBuf>,
    /// Client certificate.
    pub cert_file: Option<PathBuf>,
    /// Client private key.
    pub key_file: Option<PathBuf>,
    /// Only return instances passing their health checks.
    pub health_checks_passing: bool,
    /// Service name registered in the mesh; when set over `https`, the
    /// client credentials follow the registry's Connect CA for this service.
    pub mesh_service: Option<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            poll_interval_secs: 5,
            wait_secs: 60,
            auth_retry_secs: 60,
            min_poll_interval_ms: 100,
            acl_token: None,
            acl_token_file: None,
            ca_cert_file: None,
            cert_file: None,
            key_file: None,
            health_checks_passing: true,
            mesh_service: None,
        }
    }
}

impl AdapterConfig {
    /// Read and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AdapterError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a configuration document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AdapterConfig =
            toml::from_str(content).map_err(|e| AdapterError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.discovery.validate()
    }

    /// Listener values for snapshot building.
    pub fn listener_settings(&self) -> ListenerSettings {
        ListenerSettings {
            address: self.listener.address.clone(),
            port: self.listener.port,
            route_config_name: self.listener.route_config_name.clone(),
        }
    }
}

impl DiscoveryConfig {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let Some(raw) = self.url.as_deref() else {
            return Err(AdapterError::Configuration(
                "discovery is enabled but no url is set".to_string(),
            ));
        };
        let url = Url::parse(raw)
            .map_err(|e| AdapterError::Configuration(format!("invalid discovery url {raw:?}: {e}")))?;
        if self.wait_secs == 0 {
            return Err(AdapterError::Configuration(
                "wait_secs must be at least 1".to_string(),
            ));
        }
        match url.scheme() {
            "http" => {
                if self.mesh_service.is_some() {
                    return Err(AdapterError::Configuration(
                        "mesh_service requires an https discovery url".to_string(),
                    ));
                }
            }
            "https" => {
                if self.ca_cert_file.is_none() || self.cert_file.is_none() || self.key_file.is_none() {
                    return Err(AdapterError::Configuration(
                        "https discovery requires ca_cert_file, cert_file and key_file".to_string(),
                    ));
                }
            }
            other => {
                return Err(AdapterError::Configuration(format!(
                    "unsupported discovery url scheme {other:?}"
                )))
            }
        }
        if self.mesh_service.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(AdapterError::Configuration(
                "mesh_service must not be empty".to_string(),
            ));
        }
        if self.acl_token.is_some() && self.acl_token_file.is_some() {
            return Err(AdapterError::Configuration(
                "acl_token and acl_token_file are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the registry client configuration, loading credential files.
    ///
    /// Returns `Ok(None)` when discovery is disabled. Unreadable credential
    /// files yield [`AdapterError::CredentialLoad`].
    pub fn registry_client_config(&self) -> Result<Option<RegistryClientConfig>> {
        if !self.enabled {
            return Ok(None);
        }
        self.validate()?;
        let Some(url) = self.url.as_deref() else {
            return Ok(None);
        };

        let mut config = RegistryClientConfig::new(url)
            .wait(Duration::from_secs(self.wait_secs))
            .passing_only(self.health_checks_passing);

        if let Some(token) = &self.acl_token {
            config = config.acl_token(token.as_str());
        } else if let Some(path) = &self.acl_token_file {
            let token = std::fs::read_to_string(path)
                .map_err(|e| AdapterError::credential(path.display().to_string(), e.to_string()))?;
            config = config.acl_token(token);
        }

        if let Some(material) = self.tls_material()? {
            config = config.tls(material);
        }
        Ok(Some(config))
    }

    /// Read the configured TLS files, `None` when they are not all set.
    pub fn tls_material(&self) -> Result<Option<TlsMaterial>> {
        match (&self.ca_cert_file, &self.cert_file, &self.key_file) {
            (Some(ca), Some(cert), Some(key)) => TlsMaterial::from_files(ca, cert, key).map(Some),
            _ => Ok(None),
        }
    }

    /// Timing of the watch loops.
    pub fn watch_settings(&self) -> WatchSettings {
        WatchSettings {
            retry_interval: Duration::from_secs(self.poll_interval_secs),
            auth_retry_interval: Duration::from_secs(self.auth_retry_secs),
            min_poll_interval: Duration::from_millis(self.min_poll_interval_ms),
        }
    }

    /// Service whose mesh credentials are watched, if any.
    pub fn mesh_service(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.mesh_service.as_deref().map(str::trim)
    }
}
