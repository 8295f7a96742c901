//! TLS credentials for talking to the registry over HTTPS.
//!
//! The registry authenticates the adapter with a client certificate. The
//! material is loaded once at startup and may later be replaced through
//! [`RegistryClient::rotate`](crate::RegistryClient::rotate).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use apigw_core::{AdapterError, Result};

/// PEM-encoded client certificate, private key and CA bundle.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    ca_cert: Vec<u8>,
    cert: Vec<u8>,
    key: Vec<u8>,
}

impl TlsMaterial {
    /// Create material from PEM bytes.
    pub fn from_pem(
        ca_cert: impl Into<Vec<u8>>,
        cert: impl Into<Vec<u8>>,
        key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// Read material from PEM files.
    ///
    /// Fails with [`AdapterError::CredentialLoad`] naming the first file that
    /// cannot be read.
    pub fn from_files(
        ca_cert: impl AsRef<Path>,
        cert: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> Result<Self> {
        Ok(Self {
            ca_cert: read_pem(ca_cert.as_ref())?,
            cert: read_pem(cert.as_ref())?,
            key: read_pem(key.as_ref())?,
        })
    }

    /// CA bundle used to verify the registry.
    pub fn ca_cert(&self) -> &[u8] {
        &self.ca_cert
    }

    /// Client certificate chain.
    pub fn cert(&self) -> &[u8] {
        &self.cert
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_cert", &format_args!("{} bytes", self.ca_cert.len()))
            .field("cert", &format_args!("{} bytes", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path)
        .map_err(|e| AdapterError::credential(path.display().to_string(), e.to_string()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AdapterError::credential(
            path.display().to_string(),
            "file is empty",
        ));
    }
    Ok(bytes)
}

/// Build the HTTP client used for registry queries.
///
/// With `tls` set, the client presents the certificate and trusts only the
/// given CA bundle.
pub(crate) fn build_http_client(
    tls: Option<&TlsMaterial>,
    timeout: Duration,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10));

    if let Some(tls) = tls {
        let ca = reqwest::Certificate::from_pem(&tls.ca_cert)
            .map_err(|e| AdapterError::credential("ca certificate", e.to_string()))?;

        let mut identity_pem = tls.cert.clone();
        if !identity_pem.ends_with(b"\n") {
            identity_pem.push(b'\n');
        }
        identity_pem.extend_from_slice(&tls.key);
        let identity = reqwest::Identity::from_pem(&identity_pem)
            .map_err(|e| AdapterError::credential("client certificate and key", e.to_string()))?;

        builder = builder
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(ca)
            .identity(identity);
    }

    builder
        .build()
        .map_err(|e| AdapterError::internal("failed to build registry HTTP client", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "apigw-tls-{}-{}-{name}",
            std::process::id(),
            name.len()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents).unwrap();
        path
    }

    #[test]
    fn missing_file_is_credential_error() {
        let ca = temp_file("ca.pem", b"-----BEGIN CERTIFICATE-----\n");
        let err = TlsMaterial::from_files(&ca, "/nonexistent/cert.pem", "/nonexistent/key.pem")
            .unwrap_err();
        match err {
            AdapterError::CredentialLoad { path, .. } => assert_eq!(path, "/nonexistent/cert.pem"),
            other => panic!("unexpected error: {other:?}"),
        }
        std::fs::remove_file(ca).ok();
    }

    #[test]
    fn empty_file_is_credential_error() {
        let empty = temp_file("empty.pem", b"  \n");
        let err = TlsMaterial::from_files(&empty, &empty, &empty).unwrap_err();
        assert!(matches!(err, AdapterError::CredentialLoad { .. }));
        std::fs::remove_file(empty).ok();
    }

    #[test]
    fn malformed_pem_is_rejected_when_building_client() {
        let material = TlsMaterial::from_pem("not a cert", "not a cert", "not a key");
        let err = build_http_client(Some(&material), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, AdapterError::CredentialLoad { .. }));
    }

    #[test]
    fn debug_redacts_key() {
        let material = TlsMaterial::from_pem("ca", "cert", "secret-key");
        let debug = format!("{material:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn plain_client_builds() {
        assert!(build_http_client(None, Duration::from_secs(1)).is_ok());
    }
}
