//! TLS/SSL infrastructure.

use crate::error::ProbeError;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Trait for TLS configuration providers.
///
/// The prober asks its provider for a connector on every HTTPS probe. Swapping
/// the provider changes which roots are trusted without touching the
/// handshake timing.
pub trait TlsProvider: Send + Sync {
    /// Returns the client configuration used for handshakes.
    fn client_config(&self) -> Arc<rustls::ClientConfig>;

    /// Creates a TLS connector from this provider's configuration.
    fn connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config())
    }
}

/// Default TLS provider using rustls with Mozilla's root certificates.
#[derive(Clone)]
pub struct RustlsTlsProvider {
    config: Arc<rustls::ClientConfig>,
}

impl RustlsTlsProvider {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            config: create_tls_config()?,
        })
    }
}

impl TlsProvider for RustlsTlsProvider {
    fn client_config(&self) -> Arc<rustls::ClientConfig> {
        self.config.clone()
    }
}

/// Creates a TLS client configuration with Mozilla's root certificates.
///
/// The ring provider is passed explicitly so no process-wide default
/// provider has to be installed. TLS 1.2 and 1.3 are enabled.
pub fn create_tls_config() -> Result<Arc<rustls::ClientConfig>, ProbeError> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(Arc::new(config))
}

/// Runs the TLS handshake over an established TCP stream.
///
/// # Arguments
///
/// * `provider` - The TLS provider to use for configuration
/// * `tcp_stream` - The established TCP connection
/// * `server_name` - The host used for SNI and certificate verification
///
/// # Returns
///
/// The TLS stream, or `ProbeError::Tls` if the name is invalid or the
/// handshake fails.
pub async fn connect_tls<P: TlsProvider>(
    provider: &P,
    tcp_stream: TcpStream,
    server_name: &str,
) -> Result<TlsStream<TcpStream>, ProbeError> {
    let server_name = ServerName::try_from(server_name.to_string())
        .map_err(|e| ProbeError::Tls(format!("invalid server name: {}", e)))?;

    provider
        .connector()
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| ProbeError::Tls(e.to_string()))
}
