use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Build a rustls client config trusting the platform's native root store.
/// Shared across connection attempts; rustls' `ClientConfig` is cheap to
/// clone once built (it's an `Arc` internally for the hot parts).
pub fn build_client_config() -> Result<Arc<ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::warn!(%err, "error loading a native root certificate");
    }
    for cert in native.certs {
        roots.add(cert).context("adding native root certificate")?;
    }

    let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
    Ok(Arc::new(config))
}

/// Open a TCP+TLS connection to `host:port`.
pub async fn connect(
    config: Arc<ClientConfig>,
    host: &str,
    port: u16,
) -> Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((host, port)).await.context("tcp connect")?;
    tcp.set_nodelay(true).ok();
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(host.to_string()).context("invalid server name")?;
    let tls = connector.connect(server_name, tcp).await.context("tls handshake")?;
    Ok(tls)
}
