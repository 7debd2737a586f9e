//! Outbound connections to configured backends.
//!
//! Backends are trusted by configuration. Re-originated TLS connections
//! therefore skip certificate verification; the handshake only exists so the
//! backend sees the server name and protocol the original client asked for.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{Error, Result};

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Establishes TCP and TLS connections to backends.
#[derive(Debug, Clone)]
pub struct Dialer {
    connect_timeout: Duration,
    tls: Arc<ClientConfig>,
}

impl Dialer {
    /// Create a dialer with the default connect timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a dialer with a custom connect timeout.
    pub fn with_timeout(connect_timeout: Duration) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth();

        Ok(Self {
            connect_timeout,
            tls: Arc::new(tls),
        })
    }

    /// Connect timeout applied to every dial.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a plain TCP connection to `target` (host:port).
    pub async fn connect(&self, target: &str) -> Result<TcpStream> {
        debug!(target = %target, "Connecting to backend");

        match timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                Ok(stream)
            }
            Ok(Err(source)) => Err(Error::Dial {
                target: target.to_string(),
                source,
            }),
            Err(_) => Err(Error::DialTimeout {
                target: target.to_string(),
            }),
        }
    }

    /// Open a TLS connection to `target`, presenting `server_name` as SNI and
    /// offering `alpn` as the only application protocol.
    ///
    /// Without a server name no SNI is sent. Without a protocol no ALPN
    /// extension is sent.
    pub async fn connect_tls(
        &self,
        target: &str,
        server_name: Option<&str>,
        alpn: Option<&str>,
    ) -> Result<TlsStream<TcpStream>> {
        let mut config = (*self.tls).clone();
        config.alpn_protocols = alpn
            .map(|proto| vec![proto.as_bytes().to_vec()])
            .unwrap_or_default();

        let name = match server_name {
            Some(name) => name.to_string(),
            None => {
                config.enable_sni = false;
                target_host(target).to_string()
            }
        };
        let name = ServerName::try_from(name.clone()).map_err(|_| Error::InvalidServerName(name))?;

        let stream = self.connect(target).await?;
        let connector = TlsConnector::from(Arc::new(config));
        let tls = connector.connect(name, stream).await?;

        debug!(target = %target, "TLS connection to backend established");
        Ok(tls)
    }
}

/// Host part of a host:port target, without IPv6 brackets.
fn target_host(target: &str) -> &str {
    let host = match target.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => target,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Accepts any backend certificate. Signatures are still checked so the
/// handshake itself stays sound.
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_host() {
        assert_eq!(target_host("localhost:22"), "localhost");
        assert_eq!(target_host("[::1]:443"), "::1");
        assert_eq!(target_host("10.0.0.1:8443"), "10.0.0.1");
        assert_eq!(target_host("backend.internal"), "backend.internal");
    }

    #[tokio::test]
    async fn test_connect_refused_is_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = Dialer::with_timeout(Duration::from_secs(2)).unwrap();
        let err = dialer.connect(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, Error::Dial { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_connect_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = Dialer::new().unwrap();
        let stream = dialer.connect(&addr.to_string()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert_eq!(dialer.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }
}
