//! TLS termination.
//!
//! Claims connections that start with a TLS handshake record, completes the
//! server side of the handshake and hands the decrypted stream back for
//! detection. The negotiated parameters are recorded as a TLS hint.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::conn::{Connection, Hint, TlsHint};
use crate::error::Result;
use crate::handler::{Detection, Outcome, ProtocolHandler};

/// TLS record type for handshake messages.
const RECORD_TYPE_HANDSHAKE: u8 = 0x16;

/// Record-layer major version shared by SSL 3.0 and every TLS version.
const RECORD_VERSION_MAJOR: u8 = 0x03;

/// Highest record-layer minor version accepted.
const RECORD_VERSION_MINOR_MAX: u8 = 0x04;

/// Bytes needed to recognize a handshake record header.
const RECORD_PREFIX_LEN: usize = 3;

/// Terminates TLS and re-submits the plaintext for detection.
pub struct TlsTermination {
    acceptor: TlsAcceptor,
    protos: Vec<String>,
}

impl TlsTermination {
    /// Create a terminator from a prepared server configuration.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let protos = config
            .alpn_protocols
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect();
        Self {
            acceptor: TlsAcceptor::from(config),
            protos,
        }
    }

    /// Load certificate and key from PEM files and advertise `protos` via ALPN.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path, protos: &[String]) -> io::Result<Self> {
        let config = load_server_config(cert_path, key_path, protos)?;
        Ok(Self::new(config))
    }
}

#[async_trait]
impl ProtocolHandler for TlsTermination {
    fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
        check_handshake_record(header)
    }

    async fn handle(&self, conn: Connection) -> Result<Outcome> {
        let mut hints = conn.hints().to_vec();
        let stream = self.acceptor.accept(conn).await?;

        let (_, session) = stream.get_ref();
        let negotiated_protocol = session
            .alpn_protocol()
            .map(|p| String::from_utf8_lossy(p).into_owned());
        let hint = TlsHint {
            server_name: session.server_name().map(str::to_string),
            negotiated_protocol_is_mutual: negotiated_protocol.is_some(),
            negotiated_protocol,
        };

        debug!(
            server_name = ?hint.server_name,
            negotiated_protocol = ?hint.negotiated_protocol,
            "TLS handshake complete"
        );

        hints.push(Hint::Tls(hint));
        Ok(Outcome::Redetect(Connection::new(Box::new(stream), hints)))
    }
}

impl fmt::Display for TlsTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TLS [protos: {:?}]", self.protos)
    }
}

/// Recognize the start of a TLS handshake record.
fn check_handshake_record(header: &[u8]) -> Detection {
    if let Some(&record_type) = header.first() {
        if record_type != RECORD_TYPE_HANDSHAKE {
            return Detection::Reject;
        }
    }
    if let Some(&major) = header.get(1) {
        if major != RECORD_VERSION_MAJOR {
            return Detection::Reject;
        }
    }
    match header.get(2) {
        Some(&minor) if minor <= RECORD_VERSION_MINOR_MAX => Detection::Match,
        Some(_) => Detection::Reject,
        None => Detection::NeedMore(RECORD_PREFIX_LEN),
    }
}

/// Build a server configuration from PEM certificate and key files.
pub fn load_server_config(
    cert_path: &Path,
    key_path: &Path,
    protos: &[String],
) -> io::Result<Arc<ServerConfig>> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    server_config(certs, key, protos)
}

/// Read every certificate in a PEM file. An empty chain is an error.
pub fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;

    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "No certificates found in cert file",
        ));
    }
    Ok(certs)
}

/// Read the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "No private key found"))
}

/// Server configuration for a certificate chain and its key, advertising
/// `protos` via ALPN.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    protos: &[String],
) -> io::Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    config.alpn_protocols = protos.iter().map(|p| p.as_bytes().to_vec()).collect();

    Ok(Arc::new(config))
}
