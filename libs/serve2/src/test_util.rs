//! Certificate fixtures shared by unit tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::ClientConfig;

/// Generate a self-signed certificate for `name` and write it as PEM.
///
/// Returns (cert_path, key_path, cert_der).
pub(crate) fn write_self_signed(dir: &Path, name: &str) -> (PathBuf, PathBuf, Vec<u8>) {
    let certified = rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();

    let cert_path = dir.join(format!("{name}.crt"));
    let key_path = dir.join(format!("{name}.key"));
    fs::write(&cert_path, certified.cert.pem()).unwrap();
    fs::write(&key_path, certified.key_pair.serialize_pem()).unwrap();

    (cert_path, key_path, certified.cert.der().to_vec())
}

/// Client configuration trusting exactly `cert_der`, offering `alpn`.
pub(crate) fn tls_client_config(cert_der: &[u8], alpn: &[&str]) -> Arc<ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.add(CertificateDer::from(cert_der.to_vec())).unwrap();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();

    Arc::new(config)
}
