//! Protocol handlers.
//!
//! - [`Proxy`] / [`MultiProxy`]: magic-byte match, relay to a target
//! - [`TlsTermination`]: TLS handshake, then re-detection of the plaintext
//! - [`TlsMatcher`]: route TLS-terminated connections by SNI/ALPN
//! - [`HttpFile`]: static files over HTTP/1.1
//! - [`Echo`] / [`Discard`]: trivial emulations

mod echo;
mod http;
mod proxy;
mod tls;
mod tls_matcher;

pub use echo::{Discard, Echo};
pub use http::{HttpFile, DEFAULT_FILE, DEFAULT_NOT_FOUND};
pub use proxy::{dial_and_proxy, MultiProxy, Proxy};
pub use tls::{load_certs, load_private_key, load_server_config, server_config, TlsTermination};
pub use tls_matcher::{DialStrategy, TlsMatcher};
