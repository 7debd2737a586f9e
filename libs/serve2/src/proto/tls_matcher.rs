//! Routing of TLS-terminated connections by handshake metadata.
//!
//! A matcher never looks at payload bytes. It reads the most recent TLS hint
//! of a connection and evaluates the checks that were configured. Checks
//! that were not configured do not exist, so a matcher without checks claims
//! every TLS-terminated connection.
//!
//! Comparisons are exact and case-sensitive. A missing server name or
//! protocol compares as the empty string.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::conn::{last_tls_hint, Connection, Hint, TlsHint};
use crate::dial::Dialer;
use crate::error::Result;
use crate::handler::{Detection, Outcome, ProtocolHandler};
use crate::proto::proxy::dial_and_proxy;
use crate::relay::proxy_bidirectional;

/// How a matched connection reaches its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStrategy {
    /// Relay the decrypted bytes to a plaintext backend.
    Passthrough,
    /// Open a new TLS connection to the backend carrying the inbound server
    /// name and negotiated protocol. The backend certificate is not verified.
    ReoriginateTls,
}

impl DialStrategy {
    pub fn from_dial_tls(dial_tls: bool) -> Self {
        if dial_tls {
            DialStrategy::ReoriginateTls
        } else {
            DialStrategy::Passthrough
        }
    }
}

type Predicate = Box<dyn Fn(&TlsHint) -> bool + Send + Sync>;

/// One configured check.
struct TlsCheck {
    name: &'static str,
    predicate: Predicate,
}

/// Matches TLS-terminated connections and forwards them to a target.
pub struct TlsMatcher {
    target: String,
    strategy: DialStrategy,
    checks: Vec<TlsCheck>,
    dialer: Arc<Dialer>,
}

impl TlsMatcher {
    /// Create a matcher with no checks.
    pub fn new(target: impl Into<String>, strategy: DialStrategy, dialer: Arc<Dialer>) -> Self {
        Self {
            target: target.into(),
            strategy,
            checks: Vec::new(),
            dialer,
        }
    }

    /// Require the server name to be one of `names`.
    pub fn with_server_names(mut self, names: Vec<String>) -> Self {
        self.checks.push(TlsCheck {
            name: "serverName",
            predicate: Box::new(move |hint| {
                let name = hint.server_name.as_deref().unwrap_or("");
                names.iter().any(|n| n == name)
            }),
        });
        self
    }

    /// Require the negotiated protocol to be one of `protocols`.
    pub fn with_negotiated_protocols(mut self, protocols: Vec<String>) -> Self {
        self.checks.push(TlsCheck {
            name: "negotiatedProtocol",
            predicate: Box::new(move |hint| {
                let proto = hint.negotiated_protocol.as_deref().unwrap_or("");
                protocols.iter().any(|p| p == proto)
            }),
        });
        self
    }

    /// Require mutual protocol negotiation to equal `expected`.
    pub fn with_negotiated_protocol_is_mutual(mut self, expected: bool) -> Self {
        self.checks.push(TlsCheck {
            name: "negotiatedProtocolIsMutual",
            predicate: Box::new(move |hint| hint.negotiated_protocol_is_mutual == expected),
        });
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn strategy(&self) -> DialStrategy {
        self.strategy
    }

    /// Names of the configured checks, in evaluation order.
    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name).collect()
    }

    /// Evaluate every configured check against a TLS hint.
    pub fn matches(&self, hint: &TlsHint) -> bool {
        self.checks.iter().all(|check| (check.predicate)(hint))
    }
}

#[async_trait]
impl ProtocolHandler for TlsMatcher {
    fn check(&self, _header: &[u8], hints: &[Hint]) -> Detection {
        match last_tls_hint(hints) {
            Some(hint) if self.matches(hint) => Detection::Match,
            _ => Detection::Reject,
        }
    }

    async fn handle(&self, conn: Connection) -> Result<Outcome> {
        match self.strategy {
            DialStrategy::Passthrough => {
                dial_and_proxy(conn, &self.dialer, &self.target).await?;
            }
            DialStrategy::ReoriginateTls => {
                let hint = conn.tls_hint().cloned().unwrap_or_default();
                let backend = self
                    .dialer
                    .connect_tls(
                        &self.target,
                        hint.server_name.as_deref(),
                        hint.negotiated_protocol.as_deref(),
                    )
                    .await?;
                let (to_backend, from_backend) = proxy_bidirectional(conn, backend).await?;

                debug!(
                    target = %self.target,
                    bytes_to_backend = to_backend,
                    bytes_from_backend = from_backend,
                    "TLS re-originated connection closed"
                );
            }
        }
        Ok(Outcome::Done)
    }
}

impl fmt::Display for TlsMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TLSMatcher [dest: {}]", self.target)
    }
}
