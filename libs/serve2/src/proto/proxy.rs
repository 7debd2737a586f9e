//! Magic-byte proxies.
//!
//! A proxy claims a connection when the first bytes equal a configured magic
//! sequence, then relays the whole connection (magic included) to a fixed
//! target.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::conn::{Connection, Hint};
use crate::dial::Dialer;
use crate::error::Result;
use crate::handler::{check_any_prefix, check_prefix, Detection, Outcome, ProtocolHandler};
use crate::relay::proxy_bidirectional;

/// Proxy matching a single magic sequence.
pub struct Proxy {
    magic: Vec<u8>,
    target: String,
    dialer: Arc<Dialer>,
}

impl Proxy {
    pub fn new(magic: impl Into<Vec<u8>>, target: impl Into<String>, dialer: Arc<Dialer>) -> Self {
        Self {
            magic: magic.into(),
            target: target.into(),
            dialer,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl ProtocolHandler for Proxy {
    fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
        check_prefix(header, &self.magic)
    }

    async fn handle(&self, conn: Connection) -> Result<Outcome> {
        dial_and_proxy(conn, &self.dialer, &self.target).await?;
        Ok(Outcome::Done)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proxy [magic: {:?}, dest: {}]",
            String::from_utf8_lossy(&self.magic),
            self.target
        )
    }
}

/// Proxy matching any one of several magic sequences.
///
/// Patterns are tried in declaration order, so when one pattern is a prefix
/// of another the earlier one decides.
pub struct MultiProxy {
    magics: Vec<Vec<u8>>,
    target: String,
    dialer: Arc<Dialer>,
}

impl MultiProxy {
    pub fn new(magics: Vec<Vec<u8>>, target: impl Into<String>, dialer: Arc<Dialer>) -> Self {
        Self {
            magics,
            target: target.into(),
            dialer,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Index of the pattern that matches `header`, if one already does.
    ///
    /// A pattern still waiting for bytes ahead of a matching one does not
    /// block it: the first fully matching pattern in declaration order wins.
    pub fn matching_pattern(&self, header: &[u8]) -> Option<usize> {
        self.magics
            .iter()
            .position(|magic| check_prefix(header, magic) == Detection::Match)
    }
}

#[async_trait]
impl ProtocolHandler for MultiProxy {
    fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
        check_any_prefix(header, self.magics.iter().map(Vec::as_slice))
    }

    async fn handle(&self, conn: Connection) -> Result<Outcome> {
        dial_and_proxy(conn, &self.dialer, &self.target).await?;
        Ok(Outcome::Done)
    }
}

impl fmt::Display for MultiProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magics: Vec<_> = self
            .magics
            .iter()
            .map(|m| String::from_utf8_lossy(m).into_owned())
            .collect();
        write!(f, "MultiProxy [magics: {:?}, dest: {}]", magics, self.target)
    }
}

/// Dial `target` and relay the connection to it verbatim.
///
/// Bytes consumed during detection are replayed by the connection, so they
/// are the first bytes the backend receives.
pub async fn dial_and_proxy(conn: Connection, dialer: &Dialer, target: &str) -> Result<()> {
    let backend = dialer.connect(target).await?;
    let (to_backend, from_backend) = proxy_bidirectional(conn, backend).await?;

    debug!(
        target = %target,
        bytes_to_backend = to_backend,
        bytes_from_backend = from_backend,
        "Proxy connection closed"
    );
    Ok(())
}
