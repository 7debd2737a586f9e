//! Echo and discard emulations.

use std::fmt;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::conn::{Connection, Hint};
use crate::error::Result;
use crate::handler::{check_prefix, Detection, Outcome, ProtocolHandler};

const ECHO_MAGIC: &[u8] = b"ECHO";
const DISCARD_MAGIC: &[u8] = b"DISCARD";

/// Writes back everything it reads, greeting included.
#[derive(Debug, Default)]
pub struct Echo;

impl Echo {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolHandler for Echo {
    fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
        check_prefix(header, ECHO_MAGIC)
    }

    async fn handle(&self, conn: Connection) -> Result<Outcome> {
        let (mut reader, mut writer) = tokio::io::split(conn);
        let n = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.shutdown().await?;
        debug!(bytes = n, "Echo connection closed");
        Ok(Outcome::Done)
    }
}

impl fmt::Display for Echo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Echo")
    }
}

/// Reads and drops everything.
#[derive(Debug, Default)]
pub struct Discard;

impl Discard {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolHandler for Discard {
    fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
        check_prefix(header, DISCARD_MAGIC)
    }

    async fn handle(&self, mut conn: Connection) -> Result<Outcome> {
        let n = tokio::io::copy(&mut conn, &mut tokio::io::sink()).await?;
        debug!(bytes = n, "Discard connection closed");
        Ok(Outcome::Done)
    }
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Discard")
    }
}
