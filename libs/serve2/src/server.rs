//! Protocol detection and dispatch.
//!
//! The server holds the handlers registered at startup. For each connection
//! it reads up to `max_read` bytes, asks the candidate handlers in
//! registration order whether they claim the connection, and hands the
//! connection (consumed bytes pushed back) to the first one that does. When
//! nothing matches the default handler runs, if there is one.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::conn::Connection;
use crate::error::{Error, Result};
use crate::handler::{Detection, Outcome, ProtocolHandler};

/// Default number of bytes buffered for detection.
pub const DEFAULT_MAX_READ: usize = 128;

/// Largest detection buffer a configuration may ask for. Each connection
/// allocates this much up front while it is being classified.
pub const MAX_READ_LIMIT: usize = 64 * 1024;

/// Maximum number of times one connection may be handed back for detection.
pub const MAX_REDETECT_DEPTH: usize = 8;

/// Handler shared by every connection task.
pub type SharedHandler = Arc<dyn ProtocolHandler>;

/// Result of detection on one connection.
#[derive(Clone)]
pub enum Selection {
    /// A registered handler claimed the connection.
    Matched(SharedHandler),
    /// Nothing claimed the connection; the default handler takes it.
    Fallback(SharedHandler),
    /// Nothing claimed the connection and there is no default.
    Unmatched,
}

/// Detection counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Connections claimed by a registered handler.
    pub matched: AtomicU64,
    /// Connections given to the default handler.
    pub defaulted: AtomicU64,
    /// Connections closed because nothing matched.
    pub unmatched: AtomicU64,
    /// Connections handed back for another round of detection.
    pub redetected: AtomicU64,
}

/// Dispatches connections to protocol handlers.
pub struct Server {
    handlers: Vec<SharedHandler>,
    default: Option<SharedHandler>,
    max_read: usize,
    stats: DispatchStats,
}

impl Server {
    pub fn new() -> Self {
        Self::with_max_read(DEFAULT_MAX_READ)
    }

    pub fn with_max_read(max_read: usize) -> Self {
        Self {
            handlers: Vec::new(),
            default: None,
            max_read,
            stats: DispatchStats::default(),
        }
    }

    /// Register a detecting handler. Earlier registrations are asked first.
    pub fn add_handler(&mut self, handler: SharedHandler) {
        self.handlers.push(handler);
    }

    /// Set the default handler, returning the one it replaces.
    pub fn set_default(&mut self, handler: SharedHandler) -> Option<SharedHandler> {
        self.default.replace(handler)
    }

    pub fn handlers(&self) -> &[SharedHandler] {
        &self.handlers
    }

    pub fn default_handler(&self) -> Option<&SharedHandler> {
        self.default.as_ref()
    }

    pub fn max_read(&self) -> usize {
        self.max_read
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Run detection on a connection.
    ///
    /// Every byte read is pushed back into the connection before returning,
    /// whatever the outcome.
    pub async fn detect(&self, conn: &mut Connection) -> io::Result<Selection> {
        let mut candidates: Vec<&SharedHandler> = self.handlers.iter().collect();
        let mut header = Vec::with_capacity(self.max_read);
        let mut buf = vec![0u8; self.max_read];

        loop {
            let mut i = 0;
            while i < candidates.len() {
                match candidates[i].check(&header, conn.hints()) {
                    Detection::Match => {
                        let handler = Arc::clone(candidates[i]);
                        conn.unread(&header);
                        return Ok(Selection::Matched(handler));
                    }
                    Detection::NeedMore(n) if n > header.len() => i += 1,
                    Detection::NeedMore(_) | Detection::Reject => {
                        candidates.remove(i);
                    }
                }
            }

            if candidates.is_empty() || header.len() >= self.max_read {
                break;
            }

            let n = match conn.read(&mut buf[..self.max_read - header.len()]).await {
                Ok(n) => n,
                Err(e) => {
                    conn.unread(&header);
                    return Err(e);
                }
            };
            if n == 0 {
                break;
            }
            header.extend_from_slice(&buf[..n]);
        }

        conn.unread(&header);
        Ok(match &self.default {
            Some(handler) => Selection::Fallback(Arc::clone(handler)),
            None => Selection::Unmatched,
        })
    }

    /// Detect and handle a connection until its handler is done with it.
    pub async fn serve_connection(&self, mut conn: Connection) -> Result<()> {
        for depth in 0..=MAX_REDETECT_DEPTH {
            let handler = match self.detect(&mut conn).await? {
                Selection::Matched(handler) => {
                    self.stats.matched.fetch_add(1, Ordering::Relaxed);
                    debug!(handler = %handler, depth = depth, "Protocol matched");
                    handler
                }
                Selection::Fallback(handler) => {
                    self.stats.defaulted.fetch_add(1, Ordering::Relaxed);
                    debug!(handler = %handler, depth = depth, "No protocol matched, using default");
                    handler
                }
                Selection::Unmatched => {
                    self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
                    debug!(depth = depth, "No protocol matched, closing");
                    return Ok(());
                }
            };

            match handler.handle(conn).await? {
                Outcome::Done => return Ok(()),
                Outcome::Redetect(next) => {
                    self.stats.redetected.fetch_add(1, Ordering::Relaxed);
                    conn = next;
                }
            }
        }

        warn!(max_depth = MAX_REDETECT_DEPTH, "Re-detection depth exceeded");
        Err(Error::RedetectDepth(MAX_REDETECT_DEPTH))
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{Hint, TlsHint};
    use crate::proto::{Discard, Echo};
    use async_trait::async_trait;
    use std::fmt;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::AsyncWriteExt;

    /// Claims on a fixed prefix and records what it was handed.
    struct Recorder {
        name: &'static str,
        magic: &'static [u8],
        seen: tokio::sync::Mutex<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(name: &'static str, magic: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                name,
                magic,
                seen: tokio::sync::Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ProtocolHandler for Recorder {
        fn check(&self, header: &[u8], _hints: &[Hint]) -> Detection {
            crate::handler::check_prefix(header, self.magic)
        }

        async fn handle(&self, mut conn: Connection) -> Result<Outcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let mut data = Vec::new();
            conn.read_to_end(&mut data).await?;
            *self.seen.lock().await = data;
            Ok(Outcome::Done)
        }
    }

    impl fmt::Display for Recorder {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name)
        }
    }

    /// Wraps the connection in a TLS hint and hands it back once.
    struct FakeTerminator;

    #[async_trait]
    impl ProtocolHandler for FakeTerminator {
        fn check(&self, header: &[u8], hints: &[Hint]) -> Detection {
            if crate::conn::last_tls_hint(hints).is_some() {
                return Detection::Reject;
            }
            crate::handler::check_prefix(header, b"TLS")
        }

        async fn handle(&self, mut conn: Connection) -> Result<Outcome> {
            let mut magic = [0u8; 3];
            conn.read_exact(&mut magic).await?;
            conn.push_hint(Hint::Tls(TlsHint::default()));
            Ok(Outcome::Redetect(conn))
        }
    }

    impl fmt::Display for FakeTerminator {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("FakeTerminator")
        }
    }

    fn connection(data: &'static [u8]) -> Connection {
        let (mut client, server) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            client.write_all(data).await.unwrap();
            client.shutdown().await.unwrap();
            // Keep the read side open until the server is done.
            let mut sink = Vec::new();
            let _ = client.read_to_end(&mut sink).await;
        });
        Connection::new(Box::new(server), Vec::new())
    }

    fn name(selection: &Selection) -> String {
        match selection {
            Selection::Matched(h) => format!("matched:{h}"),
            Selection::Fallback(h) => format!("default:{h}"),
            Selection::Unmatched => "unmatched".to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_registered_match_wins() {
        let mut server = Server::new();
        server.add_handler(Recorder::new("first", b"AB"));
        server.add_handler(Recorder::new("second", b"ABC"));

        let mut conn = connection(b"ABCDEF");
        let selection = server.detect(&mut conn).await.unwrap();
        assert_eq!(name(&selection), "matched:first");
    }

    #[tokio::test]
    async fn test_consumed_bytes_are_replayed() {
        let recorder = Recorder::new("ssh", b"SSH");
        let mut server = Server::new();
        server.add_handler(recorder.clone());

        server.serve_connection(connection(b"SSHfoo")).await.unwrap();

        assert_eq!(recorder.calls.load(Ordering::Relaxed), 1);
        assert_eq!(*recorder.seen.lock().await, b"SSHfoo");
    }

    #[tokio::test]
    async fn test_unmatched_without_default_closes() {
        let recorder = Recorder::new("ssh", b"SSH");
        let mut server = Server::new();
        server.add_handler(recorder.clone());

        server.serve_connection(connection(b"XYZ")).await.unwrap();

        assert_eq!(recorder.calls.load(Ordering::Relaxed), 0);
        assert_eq!(server.stats().unmatched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_default_receives_unmatched_bytes() {
        let fallback = Recorder::new("fallback", b"");
        let mut server = Server::new();
        server.add_handler(Recorder::new("ssh", b"SSH"));
        server.set_default(fallback.clone());

        server.serve_connection(connection(b"XYZ123")).await.unwrap();

        assert_eq!(*fallback.seen.lock().await, b"XYZ123");
        assert_eq!(server.stats().defaulted.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_last_default_wins() {
        let mut server = Server::new();
        assert!(server.set_default(Arc::new(Echo::new())).is_none());
        let replaced = server.set_default(Arc::new(Discard::new())).unwrap();
        assert_eq!(replaced.to_string(), "Echo");
        assert_eq!(server.default_handler().unwrap().to_string(), "Discard");
    }

    #[tokio::test]
    async fn test_max_read_bounds_detection() {
        let fallback = Recorder::new("fallback", b"");
        let mut server = Server::with_max_read(4);
        server.add_handler(Recorder::new("long", b"LONGMAGIC"));
        server.set_default(fallback.clone());

        let mut conn = connection(b"LONGMAGIC");
        let selection = server.detect(&mut conn).await.unwrap();
        assert_eq!(name(&selection), "default:fallback");
        assert_eq!(conn.replay_len(), 4);
    }

    #[tokio::test]
    async fn test_short_input_falls_through_at_eof() {
        let mut server = Server::new();
        server.add_handler(Recorder::new("ssh", b"SSH"));

        let mut conn = connection(b"SS");
        let selection = server.detect(&mut conn).await.unwrap();
        assert_eq!(name(&selection), "unmatched");
        assert_eq!(conn.replay_len(), 2);
    }

    #[tokio::test]
    async fn test_redetect_after_termination() {
        let inner = Recorder::new("inner", b"GET");
        let mut server = Server::new();
        server.add_handler(Arc::new(FakeTerminator));
        server.add_handler(inner.clone());

        server.serve_connection(connection(b"TLSGET /")).await.unwrap();

        assert_eq!(*inner.seen.lock().await, b"GET /");
        assert_eq!(server.stats().redetected.load(Ordering::Relaxed), 1);
        assert_eq!(server.stats().matched.load(Ordering::Relaxed), 2);
    }
}
