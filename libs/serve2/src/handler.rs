//! The handler interface the dispatcher drives.

use std::fmt;

use async_trait::async_trait;

use crate::conn::{Connection, Hint};
use crate::error::Result;

/// Verdict of a handler looking at the bytes buffered so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The handler claims the connection.
    Match,
    /// The handler will never claim the connection.
    Reject,
    /// The handler needs at least this many bytes before it can decide.
    NeedMore(usize),
}

/// What a handler did with a connection it owned.
#[derive(Debug)]
pub enum Outcome {
    /// The connection ran to completion.
    Done,
    /// The handler transformed the connection (TLS termination) and hands
    /// it back for detection.
    Redetect(Connection),
}

/// A protocol a listener can dispatch connections to.
///
/// Handlers are built once and shared read-only by every connection task.
#[async_trait]
pub trait ProtocolHandler: fmt::Display + Send + Sync {
    /// Decide whether this handler claims a connection, given the bytes
    /// read so far and the connection's hint chain.
    fn check(&self, header: &[u8], hints: &[Hint]) -> Detection;

    /// Take ownership of a classified connection. Bytes consumed during
    /// detection are replayed by the connection itself.
    async fn handle(&self, conn: Connection) -> Result<Outcome>;
}

/// Shared check for handlers matching an exact prefix.
pub(crate) fn check_prefix(header: &[u8], magic: &[u8]) -> Detection {
    let n = header.len().min(magic.len());
    if header[..n] != magic[..n] {
        Detection::Reject
    } else if n < magic.len() {
        Detection::NeedMore(magic.len())
    } else {
        Detection::Match
    }
}

/// Shared check for handlers matching any one of several prefixes.
///
/// A fully matching prefix wins even while an earlier one still needs
/// bytes, so the earliest pattern that matches decides.
pub(crate) fn check_any_prefix<'a>(
    header: &[u8],
    magics: impl IntoIterator<Item = &'a [u8]>,
) -> Detection {
    let mut need: Option<usize> = None;
    for magic in magics {
        match check_prefix(header, magic) {
            Detection::Match => return Detection::Match,
            Detection::NeedMore(n) => need = Some(need.map_or(n, |m| m.min(n))),
            Detection::Reject => {}
        }
    }
    need.map_or(Detection::Reject, Detection::NeedMore)
}
