//! Protocol detection and dispatch for multiplexed listeners.
//!
//! One listening port can serve several protocols. Each accepted connection
//! is read a little at a time while registered [`ProtocolHandler`]s inspect
//! the buffered bytes; the first handler that claims the connection gets it,
//! with the inspected bytes replayed so it sees the stream from the start.
//!
//! Handlers that unwrap a layer (TLS termination) hand the inner stream back
//! for another round of detection, with what they learned appended to the
//! connection's [`Hint`] chain.

mod conn;
mod dial;
mod error;
mod handler;
mod listener;
pub mod proto;
mod relay;
mod server;

#[cfg(test)]
mod test_util;

pub use conn::{last_tls_hint, BoxedStream, Connection, Hint, Stream, TlsHint};
pub use dial::{Dialer, DEFAULT_CONNECT_TIMEOUT};
pub use error::{Error, Result};
pub use handler::{Detection, Outcome, ProtocolHandler};
pub use listener::{Listener, ListenerConfig, ListenerStats, DEFAULT_MAX_CONNECTIONS};
pub use relay::proxy_bidirectional;
pub use server::{
    DispatchStats, Selection, Server, SharedHandler, DEFAULT_MAX_READ, MAX_READ_LIMIT,
    MAX_REDETECT_DEPTH,
};
