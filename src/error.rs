//! Error taxonomy shared by streams, sockets, and both bridge directions.
//!
//! Four kinds of failure cross the bridge:
//!
//! - [`Error::Disconnect`]: the peer is gone. Cooperative cancellation, never
//!   an application failure; handlers let it propagate and the bridge swallows it.
//! - [`Error::Protocol`]: a message arrived out of sequence.
//! - [`Error::Usage`] / [`Error::PayloadType`]: a [`Socket`](crate::Socket) was
//!   driven outside its state machine.
//! - [`Error::App`]: anything raised by a wrapped handler or app, forwarded
//!   verbatim to whoever awaits the result.
//!
//! `Error` is `Clone` because a failed [`ByteStream`](crate::ByteStream) slot is
//! memoized and handed to every consumer that reaches it.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::Message;

/// Errors produced by the bridge and its building blocks.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("peer disconnected")]
    Disconnect,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("invalid socket usage: {0}")]
    Usage(&'static str),

    #[error("expected a {expected} payload but received {received}")]
    PayloadType {
        expected: &'static str,
        received: &'static str,
    },

    #[error("unsupported scope type: {0}")]
    UnsupportedScope(String),

    #[error("failed to decode body: {0}")]
    Decode(String),

    #[error("invalid JSON: {0}")]
    Json(#[source] Arc<serde_json::Error>),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error(transparent)]
    App(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary handler or app failure.
    pub fn app(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::App(Arc::new(error))
    }

    /// Protocol violation for a message that is not valid at this point of the exchange.
    pub fn unexpected(message: &Message) -> Self {
        Self::Protocol(format!("unexpected message type: {}", message.kind()))
    }

    /// Returns `true` for the cooperative "peer is gone" signal.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnect)
    }

    /// Returns `true` for state-machine misuse: programmer errors rather than runtime conditions.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::PayloadType { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
