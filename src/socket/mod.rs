//! Duplex sessions for long-lived (WebSocket-style) connections.
//!
//! A [`Socket`] walks a strict state machine:
//!
//! ```text
//! Fresh ──accept()──▶ Accepted ──close()──▶ Closed
//!   └───────────────close()──────────────────▲
//! ```
//!
//! No transition is taken twice, and payloads only flow while `Accepted`.
//! Misuse is reported immediately as [`Error::Usage`], before anything reaches
//! the [`Transport`]. A peer that goes away surfaces as [`Error::Disconnect`]
//! and moves the socket to `Closed`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::Error;
use crate::http::{Headers, Query};

/// Close code for a normal, completed session.
pub const CLOSE_NORMAL: u16 = 1000;

/// Lifecycle of a [`Socket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Accepted,
    Closed,
}

/// A single session payload: text or binary, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Bytes(Bytes),
}

impl Payload {
    /// Builds a payload from the two nullable wire fields.
    ///
    /// Exactly one of them must be set.
    pub fn from_parts(bytes: Option<Bytes>, text: Option<String>) -> Result<Self, Error> {
        match (bytes, text) {
            (Some(bytes), None) => Ok(Self::Bytes(bytes)),
            (None, Some(text)) => Ok(Self::Text(text)),
            _ => Err(Error::Protocol(
                "session payload must carry exactly one of bytes or text".into(),
            )),
        }
    }

    /// Splits into `(bytes, text)`, with the unused side `None`.
    pub fn into_parts(self) -> (Option<Bytes>, Option<String>) {
        match self {
            Self::Bytes(bytes) => (Some(bytes), None),
            Self::Text(text) => (None, Some(text)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// The connection primitives behind a [`Socket`].
///
/// `receive` must fail with [`Error::Disconnect`] once the peer is gone. A
/// transport is used concurrently: one task may wait in `receive` while another
/// calls `send`.
pub trait Transport: Send + Sync {
    fn accept(&self, headers: Headers) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

    fn close(&self, code: u16) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;

    fn receive(&self) -> Pin<Box<dyn Future<Output = Result<Payload, Error>> + Send + '_>>;

    fn send(&self, payload: Payload) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + '_>>;
}

/// A duplex session bound to a [`Transport`].
///
/// # Examples
///
/// ```rust,no_run
/// use wirebridge::{Error, Socket};
///
/// async fn echo(mut socket: Socket) -> Result<(), Error> {
///     socket.accept().await?;
///     loop {
///         let text = socket.receive_text().await?;
///         socket.send_text(text).await?;
///     }
/// }
/// ```
pub struct Socket {
    path: String,
    query: Query,
    headers: Headers,
    state: SessionState,
    transport: Arc<dyn Transport>,
}

impl Socket {
    /// Creates a fresh session over `transport`.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub(crate) fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            path: String::from("/"),
            query: Query::new(),
            headers: Headers::new(),
            state: SessionState::Fresh,
            transport,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Accepts the session.
    pub async fn accept(&mut self) -> Result<(), Error> {
        self.accept_with_headers(Headers::new()).await
    }

    /// Accepts the session, sending extra handshake headers (cookies, for instance).
    pub async fn accept_with_headers(&mut self, headers: Headers) -> Result<(), Error> {
        match self.state {
            SessionState::Fresh => {}
            SessionState::Accepted => return Err(Error::Usage("socket is already accepted")),
            SessionState::Closed => return Err(Error::Usage("socket is closed")),
        }
        let accepted = self.transport.accept(headers).await;
        self.track(accepted)?;
        self.state = SessionState::Accepted;
        debug!(path = %self.path, "session accepted");
        Ok(())
    }

    /// Closes the session with `code`. Valid from `Fresh` (rejecting the
    /// handshake) or `Accepted`.
    pub async fn close(&mut self, code: u16) -> Result<(), Error> {
        if self.state == SessionState::Closed {
            return Err(Error::Usage("socket is already closed"));
        }
        self.state = SessionState::Closed;
        debug!(path = %self.path, code, "closing session");
        match self.transport.close(code).await {
            Err(e) if e.is_disconnect() => Ok(()),
            other => other,
        }
    }

    /// Receives the next payload, whatever its kind.
    pub async fn receive_payload(&mut self) -> Result<Payload, Error> {
        self.ensure_accepted()?;
        let received = self.transport.receive().await;
        self.track(received)
    }

    pub async fn receive_bytes(&mut self) -> Result<Bytes, Error> {
        match self.receive_payload().await? {
            Payload::Bytes(bytes) => Ok(bytes),
            other => Err(Error::PayloadType {
                expected: "bytes",
                received: other.kind(),
            }),
        }
    }

    pub async fn receive_text(&mut self) -> Result<String, Error> {
        match self.receive_payload().await? {
            Payload::Text(text) => Ok(text),
            other => Err(Error::PayloadType {
                expected: "text",
                received: other.kind(),
            }),
        }
    }

    /// Receives a payload of either kind and decodes it as JSON.
    pub async fn receive_json<T: DeserializeOwned>(&mut self) -> Result<T, Error> {
        let value = match self.receive_payload().await? {
            Payload::Text(text) => serde_json::from_str(&text)?,
            Payload::Bytes(bytes) => serde_json::from_slice(&bytes)?,
        };
        Ok(value)
    }

    pub async fn send(&mut self, payload: Payload) -> Result<(), Error> {
        self.ensure_accepted()?;
        let sent = self.transport.send(payload).await;
        self.track(sent)
    }

    pub async fn send_bytes(&mut self, bytes: impl Into<Bytes>) -> Result<(), Error> {
        self.send(Payload::Bytes(bytes.into())).await
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), Error> {
        self.send(Payload::Text(text.into())).await
    }

    /// Serializes `value` as JSON and sends it as text.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        let text = serde_json::to_string(value)?;
        self.send(Payload::Text(text)).await
    }

    fn ensure_accepted(&self) -> Result<(), Error> {
        match self.state {
            SessionState::Accepted => Ok(()),
            SessionState::Fresh => Err(Error::Usage("socket has not been accepted")),
            SessionState::Closed => Err(Error::Usage("socket is closed")),
        }
    }

    // A disconnect from the transport ends the session.
    fn track<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if matches!(result, Err(Error::Disconnect)) {
            debug!(path = %self.path, "peer disconnected");
            self.state = SessionState::Closed;
        }
        result
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("path", &self.path)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
