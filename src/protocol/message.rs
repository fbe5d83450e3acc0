//! Typed protocol messages.
//!
//! Each message serializes as a flat record tagged by `"type"`; the tag values and
//! field names are part of the wire contract and never change.

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::http::Headers;
use crate::socket::CLOSE_NORMAL;

fn close_normal() -> u16 {
    CLOSE_NORMAL
}

/// One event exchanged between a transport and a protocol app.
///
/// ```
/// use wirebridge::protocol::Message;
///
/// let start: Message =
///     serde_json::from_str(r#"{"type":"http.response.start","status":200}"#).unwrap();
/// assert_eq!(start.kind(), "http.response.start");
///
/// let send = Message::WebsocketSend { bytes: None, text: Some("foo".into()) };
/// assert_eq!(
///     serde_json::to_string(&send).unwrap(),
///     r#"{"type":"websocket.send","bytes":null,"text":"foo"}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// A piece of the request body. `more_body: false` marks the last one.
    #[serde(rename = "http.request")]
    HttpRequest {
        #[serde(default)]
        body: Bytes,
        #[serde(default)]
        more_body: bool,
    },

    /// The client went away before the exchange finished.
    #[serde(rename = "http.disconnect")]
    HttpDisconnect,

    #[serde(rename = "http.response.start")]
    HttpResponseStart {
        status: u16,
        #[serde(default)]
        headers: Headers,
    },

    #[serde(rename = "http.response.body")]
    HttpResponseBody {
        #[serde(default)]
        body: Bytes,
        #[serde(default)]
        more_body: bool,
    },

    /// Sends a file region directly. Only valid when the scope advertises
    /// [`ZERO_COPY_SEND`](super::ZERO_COPY_SEND).
    #[serde(rename = "http.response.zerocopysend")]
    HttpResponseZeroCopySend {
        file: PathBuf,
        #[serde(default)]
        offset: u64,
        #[serde(default)]
        count: Option<u64>,
        #[serde(default)]
        more_body: bool,
    },

    #[serde(rename = "websocket.connect")]
    WebsocketConnect,

    #[serde(rename = "websocket.accept")]
    WebsocketAccept {
        #[serde(default)]
        headers: Headers,
    },

    #[serde(rename = "websocket.receive")]
    WebsocketReceive {
        #[serde(default)]
        bytes: Option<Bytes>,
        #[serde(default)]
        text: Option<String>,
    },

    /// Outbound payload. Both fields are always present; exactly one is non-null.
    #[serde(rename = "websocket.send")]
    WebsocketSend {
        bytes: Option<Bytes>,
        text: Option<String>,
    },

    #[serde(rename = "websocket.close")]
    WebsocketClose {
        #[serde(default = "close_normal")]
        code: u16,
    },

    #[serde(rename = "websocket.disconnect")]
    WebsocketDisconnect {
        #[serde(default = "close_normal")]
        code: u16,
    },
}

impl Message {
    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HttpRequest { .. } => "http.request",
            Self::HttpDisconnect => "http.disconnect",
            Self::HttpResponseStart { .. } => "http.response.start",
            Self::HttpResponseBody { .. } => "http.response.body",
            Self::HttpResponseZeroCopySend { .. } => "http.response.zerocopysend",
            Self::WebsocketConnect => "websocket.connect",
            Self::WebsocketAccept { .. } => "websocket.accept",
            Self::WebsocketReceive { .. } => "websocket.receive",
            Self::WebsocketSend { .. } => "websocket.send",
            Self::WebsocketClose { .. } => "websocket.close",
            Self::WebsocketDisconnect { .. } => "websocket.disconnect",
        }
    }

    /// Shorthand for an `http.response.body` message.
    pub fn body(body: impl Into<Bytes>, more_body: bool) -> Self {
        Self::HttpResponseBody {
            body: body.into(),
            more_body,
        }
    }

    /// Shorthand for an `http.response.start` message.
    pub fn start(status: u16, headers: Headers) -> Self {
        Self::HttpResponseStart { status, headers }
    }
}
