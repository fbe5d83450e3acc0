use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::http::{Headers, Method};

/// Extension key advertising that the transport accepts
/// `http.response.zerocopysend` messages.
pub const ZERO_COPY_SEND: &str = "http.response.zerocopysend";

/// Connection kind of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Http,
    Websocket,
    Lifespan,
}

impl ScopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Websocket => "websocket",
            Self::Lifespan => "lifespan",
        }
    }
}

/// Connection metadata handed to a protocol app alongside its queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "type")]
    pub kind: ScopeKind,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub path: String,
    /// The raw query string, without the leading `?`.
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub headers: Headers,
    /// Capabilities negotiated with the transport, keyed by name.
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Scope {
    fn new(kind: ScopeKind, method: Method, path: impl Into<String>) -> Self {
        Self {
            kind,
            method,
            path: path.into(),
            query_string: String::new(),
            headers: Headers::new(),
            extensions: BTreeMap::new(),
        }
    }

    /// A request/response scope.
    pub fn http(method: Method, path: impl Into<String>) -> Self {
        Self::new(ScopeKind::Http, method, path)
    }

    /// A session scope. The method is always `GET`.
    pub fn websocket(path: impl Into<String>) -> Self {
        Self::new(ScopeKind::Websocket, Method::Get, path)
    }

    pub fn lifespan() -> Self {
        Self::new(ScopeKind::Lifespan, Method::Get, "")
    }

    #[must_use]
    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Advertises an extension with an empty settings object.
    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions
            .insert(name.into(), serde_json::Value::Object(Default::default()));
        self
    }

    /// Returns `true` if the transport advertised `extension`.
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.contains_key(extension)
    }
}
