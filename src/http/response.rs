//! Native HTTP response and its body kinds.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::headers::parse_content_type;
use super::request::charset_of;
use super::{Headers, Query, StatusCode};
use crate::Error;
use crate::stream::{ByteStream, SendFile};

/// What a [`Response`] carries, chosen once at construction.
///
/// Each kind implies a default `Content-Type` (kept only when the response does
/// not set one itself).
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Raw bytes, no implied content type.
    Bytes(Bytes),
    /// `text/plain; charset=utf-8`
    Text(String),
    /// `text/html; charset=utf-8`
    Html(String),
    /// `application/json`
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded`
    Form(Query),
    /// An empty body with a `Location` header.
    Redirect(String),
    /// A file on disk, sent as a zero-copy chunk where the transport allows it.
    File(PathBuf),
    /// An arbitrary stream, no implied content type.
    Stream(ByteStream),
}

impl Body {
    // Default headers for this kind, and the stream that carries it.
    fn into_parts(self) -> (Vec<(&'static str, String)>, ByteStream) {
        match self {
            Self::Empty => (Vec::new(), ByteStream::empty()),
            Self::Bytes(bytes) => (Vec::new(), bytes.into()),
            Self::Text(text) => (
                vec![("content-type", "text/plain; charset=utf-8".into())],
                text.into(),
            ),
            Self::Html(html) => (
                vec![("content-type", "text/html; charset=utf-8".into())],
                html.into(),
            ),
            Self::Json(value) => (
                vec![("content-type", "application/json".into())],
                value.to_string().into(),
            ),
            Self::Form(form) => (
                vec![("content-type", "application/x-www-form-urlencoded".into())],
                form.encode().into(),
            ),
            Self::Redirect(location) => (vec![("location", location)], ByteStream::empty()),
            Self::File(path) => {
                let mime = guess_mime(&path);
                (
                    vec![("content-type", mime.into())],
                    ByteStream::from_chunks([SendFile::new(path)]),
                )
            }
            Self::Stream(stream) => (Vec::new(), stream),
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Query> for Body {
    fn from(form: Query) -> Self {
        Self::Form(form)
    }
}

impl From<ByteStream> for Body {
    fn from(stream: ByteStream) -> Self {
        Self::Stream(stream)
    }
}

// Text types are served as UTF-8.
fn guess_mime(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_owned()
    }
}

/// An HTTP response as a native handler produces it.
///
/// # Examples
///
/// ```
/// use wirebridge::http::{Response, StatusCode};
///
/// let response = Response::text("Hello, World!");
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(response.headers().get("content-type"), Some("text/plain; charset=utf-8"));
///
/// let moved = Response::redirect("/login");
/// assert_eq!(moved.status(), StatusCode::FOUND);
/// assert_eq!(moved.headers().get("location"), Some("/login"));
/// assert!(moved.ok());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: ByteStream,
}

impl Response {
    /// Creates a response with no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ByteStream::empty(),
        }
    }

    /// A response carrying `body`, with the status that kind implies
    /// (`302 Found` for redirects, `200 OK` otherwise).
    pub fn from_body(body: impl Into<Body>) -> Self {
        let body = body.into();
        let status = match body {
            Body::Redirect(_) => StatusCode::FOUND,
            _ => StatusCode::OK,
        };
        Self::new(status).with_body(body)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::from_body(Body::Text(text.into()))
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self::from_body(Body::Html(html.into()))
    }

    /// Serializes `value` into an `application/json` response.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self::from_body(Body::Json(serde_json::to_value(value)?)))
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self::from_body(Body::Redirect(location.into()))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::from_body(Body::File(path.into()))
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the body. Headers implied by the body kind are added unless
    /// already present.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        let (defaults, stream) = body.into().into_parts();
        for (name, value) in defaults {
            self.headers.set_default(name, value);
        }
        self.body = stream;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn stream(&self) -> &ByteStream {
        &self.body
    }

    /// `true` when the status is below 400.
    pub fn ok(&self) -> bool {
        self.status.is_ok()
    }

    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get("content-type")
            .map(|value| parse_content_type(value).0)
    }

    pub fn charset(&self) -> String {
        charset_of(&self.headers)
    }

    pub async fn body(&self) -> Result<Bytes, Error> {
        self.body.body().await
    }

    pub async fn text_body(&self) -> Result<String, Error> {
        self.body.text(&self.charset()).await
    }

    pub async fn json_body<T: DeserializeOwned>(&self) -> Result<T, Error> {
        self.body.json().await
    }

    pub async fn form_body(&self) -> Result<Query, Error> {
        let content_type = self.headers.get("content-type").unwrap_or_default();
        self.body.form(content_type).await
    }

    pub(crate) fn into_parts(self) -> (StatusCode, Headers, ByteStream) {
        (self.status, self.headers, self.body)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl From<Body> for Response {
    fn from(body: Body) -> Self {
        Self::from_body(body)
    }
}
