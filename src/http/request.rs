//! Native HTTP request.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::headers::parse_content_type;
use super::{Headers, Method, Query};
use crate::Error;
use crate::stream::ByteStream;

const DEFAULT_CHARSET: &str = "utf-8";

/// An HTTP request as a native handler sees it.
///
/// The body is a [`ByteStream`]: it is pulled lazily, and reading it twice (or
/// from two places at once) does not consume the source twice.
///
/// # Examples
///
/// ```
/// use wirebridge::http::{Method, Query, Request};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let request = Request::new(Method::Post, "/users")
///     .with_query(Query::parse("page=2"))
///     .header("Content-Type", "application/json")
///     .with_body(r#"{"name":"jack"}"#);
///
/// assert_eq!(request.path(), "/users");
/// assert_eq!(request.query().get("page"), Some("2"));
/// let user: serde_json::Value = request.json().await.unwrap();
/// assert_eq!(user["name"], "jack");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Query,
    headers: Headers,
    body: ByteStream,
}

impl Request {
    /// Creates a request with no headers, no query and an empty body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Query::new(),
            headers: Headers::new(),
            body: ByteStream::empty(),
        }
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

    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<ByteStream>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
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

    /// The body stream itself.
    pub fn stream(&self) -> &ByteStream {
        &self.body
    }

    /// The lowercased media type from `Content-Type`, without parameters.
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get("content-type")
            .map(|value| parse_content_type(value).0)
    }

    /// The `charset` parameter of `Content-Type`, defaulting to UTF-8.
    pub fn charset(&self) -> String {
        charset_of(&self.headers)
    }

    pub async fn body(&self) -> Result<Bytes, Error> {
        self.body.body().await
    }

    /// Decodes the body under [`charset`](Self::charset).
    pub async fn text(&self) -> Result<String, Error> {
        self.body.text(&self.charset()).await
    }

    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        self.body.json().await
    }

    /// Parses an `application/x-www-form-urlencoded` body.
    pub async fn form(&self) -> Result<Query, Error> {
        let content_type = self.headers.get("content-type").unwrap_or_default();
        self.body.form(content_type).await
    }
}

pub(crate) fn charset_of(headers: &Headers) -> String {
    headers
        .get("content-type")
        .and_then(|value| {
            parse_content_type(value)
                .1
                .into_iter()
                .find(|(name, _)| name == "charset")
                .map(|(_, charset)| charset)
        })
        .unwrap_or_else(|| DEFAULT_CHARSET.to_owned())
}
