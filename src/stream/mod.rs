//! Lazy, multi-consumer byte streams.
//!
//! A [`ByteStream`] is the body of every [`Request`](crate::Request) and
//! [`Response`](crate::Response). It owns exactly one upstream source and pulls
//! it at most once per position: every fetch is memoized in a shared,
//! append-only list of slots. Any number of cursors created by
//! [`chunks`](ByteStream::chunks) can then walk the same sequence, including
//! cursors that join while another one is mid-read.

mod file;

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::Error;
use crate::http::Query;
use crate::http::headers::parse_content_type;

pub use file::SendFile;

/// Read size used when a [`SendFile`] chunk is expanded into bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// One unit of a body.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// In-memory bytes.
    Bytes(Bytes),
    /// A file region, forwarded untouched to transports that can send files directly.
    File(SendFile),
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::File(file) => file.count() == Some(0),
        }
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Self::Bytes(text.into())
    }
}

impl From<&'static str> for Chunk {
    fn from(text: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl<const N: usize> From<&'static [u8; N]> for Chunk {
    fn from(bytes: &'static [u8; N]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<SendFile> for Chunk {
    fn from(file: SendFile) -> Self {
        Self::File(file)
    }
}

type Upstream = BoxStream<'static, Result<Chunk, Error>>;
type Slot = Shared<BoxFuture<'static, Option<Result<Chunk, Error>>>>;

struct Inner {
    upstream: Arc<tokio::sync::Mutex<Upstream>>,
    slots: Mutex<Vec<Slot>>,
}

impl Inner {
    /// Returns the memoized fetch for `index`, creating it if this is the first
    /// cursor to get there.
    ///
    /// A cursor only asks for `index` after slot `index - 1` resolved, so slots
    /// are appended one at a time and the upstream is pulled in order.
    fn slot(&self, index: usize) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.get(index) {
            return slot.clone();
        }

        let upstream = Arc::clone(&self.upstream);
        let slot = async move {
            let mut upstream = upstream.lock().await;
            upstream.next().await
        }
        .boxed()
        .shared();
        slots.push(slot.clone());
        slot
    }
}

/// A lazily pulled, cheaply cloneable body shared by any number of readers.
///
/// Clones share the same upstream and cache. An upstream error is memoized like
/// any chunk: every reader sees it at the same index and stops there.
///
/// # Examples
///
/// ```
/// use wirebridge::ByteStream;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let body = ByteStream::from_chunks(["foo", "bar"]);
/// assert_eq!(body.body().await.unwrap(), "foobar");
/// // A second read is served from the cache.
/// assert_eq!(body.text("utf-8").await.unwrap(), "foobar");
/// # }
/// ```
#[derive(Clone)]
pub struct ByteStream {
    inner: Arc<Inner>,
}

impl ByteStream {
    /// A stream with no chunks.
    pub fn empty() -> Self {
        Self::from_upstream(stream::empty().boxed())
    }

    /// A finite, in-memory sequence of chunks.
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Chunk>,
    {
        let chunks: Vec<Result<Chunk, Error>> =
            chunks.into_iter().map(|chunk| Ok(chunk.into())).collect();
        Self::from_upstream(stream::iter(chunks).boxed())
    }

    /// An externally driven asynchronous source.
    pub fn from_stream<S, C>(source: S) -> Self
    where
        S: Stream<Item = Result<C, Error>> + Send + 'static,
        C: Into<Chunk>,
    {
        Self::from_upstream(source.map(|item| item.map(Into::into)).boxed())
    }

    fn from_upstream(upstream: Upstream) -> Self {
        Self {
            inner: Arc::new(Inner {
                upstream: Arc::new(tokio::sync::Mutex::new(upstream)),
                slots: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A new cursor over the chunks as produced, file references included.
    pub fn raw_chunks(&self) -> BoxStream<'static, Result<Chunk, Error>> {
        let inner = Arc::clone(&self.inner);
        stream::unfold(Some(0usize), move |cursor| {
            let inner = Arc::clone(&inner);
            async move {
                let index = cursor?;
                let item = inner.slot(index).await?;
                let next = item.is_ok().then_some(index + 1);
                Some((item, next))
            }
        })
        .boxed()
    }

    /// A new cursor over the body bytes. File chunks are read from disk in
    /// [`DEFAULT_CHUNK_SIZE`] pieces.
    pub fn chunks(&self) -> BoxStream<'static, Result<Bytes, Error>> {
        self.raw_chunks()
            .flat_map(|chunk| match chunk {
                Ok(Chunk::Bytes(bytes)) => stream::once(future::ready(Ok(bytes))).boxed(),
                Ok(Chunk::File(file)) => file.chunks(DEFAULT_CHUNK_SIZE),
                Err(e) => stream::once(future::ready(Err(e))).boxed(),
            })
            .boxed()
    }

    /// Concatenates every chunk.
    pub async fn body(&self) -> Result<Bytes, Error> {
        let mut chunks = self.chunks();
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Decodes the body under `charset`.
    pub async fn text(&self, charset: &str) -> Result<String, Error> {
        let body = self.body().await?;
        decode_text(&body, charset)
    }

    /// Deserializes the body as JSON.
    pub async fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let body = self.body().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Parses a URL-encoded form body.
    ///
    /// Only `application/x-www-form-urlencoded` is understood here; any other
    /// content type is a decode error.
    pub async fn form(&self, content_type: &str) -> Result<Query, Error> {
        let (mime, params) = parse_content_type(content_type);
        if mime != FORM_URLENCODED {
            return Err(Error::Decode(format!("unsupported form content type: {mime:?}")));
        }
        let charset = params
            .iter()
            .find(|(name, _)| name == "charset")
            .map_or("utf-8", |(_, value)| value.as_str());
        let text = self.text(charset).await?;
        Ok(Query::parse(&text))
    }

    fn cached(&self) -> usize {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn decode_text(body: &[u8], charset: &str) -> Result<String, Error> {
    let label = charset.trim();
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| Error::Decode(format!("unsupported charset: {label:?}")))?;
    // ASCII labels resolve to windows-1252; hold them to plain ASCII.
    let ascii = matches!(label.to_ascii_lowercase().as_str(), "us-ascii" | "ascii");
    if ascii && !body.is_ascii() {
        return Err(Error::Decode("non-ASCII byte in us-ascii body".into()));
    }
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(Cow::into_owned)
        .ok_or_else(|| Error::Decode(format!("body is not valid {}", encoding.name())))
}

impl Default for ByteStream {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

impl From<Bytes> for ByteStream {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            Self::empty()
        } else {
            Self::from_chunks([bytes])
        }
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for ByteStream {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for ByteStream {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<&'static [u8]> for ByteStream {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}

impl<const N: usize> From<&'static [u8; N]> for ByteStream {
    fn from(bytes: &'static [u8; N]) -> Self {
        Bytes::from_static(bytes).into()
    }
}
