//! File-region chunks for zero-copy delegation to the transport.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::Error;

/// A reference to a region of a file on disk.
///
/// A [`ByteStream`](super::ByteStream) carries this as an opaque chunk. Transports
/// that negotiated zero-copy sends receive it as-is; everyone else gets its bytes
/// read lazily via [`chunks`](Self::chunks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFile {
    path: PathBuf,
    offset: u64,
    size: Option<u64>,
}

enum ReadState {
    Unopened,
    Open { file: File, remaining: Option<u64> },
    Done,
}

impl SendFile {
    /// References the whole file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            size: None,
        }
    }

    /// Starts reading `offset` bytes into the file.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Reads at most `size` bytes. `None` reads to end of file.
    #[must_use]
    pub fn size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start(&self) -> u64 {
        self.offset
    }

    /// Number of bytes to send, or `None` for "to end of file".
    pub fn count(&self) -> Option<u64> {
        self.size
    }

    /// Lazily reads the region in chunks of at most `chunk_size` bytes.
    ///
    /// The file is opened on first poll. An I/O failure is yielded once and ends
    /// the stream.
    pub fn chunks(&self, chunk_size: usize) -> BoxStream<'static, Result<Bytes, Error>> {
        let region = self.clone();
        let chunk_size = chunk_size.max(1);

        stream::unfold(ReadState::Unopened, move |state| {
            let region = region.clone();
            async move {
                let (mut file, remaining) = match state {
                    ReadState::Done => return None,
                    ReadState::Open { file, remaining } => (file, remaining),
                    ReadState::Unopened => match region.open().await {
                        Ok(file) => (file, region.size),
                        Err(e) => return Some((Err(e.into()), ReadState::Done)),
                    },
                };

                let want = match remaining {
                    Some(0) => return None,
                    Some(left) => left.min(chunk_size as u64) as usize,
                    None => chunk_size,
                };

                let mut buf = BytesMut::zeroed(want);
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        let next = ReadState::Open {
                            file,
                            remaining: remaining.map(|left| left - n as u64),
                        };
                        Some((Ok(buf.freeze()), next))
                    }
                    Err(e) => Some((Err(e.into()), ReadState::Done)),
                }
            }
        })
        .boxed()
    }

    async fn open(&self) -> std::io::Result<File> {
        let mut file = File::open(&self.path).await?;
        if self.offset != 0 {
            file.seek(SeekFrom::Start(self.offset)).await?;
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn scratch(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    async fn collect(stream: BoxStream<'static, Result<Bytes, Error>>) -> Vec<Bytes> {
        stream.map(|chunk| chunk.unwrap()).collect().await
    }

    #[tokio::test]
    async fn reads_in_fixed_chunks() {
        let file = scratch(b"abcdefghij");
        let chunks = collect(SendFile::new(file.path()).chunks(4)).await;
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[tokio::test]
    async fn honors_offset_and_size() {
        let file = scratch(b"abcdefghij");
        let region = SendFile::new(file.path()).offset(2).size(Some(5));
        let chunks = collect(region.chunks(3)).await;
        assert_eq!(chunks, vec!["cde", "fg"]);
    }

    #[tokio::test]
    async fn missing_file_yields_io_error_once() {
        let mut chunks = SendFile::new("/nonexistent/wirebridge/file").chunks(16);
        assert!(matches!(chunks.next().await, Some(Err(Error::Io(_)))));
        assert!(chunks.next().await.is_none());
    }
}
