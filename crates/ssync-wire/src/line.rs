//! CRLF line framing over a bidirectional byte stream.
//!
//! Every read is individually bounded by the session's client timeout; a
//! timeout or malformed line is fatal to the caller's phase, never retried
//! here. Writes are buffered and flushed at phase boundaries so the peer can
//! pipeline.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
    ReadHalf, WriteHalf,
};
use tokio::time::timeout;

use crate::error::{Result, WireError};

/// Line framing over any bidirectional stream.
///
/// Reads are line-oriented (CRLF or bare LF accepted, terminator stripped)
/// except for declared-length body reads, which proceed in
/// `chunk_size`-bounded chunks. End of stream is reported as `None`, distinct
/// from a blank line.
pub struct LineChannel<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,
    read_timeout: Duration,
    chunk_size: usize,
}

impl<S> LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Wrap a stream. `read_timeout` bounds every individual read;
    /// `chunk_size` bounds body-read granularity and the maximum line length.
    pub fn new(stream: S, read_timeout: Duration, chunk_size: usize) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read),
            writer: BufWriter::new(write),
            read_timeout,
            chunk_size,
        }
    }

    /// Read one line, stripping the trailing CR/LF. Returns `None` at end of
    /// stream. `label` names the read in the timeout error.
    pub async fn read_line(&mut self, label: &'static str) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = timeout(self.read_timeout, self.reader.read_until(b'\n', &mut buf))
            .await
            .map_err(|_| WireError::Timeout {
                seconds: self.read_timeout.as_secs_f64(),
                label,
            })??;
        if n == 0 {
            return Ok(None);
        }
        if buf.len() > self.chunk_size {
            return Err(WireError::LineTooLong {
                limit: self.chunk_size,
            });
        }
        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| WireError::NotUtf8)
    }

    /// A bounded reader over the next `len` body bytes on the stream.
    pub fn body(&mut self, len: u64) -> BodyReader<'_, S> {
        BodyReader {
            chan: self,
            remaining: len,
        }
    }

    /// Queue one line followed by CRLF. Not flushed until [`Self::flush`].
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    /// Queue raw bytes with no terminator (subrequest bodies).
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await?;
        Ok(())
    }

    /// Flush queued output to the peer.
    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    /// Hard-cancel the connection: flush nothing further and shut down the
    /// write half so the peer's pending reads fail instead of hanging.
    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// A bounded, resumable view of one subrequest body.
///
/// The update engine hands this to the storage collaborator, which may read
/// as much or as little as it wants; the engine drains the remainder so the
/// stream stays positioned at the next subrequest.
#[async_trait]
pub trait BodyRead: Send {
    /// Bytes of the declared length not yet consumed.
    fn remaining(&self) -> u64;

    /// Read the next chunk, or `None` once the declared length is consumed.
    async fn chunk(&mut self) -> Result<Option<Bytes>>;

    /// Read and concatenate all remaining bytes.
    async fn read_all(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(self.remaining() as usize);
        while let Some(chunk) = self.chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }

    /// Consume and discard all remaining bytes.
    async fn drain(&mut self) -> Result<()> {
        while self.chunk().await?.is_some() {}
        Ok(())
    }
}

/// [`BodyRead`] implementation over a [`LineChannel`].
pub struct BodyReader<'a, S> {
    chan: &'a mut LineChannel<S>,
    remaining: u64,
}

#[async_trait]
impl<S> BodyRead for BodyReader<'_, S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    fn remaining(&self) -> u64 {
        self.remaining
    }

    async fn chunk(&mut self) -> Result<Option<Bytes>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let take = self.remaining.min(self.chan.chunk_size as u64) as usize;
        let mut buf = vec![0u8; take];
        timeout(self.chan.read_timeout, self.chan.reader.read_exact(&mut buf))
            .await
            .map_err(|_| WireError::Timeout {
                seconds: self.chan.read_timeout.as_secs_f64(),
                label: "updates content",
            })?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    WireError::UnexpectedEof
                } else {
                    WireError::Io(e)
                }
            })?;
        self.remaining -= take as u64;
        Ok(Some(Bytes::from(buf)))
    }
}
