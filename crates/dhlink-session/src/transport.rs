//! Frame transport.
//!
//! The handshake only needs "read one frame" and "write one frame" over an
//! ordered byte stream. Frames are UTF-8 lines terminated by `\n`; a trailing
//! `\r` is stripped on read so CRLF peers interoperate.

use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, WriteHalf,
};

/// Default upper bound on a single line, excluding the terminator.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Low-level interface for reading and writing frames.
#[async_trait]
pub trait FrameTransport: Send {
    async fn read_frame(&mut self) -> Result<String, TransportError>;
    async fn write_frame(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Signal that no more frames will be written.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed before a complete frame was received")]
    Eof,

    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },

    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("frame contains a line terminator")]
    EmbeddedNewline,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Newline-delimited frames over any buffered reader and writer.
pub struct LineTransport<R, W> {
    reader: R,
    writer: W,
    max_frame_bytes: usize,
}

/// A [`LineTransport`] built from a single bidirectional stream.
pub type StreamTransport<S> = LineTransport<BufReader<ReadHalf<S>>, WriteHalf<S>>;

impl<R, W> LineTransport<R, W> {
    pub const fn new(reader: R, writer: W, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            writer,
            max_frame_bytes,
        }
    }

    pub const fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite,
{
    /// Split `stream` into buffered read and write halves.
    pub fn from_stream(stream: S, max_frame_bytes: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::new(BufReader::new(read_half), write_half, max_frame_bytes)
    }
}

#[async_trait]
impl<R, W> FrameTransport for LineTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<String, TransportError> {
        // Room for the longest allowed line plus "\r\n".
        let limit = self.max_frame_bytes.saturating_add(2);
        let mut buf = Vec::new();
        let read = (&mut self.reader)
            .take(limit as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Err(TransportError::Eof);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if read >= limit {
            return Err(TransportError::FrameTooLong {
                limit: self.max_frame_bytes,
            });
        }
        // A final line without terminator before EOF is still a frame.

        if buf.len() > self.max_frame_bytes {
            return Err(TransportError::FrameTooLong {
                limit: self.max_frame_bytes,
            });
        }
        String::from_utf8(buf).map_err(|_| TransportError::InvalidUtf8)
    }

    async fn write_frame(&mut self, frame: &str) -> Result<(), TransportError> {
        if frame.contains(['\n', '\r']) {
            return Err(TransportError::EmbeddedNewline);
        }
        let mut line = Vec::with_capacity(frame.len() + 1);
        line.extend_from_slice(frame.as_bytes());
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
