//! Newline framing with a size bound.

use std::io::ErrorKind;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{ModlinkError, Result};

/// Outcome of one bounded read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, including its `\n` unless it was the unterminated tail
    Line(Vec<u8>),
    /// The peer closed its writer
    Eof,
    /// Nothing complete arrived within the timeout
    TimedOut,
}

/// Reads newline-delimited frames, refusing frames over `max_bytes`.
///
/// Partial data lives inside the reader, so a read abandoned by a timeout
/// or a `select!` loses nothing: the next call picks up where it stopped.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_bytes: usize,
    discarding: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a reader
    pub fn new(reader: R, max_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
            max_bytes: max_bytes.max(1),
            discarding: false,
        }
    }

    /// Next line, `None` at end-of-stream.
    ///
    /// An oversized line is drained and reported as
    /// [`ModlinkError::MessageTooLarge`]; the reader is then positioned at
    /// the start of the following line.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let available = self.inner.fill_buf().await?;

            if available.is_empty() {
                if self.discarding {
                    self.discarding = false;
                    return Err(ModlinkError::MessageTooLarge {
                        max_bytes: self.max_bytes,
                    });
                }
                if self.buf.is_empty() {
                    return Ok(None);
                }
                // Unterminated tail before EOF
                return Ok(Some(std::mem::take(&mut self.buf)));
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let take = pos + 1;
                    if self.discarding || self.buf.len() + take > self.max_bytes {
                        self.inner.consume(take);
                        self.buf.clear();
                        self.discarding = false;
                        return Err(ModlinkError::MessageTooLarge {
                            max_bytes: self.max_bytes,
                        });
                    }
                    self.buf.extend_from_slice(&available[..take]);
                    self.inner.consume(take);
                    return Ok(Some(std::mem::take(&mut self.buf)));
                },
                None => {
                    let len = available.len();
                    if self.discarding || self.buf.len() + len > self.max_bytes {
                        self.inner.consume(len);
                        self.buf.clear();
                        self.discarding = true;
                        continue;
                    }
                    self.buf.extend_from_slice(available);
                    self.inner.consume(len);
                },
            }
        }
    }

    /// [`LineReader::next_line`] bounded by an optional timeout.
    pub async fn read_frame(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome> {
        let line = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.next_line()).await {
                Ok(result) => result?,
                Err(_) => return Ok(ReadOutcome::TimedOut),
            },
            None => self.next_line().await?,
        };
        Ok(match line {
            Some(line) => ReadOutcome::Line(line),
            None => ReadOutcome::Eof,
        })
    }
}

/// Write one frame and flush it, adding the `\n` terminator if missing.
///
/// A peer that is gone surfaces as [`ModlinkError::Transport`].
pub async fn write_line<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, line: &[u8]) -> Result<()> {
    write_frame(writer, line).await.map_err(|e| match e.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::WriteZero => {
            ModlinkError::Transport(format!("destination closed: {e}"))
        },
        _ => ModlinkError::Io(e),
    })
}

async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    if !line.ends_with(b"\n") {
        writer.write_all(b"\n").await?;
    }
    writer.flush().await
}
