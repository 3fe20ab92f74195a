//! In-process transport between modules and the controller.
//!
//! # Architecture
//!
//! ```text
//!  ┌───────────┐   front channel    ┌────────────┐   back channel    ┌──────────┐
//!  │ Front end │ ◄════════════════► │ Controller │ ◄═══════════════► │ Back end │
//!  └───────────┘  (duplex, split)   └────────────┘  (duplex, split)  └──────────┘
//! ```
//!
//! Each channel is an independent [`tokio::io::duplex`] pipe split into a
//! reader and a writer. The two relay directions therefore never share a
//! buffer, and every half has exactly one owner. End-of-stream is explicit:
//! shutting a writer down makes the peer reader return EOF. Dropping only
//! the write half does not, because the stream lives on in its read half;
//! both halves must go.

mod framing;

pub use framing::{write_line, LineReader, ReadOutcome};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

/// Owned, type-erased read half
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned, type-erased write half
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Default per-direction buffer of each duplex pipe
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64 * 1024;

/// One side of a duplex channel
pub struct Endpoint {
    /// Bytes written by the peer arrive here
    pub reader: BoxedReader,
    /// Bytes written here arrive at the peer
    pub writer: BoxedWriter,
}

impl Endpoint {
    /// Split a duplex stream into an endpoint
    pub fn from_duplex(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Take the halves apart
    pub fn into_parts(self) -> (BoxedReader, BoxedWriter) {
        (self.reader, self.writer)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").finish_non_exhaustive()
    }
}

/// A module's endpoint and the controller's endpoint of the same channel
#[derive(Debug)]
pub struct ChannelPair {
    /// Handed to the front end or back end
    pub module: Endpoint,
    /// Kept by the controller
    pub controller: Endpoint,
}

/// Create one duplex channel
pub fn channel_pair(capacity: usize) -> ChannelPair {
    let (module, controller) = tokio::io::duplex(capacity.max(1));
    ChannelPair {
        module: Endpoint::from_duplex(module),
        controller: Endpoint::from_duplex(controller),
    }
}

/// Both channels of a session
#[derive(Debug)]
pub struct StreamPairs {
    /// Front end ↔ controller
    pub front: ChannelPair,
    /// Controller ↔ back end
    pub back: ChannelPair,
}

/// Create the two independent channels a session needs
pub fn stream_pairs(capacity: usize) -> StreamPairs {
    StreamPairs {
        front: channel_pair(capacity),
        back: channel_pair(capacity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_bytes_arrive_in_order() {
        let ChannelPair { module, controller } = channel_pair(64);
        let (_, mut writer) = module.into_parts();
        let (mut reader, _) = controller.into_parts();

        writer.write_all(b"one\ntwo\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_shutdown_signals_eof_but_keeps_reverse_direction() {
        let ChannelPair { module, controller } = channel_pair(64);
        let (mut module_reader, mut module_writer) = module.into_parts();
        let (mut ctl_reader, mut ctl_writer) = controller.into_parts();

        module_writer.shutdown().await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(ctl_reader.read(&mut buf).await.unwrap(), 0);

        ctl_writer.write_all(b"still\n").await.unwrap();
        let n = module_reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"still\n");
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let pairs = stream_pairs(16);
        let (_, mut front_writer) = pairs.front.module.into_parts();
        let (_, mut back_writer) = pairs.back.module.into_parts();

        // Filling one channel must not block the other
        front_writer.write_all(&[b'x'; 16]).await.unwrap();
        tokio::time::timeout(
            std::time::Duration::from_millis(200),
            back_writer.write_all(b"ok\n"),
        )
        .await
        .expect("back channel blocked by front channel")
        .unwrap();
    }
}
