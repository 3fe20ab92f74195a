//! Shared fixtures for end-to-end tests.
//!
//! `PipeInterface` and `PipeModel` hand their session streams back to the
//! test, so the test can play either side of the relay directly.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modlink::protocol::{CapabilityRequirements, CapabilitySupport};
use modlink::transport::{write_line, BoxedReader, BoxedWriter, LineReader};
use modlink::{BackEnd, FrontEnd};

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(2);

/// Where a pipe module parks the streams it was given
#[derive(Clone, Default)]
pub struct StreamSlot(Arc<Mutex<Option<(BoxedReader, BoxedWriter)>>>);

impl StreamSlot {
    /// Take the streams as a line reader plus a writer
    pub fn take(&self) -> (LineReader<BoxedReader>, BoxedWriter) {
        let (reader, writer) = self
            .0
            .lock()
            .unwrap()
            .take()
            .expect("streams were not set");
        (LineReader::new(reader, 1024 * 1024), writer)
    }

    /// Whether no streams were handed over
    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_none()
    }

    fn put(&self, reader: BoxedReader, writer: BoxedWriter) {
        *self.0.lock().unwrap() = Some((reader, writer));
    }
}

/// Front end that declares requirements and exposes its streams
pub struct PipeInterface {
    requirements: Option<CapabilityRequirements>,
    slot: StreamSlot,
}

impl PipeInterface {
    pub fn new(requirements: Option<CapabilityRequirements>) -> (Self, StreamSlot) {
        let slot = StreamSlot::default();
        (
            Self {
                requirements,
                slot: slot.clone(),
            },
            slot,
        )
    }

    /// Requires `text_io`, nothing optional
    pub fn text() -> (Self, StreamSlot) {
        Self::new(Some(CapabilityRequirements::new(
            ["text_io"],
            Vec::<String>::new(),
        )))
    }
}

#[async_trait]
impl FrontEnd for PipeInterface {
    fn id(&self) -> &str {
        "pipe"
    }

    async fn capabilities(&mut self) -> Option<CapabilityRequirements> {
        self.requirements.clone()
    }

    fn set_streams(&mut self, reader: BoxedReader, writer: BoxedWriter) {
        self.slot.put(reader, writer);
    }
}

/// Back end with a fixed support map that exposes its streams
pub struct PipeModel {
    support: CapabilitySupport,
    accept_version: bool,
    accept_requirements: bool,
    slot: StreamSlot,
    closed: Arc<AtomicBool>,
}

impl PipeModel {
    pub fn new(support: CapabilitySupport) -> (Self, StreamSlot) {
        let slot = StreamSlot::default();
        (
            Self {
                support,
                accept_version: true,
                accept_requirements: true,
                slot: slot.clone(),
                closed: Arc::new(AtomicBool::new(false)),
            },
            slot,
        )
    }

    /// Supports `text_io`
    pub fn text() -> (Self, StreamSlot) {
        Self::new(CapabilitySupport::new().with("text_io", true))
    }

    pub fn refusing_version(mut self) -> Self {
        self.accept_version = false;
        self
    }

    pub fn refusing_requirements(mut self) -> Self {
        self.accept_requirements = false;
        self
    }

    /// Flag set once `close()` ran
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[async_trait]
impl BackEnd for PipeModel {
    fn id(&self) -> &str {
        "pipe"
    }

    fn capabilities(&self) -> CapabilitySupport {
        self.support.clone()
    }

    async fn verify_controller_compatibility(&mut self, controller_version: &str) -> (bool, String) {
        if self.accept_version {
            (true, "ok".to_string())
        } else {
            (false, format!("controller {controller_version} not supported"))
        }
    }

    async fn check_compatibility(&mut self, _requirements: &CapabilityRequirements) -> (bool, String) {
        if self.accept_requirements {
            (true, "ok".to_string())
        } else {
            (false, "requirements refused".to_string())
        }
    }

    fn set_streams(&mut self, reader: BoxedReader, writer: BoxedWriter) {
        self.slot.put(reader, writer);
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Next line within [`WAIT`], `None` at end-of-stream
pub async fn next_line(lines: &mut LineReader<BoxedReader>) -> Option<Vec<u8>> {
    tokio::time::timeout(WAIT, lines.next_line())
        .await
        .expect("timed out waiting for a line")
        .expect("read failed")
}

/// Write one line
pub async fn send(writer: &mut BoxedWriter, line: &[u8]) {
    write_line(writer, line).await.expect("write failed");
}
