//! One relay direction.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{CloseReason, Direction, DirectionState, Disposition, MessageProcessor, ShutdownSignal};
use crate::config::RelayConfig;
use crate::protocol::decode;
use crate::transport::{write_line, BoxedReader, BoxedWriter, LineReader, ReadOutcome};

/// Counters for one direction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Lines written to the destination
    pub forwarded: u64,
    /// Of those, how many were envelopes
    pub envelopes: u64,
    /// Of those, how many were raw pass-through lines
    pub passthrough: u64,
    /// Lines consumed without forwarding
    pub dropped: u64,
    /// Errors that were logged and retried
    pub transient_errors: u64,
    /// Bytes written to the destination
    pub bytes: u64,
}

/// How a pump's loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The source closed
    EndOfStream,
    /// The shared shutdown signal fired
    Cancelled,
    /// A processed line asked to close the session
    SessionClosed,
    /// Reading or writing failed for good
    TransportError(String),
    /// The pump task panicked
    Panicked,
}

/// Final report of one pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Direction of the pump
    pub direction: Direction,
    /// How it ended
    pub end: RelayEnd,
    /// What it moved
    pub stats: RelayStats,
}

/// Moves lines from one endpoint to another until told to stop.
pub struct RelayPump {
    direction: Direction,
    source: LineReader<BoxedReader>,
    sink: BoxedWriter,
    processor: Arc<dyn MessageProcessor>,
    config: RelayConfig,
    signal: ShutdownSignal,
    state: DirectionState,
    stats: RelayStats,
}

impl RelayPump {
    /// Build a pump over owned halves
    pub fn new(
        direction: Direction,
        source: BoxedReader,
        sink: BoxedWriter,
        processor: Arc<dyn MessageProcessor>,
        config: &RelayConfig,
        signal: ShutdownSignal,
    ) -> Self {
        Self {
            direction,
            source: LineReader::new(source, config.max_message_bytes),
            sink,
            processor,
            config: config.clone(),
            signal,
            state: DirectionState::Idle,
            stats: RelayStats::default(),
        }
    }

    /// Direction of this pump
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state
    pub fn state(&self) -> DirectionState {
        self.state
    }

    /// Relay until end-of-stream, shutdown, or a fatal transport error.
    ///
    /// On exit the destination writer is shut down so the module on the
    /// other side sees end-of-stream.
    pub async fn run(mut self) -> RelayOutcome {
        self.state = DirectionState::Relaying;
        debug!(direction = %self.direction, "Relay started");

        let end = self.relay().await;

        self.state = DirectionState::Draining;
        if let Err(e) = self.sink.shutdown().await {
            debug!(direction = %self.direction, error = %e, "Destination already closed");
        }
        self.state = DirectionState::Closed;

        info!(
            direction = %self.direction,
            end = ?end,
            forwarded = self.stats.forwarded,
            dropped = self.stats.dropped,
            transient_errors = self.stats.transient_errors,
            "Relay stopped"
        );

        RelayOutcome {
            direction: self.direction,
            end,
            stats: self.stats,
        }
    }

    async fn relay(&mut self) -> RelayEnd {
        let token = self.signal.token().clone();
        let timeout = self.config.read_timeout();
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                return RelayEnd::Cancelled;
            }

            let read = tokio::select! {
                biased;
                () = token.cancelled() => return RelayEnd::Cancelled,
                read = self.source.read_frame(timeout) => read,
            };

            let line = match read {
                Ok(ReadOutcome::Line(line)) => line,
                Ok(ReadOutcome::TimedOut) => {
                    trace!(direction = %self.direction, "Read timed out");
                    continue;
                },
                Ok(ReadOutcome::Eof) => {
                    debug!(direction = %self.direction, "Source reached end of stream");
                    self.signal.trigger(CloseReason::EndOfStream(self.direction));
                    return RelayEnd::EndOfStream;
                },
                Err(e) if e.is_transient() => {
                    failures += 1;
                    self.stats.transient_errors += 1;
                    warn!(direction = %self.direction, error = %e, attempt = failures, "Read failed, retrying");
                    if pause(self.config.backoff(failures), &token).await {
                        return RelayEnd::Cancelled;
                    }
                    continue;
                },
                Err(e) => {
                    warn!(direction = %self.direction, error = %e, "Read failed");
                    return RelayEnd::TransportError(e.to_string());
                },
            };

            let decoded = decode(&line);
            let raw = decoded.is_raw();
            let processed = match self.processor.process(self.direction, decoded) {
                Ok(processed) => processed,
                Err(e) => {
                    failures += 1;
                    self.stats.transient_errors += 1;
                    warn!(direction = %self.direction, error = %e, attempt = failures, "Processing failed, line skipped");
                    if pause(self.config.backoff(failures), &token).await {
                        return RelayEnd::Cancelled;
                    }
                    continue;
                },
            };
            failures = 0;

            match processed.disposition {
                Disposition::Forward(bytes) => {
                    // Never start a write once shutdown began
                    if token.is_cancelled() {
                        return RelayEnd::Cancelled;
                    }
                    if let Err(e) = write_line(&mut self.sink, &bytes).await {
                        warn!(direction = %self.direction, error = %e, "Write failed");
                        return RelayEnd::TransportError(e.to_string());
                    }
                    self.stats.forwarded += 1;
                    self.stats.bytes += bytes.len() as u64;
                    if raw {
                        self.stats.passthrough += 1;
                    } else {
                        self.stats.envelopes += 1;
                    }
                    trace!(direction = %self.direction, bytes = bytes.len(), raw, "Forwarded");
                },
                Disposition::Drop => {
                    self.stats.dropped += 1;
                    debug!(direction = %self.direction, "Line consumed by controller");
                },
            }

            if let Some(reason) = processed.close {
                info!(direction = %self.direction, reason = %reason, "Session close requested");
                self.signal.trigger(reason);
                return RelayEnd::SessionClosed;
            }
        }
    }
}

/// Sleep before a retry. Returns `true` if shutdown fired meanwhile.
///
/// Must not borrow the pump: its boxed halves are not `Sync`.
async fn pause(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}

impl std::fmt::Debug for RelayPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPump")
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
