//! Relay engine.
//!
//! Two [`RelayPump`]s run per session, one per [`Direction`]. Each owns its
//! source reader and destination writer outright and shares only a
//! [`ShutdownSignal`] with its sibling.
//!
//! ## Direction State Machine
//!
//! ```text
//!  [Idle] ──start──> [Relaying] ──EOF / cancel / close──> [Draining] ──> [Closed]
//!                      │    ▲
//!                      └────┘ line read → process → write + flush
//!                             transient error → backoff → retry
//!                             read timeout → re-check shutdown → retry
//! ```
//!
//! How one line is treated is decided by a [`MessageProcessor`] chosen when
//! the controller is built. [`EnvelopeProcessor`] is the standard one.

mod pump;

pub use pump::{RelayEnd, RelayOutcome, RelayPump, RelayStats};

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::protocol::{Decoded, NotificationHandler, CONTROLLER_VERSION};

/// Which way a pump moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Front end → back end
    FrontToBack,
    /// Back end → front end
    BackToFront,
}

impl Direction {
    /// Only front→back envelopes get the controller stamp
    pub fn stamps(&self) -> bool {
        matches!(self, Self::FrontToBack)
    }

    /// Short label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FrontToBack => "front->back",
            Self::BackToFront => "back->front",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-direction relay state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionState {
    /// Created, not yet reading
    Idle,
    /// Reading and forwarding
    Relaying,
    /// Loop exited, closing the destination
    Draining,
    /// Finished
    Closed,
}

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The source of this direction reached end-of-stream
    EndOfStream(Direction),
    /// A module sent a critical-error notification
    CriticalError(String),
    /// A relay task died unexpectedly
    TaskFailed(Direction),
    /// The host called `close()`
    Requested,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfStream(direction) => write!(f, "end of stream ({direction})"),
            Self::CriticalError(detail) => write!(f, "critical error: {detail}"),
            Self::TaskFailed(direction) => write!(f, "relay task failed ({direction})"),
            Self::Requested => write!(f, "close requested"),
        }
    }
}

/// Session-wide "stop" flag.
///
/// Cloned into both pumps and the controller. The first trigger wins and
/// records its reason; later triggers only re-cancel.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

impl ShutdownSignal {
    /// Fresh, untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` if this call set the reason.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        let first = {
            let mut slot = self.reason.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    /// Whether shutdown was requested
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown is requested
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }

    /// The winning reason, if triggered
    pub fn reason(&self) -> Option<CloseReason> {
        self.reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Underlying cancellation token
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// What to do with one processed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Write these bytes to the destination
    Forward(Vec<u8>),
    /// Consume the line
    Drop,
}

/// Result of [`MessageProcessor::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// Forward or drop
    pub disposition: Disposition,
    /// Close the session after the line is dealt with
    pub close: Option<CloseReason>,
}

impl Processed {
    /// Forward bytes, keep the session
    pub fn forward(bytes: Vec<u8>) -> Self {
        Self {
            disposition: Disposition::Forward(bytes),
            close: None,
        }
    }
}

/// Strategy for handling one relayed line.
///
/// Fixed at controller construction; errors are treated as transient by
/// the pump (logged, backed off, next line).
pub trait MessageProcessor: Send + Sync {
    /// Turn one decoded line into a disposition
    fn process(&self, direction: Direction, decoded: Decoded) -> Result<Processed>;
}

/// Standard processing: stamp front→back envelopes, honor controller
/// notifications, pass everything else through.
#[derive(Debug, Clone)]
pub struct EnvelopeProcessor {
    controller_version: String,
    notifications: NotificationHandler,
}

impl EnvelopeProcessor {
    /// Stamp with the given controller version
    pub fn new(controller_version: &str) -> Self {
        Self {
            controller_version: controller_version.to_string(),
            notifications: NotificationHandler::new(),
        }
    }
}

impl Default for EnvelopeProcessor {
    fn default() -> Self {
        Self::new(CONTROLLER_VERSION)
    }
}

impl MessageProcessor for EnvelopeProcessor {
    fn process(&self, direction: Direction, decoded: Decoded) -> Result<Processed> {
        let mut envelope = match decoded {
            Decoded::Raw(bytes) => return Ok(Processed::forward(bytes)),
            Decoded::Envelope(envelope) => envelope,
        };

        let action = self.notifications.handle(&envelope);
        let close = action.close_session.then(|| {
            CloseReason::CriticalError(
                envelope
                    .get_str("error")
                    .unwrap_or("unspecified critical error")
                    .to_string(),
            )
        });

        if !action.forward {
            return Ok(Processed {
                disposition: Disposition::Drop,
                close,
            });
        }

        if direction.stamps() {
            envelope.stamp(&self.controller_version);
        }

        Ok(Processed {
            disposition: Disposition::Forward(envelope.to_line()?),
            close,
        })
    }
}
