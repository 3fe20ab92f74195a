//! Modlink error types.
//!
//! # Error Classification
//!
//! Errors follow the mediator's failure taxonomy:
//!
//! - **Structural**: a malformed envelope is *not* an error. The codec
//!   returns [`Decoded::Raw`](crate::protocol::Decoded::Raw) and the line is
//!   passed through verbatim.
//! - **Compatibility**: [`ModlinkError::Incompatible`] and
//!   [`ModlinkError::Rejected`] are returned synchronously from
//!   [`Controller::start`](crate::controller::Controller::start) and mediation
//!   never begins.
//! - **Transport**: a closed endpoint ends one relay direction. It is logged
//!   inside the relay loop and only surfaces as a [`ModlinkError`] from the
//!   framing helpers.
//! - **Critical**: critical notifications and crashed relay tasks close the
//!   session. They are reported through logs and
//!   [`CloseReason`](crate::controller::CloseReason), never as an error value
//!   escaping to the host.
//! - **Timeout** during bounded reads is a retry signal, not an error.

use thiserror::Error;

/// Modlink errors.
#[derive(Error, Debug)]
pub enum ModlinkError {
    /// The back end lacks one or more required capabilities.
    #[error("Incompatible modules: missing required capabilities: {}", missing.join(", "))]
    Incompatible {
        /// Required capability names the back end does not support.
        missing: Vec<String>,
    },

    /// The back end refused the controller version or the requirement set.
    #[error("Back end rejected the pairing: {0}")]
    Rejected(String),

    /// Endpoint-level failure (closed stream, broken pipe).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A line exceeded the configured frame size.
    #[error("Message exceeds {max_bytes} byte limit")]
    MessageTooLarge {
        /// The configured maximum.
        max_bytes: usize,
    },

    /// Lifecycle misuse (e.g. starting a session twice).
    #[error("Session error: {0}")]
    Session(String),

    /// Unknown module id or duplicate registration.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Modlink operations
pub type Result<T> = std::result::Result<T, ModlinkError>;

impl From<toml::de::Error> for ModlinkError {
    fn from(err: toml::de::Error) -> Self {
        ModlinkError::Config(format!("Failed to parse config: {err}"))
    }
}

impl ModlinkError {
    /// Whether the relay loop may retry after this error.
    ///
    /// Oversized frames and non-fatal I/O hiccups are transient; anything
    /// indicating the peer is gone ends the direction.
    pub fn is_transient(&self) -> bool {
        match self {
            ModlinkError::MessageTooLarge { .. } => true,
            ModlinkError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::InvalidData
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
