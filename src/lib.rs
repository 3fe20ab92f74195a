//! # Modlink - Capability-Negotiating Message Relay
//!
//! Mediates newline-delimited JSON traffic between a text front end (an
//! interface that collects prompts and renders results) and a text
//! generation back end (a model), neither of which knows about the other.
//!
//! ## Features
//!
//! - **Capability negotiation**: one-shot `Compatible` / `PartiallyCompatible`
//!   / `Incompatible` verdict before any relay starts
//! - **Independent channels**: two in-process duplex pipes, one owner per half
//! - **Envelope stamping**: front→back envelopes carry `_controller_version`
//! - **Pass-through**: non-JSON lines are relayed byte-for-byte
//! - **Coordinated shutdown**: EOF, critical notifications and task panics
//!   all close the session through one cancellation token
//!
//! ## Architecture
//!
//! ```text
//! Front end                       Controller                        Back end
//!    |                                |                                 |
//!    |<========= front channel ======>|<========= back channel ========>|
//!    |                                |                                 |
//!    |-- text_generation ------------>| pump: front → back              |
//!    |                                |   decode, stamp, encode ------->|
//!    |                                |                                 |
//!    |<------------------------------ | pump: back → front              |
//!    |          generation_result     |   decode, inspect, encode <-----|
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modlink::{Config, Controller, EchoModel, StdioInterface};
//!
//! # async fn run() -> modlink::Result<()> {
//! let mut controller = Controller::new(Config::load(None)?);
//! let verdict = controller
//!     .connect(Box::new(StdioInterface::new()), Box::new(EchoModel::new()))
//!     .await?;
//! println!("negotiated: {verdict}");
//!
//! controller.start()?;
//! controller.wait().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Negotiation
//!
//! ```rust
//! use modlink::{negotiate, CapabilityRequirements, CapabilitySupport, CompatibilityVerdict};
//!
//! let requirements = CapabilityRequirements::new(["text_io", "vision"], ["structured_output"]);
//! let support = CapabilitySupport::new().with("text_io", true);
//!
//! assert_eq!(
//!     negotiate(Some(&requirements), &support),
//!     CompatibilityVerdict::Incompatible(vec!["vision".to_string()])
//! );
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod modules;
pub mod protocol;
pub mod relay;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use controller::{CloseReason, Controller, SessionState};
pub use error::{ModlinkError, Result};
pub use modules::{BackEnd, EchoModel, FrontEnd, ModuleRegistry, StdioInterface};
pub use protocol::{
    decode, encode, negotiate, CapabilityRequirements, CapabilitySupport, CompatibilityVerdict,
    Decoded, Envelope, MessageType, CONTROLLER_VERSION,
};
pub use relay::{Direction, EnvelopeProcessor, MessageProcessor, RelayOutcome, RelayStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
