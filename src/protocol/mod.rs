//! Modlink wire protocol.
//!
//! Front end and back end speak newline-delimited JSON envelopes. The
//! controller sits between them and only ever inspects, stamps, or passes
//! lines through.
//!
//! ## Message Flow
//!
//! ```text
//! Front end                       Controller                        Back end
//!    |                                |                                 |
//!    |-- text_generation ------------>|-- text_generation ------------->|
//!    |                                |   (+ _controller_version)       |
//!    |<-- generation_result ----------|<-- generation_result -----------|
//!    |                                |                                 |
//!    |                                |<-- controller_notification -----|
//!    |<-- (unless controller_only) ---|   (critical_error → close)      |
//!    |                                |                                 |
//!    |-- free text ------------------>|-- free text (verbatim) -------->|
//! ```
//!
//! ## Message Types
//!
//! | Type                      | Fields                                              |
//! |---------------------------|-----------------------------------------------------|
//! | `text_generation`         | `prompt`, `request_id`                              |
//! | `generation_result`       | `original_prompt`, `generated_text`, `status`, `request_id` |
//! | `compatibility_check`     | `capabilities`, `request_id`                        |
//! | `compatibility_result`    | `compatible`, `message`, `protocol_version`, `capabilities` |
//! | `ping` / `pong`           | `request_id`, `status`                              |
//! | `shutdown` / `shutdown_ack` | `request_id`, `status`                            |
//! | `error`                   | `error`, `source`, `is_critical`, `request_id`      |
//! | `controller_notification` | `notification_type`, payload                        |
//!
//! `request_id` is opaque and always travels unchanged.

mod capabilities;
mod envelope;
mod notification;

pub use capabilities::{
    negotiate, versions_compatible, CapabilityRequirements, CapabilitySupport,
    CompatibilityVerdict,
};
pub use envelope::{decode, encode, Decoded, Envelope, MessageType, CONTROLLER_VERSION_FIELD};
pub use notification::{
    NotificationAction, NotificationHandler, NotificationType, CONTROLLER_ONLY_FIELD,
};

/// Version the controller stamps onto front→back envelopes
pub const CONTROLLER_VERSION: &str = "1.0.0";
