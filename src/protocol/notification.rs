//! Handling of envelopes addressed to the controller.
//!
//! Only `controller_notification` envelopes are inspected. Everything is
//! forwarded by default; a `critical_error` tagged `"controller_only": true`
//! is the single case the controller consumes.

use tracing::{debug, error, info};

use super::envelope::{Envelope, MessageType};

/// Tag marking a notification as meant for the controller only.
pub const CONTROLLER_ONLY_FIELD: &str = "controller_only";

/// `notification_type` values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationType {
    /// The sender hit an unrecoverable error; the session must close
    CriticalError,
    /// Informational status update
    Status,
    /// Anything else
    Other(String),
}

impl NotificationType {
    /// Parse a wire name
    pub fn parse(name: &str) -> Self {
        match name {
            "critical_error" => Self::CriticalError,
            "status" => Self::Status,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::CriticalError => "critical_error",
            Self::Status => "status",
            Self::Other(name) => name,
        }
    }
}

/// What the relay should do with an inspected envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationAction {
    /// Write the envelope to the destination
    pub forward: bool,
    /// Close the whole session once the envelope is dealt with
    pub close_session: bool,
}

impl NotificationAction {
    /// Forward, keep the session
    pub const PASS: Self = Self {
        forward: true,
        close_session: false,
    };
}

/// Stateless inspector for controller notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationHandler;

impl NotificationHandler {
    /// Create a handler
    pub fn new() -> Self {
        Self
    }

    /// Inspect one envelope.
    pub fn handle(&self, envelope: &Envelope) -> NotificationAction {
        if !envelope.is(MessageType::ControllerNotification) {
            return NotificationAction::PASS;
        }

        let kind = NotificationType::parse(envelope.get_str("notification_type").unwrap_or(""));
        let detail = envelope
            .get_str("error")
            .or_else(|| envelope.get_str("message"))
            .unwrap_or("");

        match kind {
            NotificationType::CriticalError => {
                error!(
                    request_id = ?envelope.request_id(),
                    detail,
                    "critical error reported by module, closing session"
                );
                let controller_only = envelope
                    .get(CONTROLLER_ONLY_FIELD)
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                NotificationAction {
                    forward: !controller_only,
                    close_session: true,
                }
            },
            NotificationType::Status => {
                info!(
                    status = envelope.get_str("status").unwrap_or(""),
                    detail, "module status notification"
                );
                NotificationAction::PASS
            },
            NotificationType::Other(name) => {
                debug!(notification_type = %name, "unknown controller notification");
                NotificationAction::PASS
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_envelope_passes() {
        let env = Envelope::text_generation("hi", None);
        assert_eq!(
            NotificationHandler::new().handle(&env),
            NotificationAction::PASS
        );
    }

    #[test]
    fn test_critical_error_forwards_and_closes() {
        let env = Envelope::controller_notification("critical_error").with("error", "oom");
        let action = NotificationHandler::new().handle(&env);
        assert!(action.forward);
        assert!(action.close_session);
    }

    #[test]
    fn test_controller_only_critical_is_consumed() {
        let env = Envelope::controller_notification("critical_error")
            .with(CONTROLLER_ONLY_FIELD, true);
        let action = NotificationHandler::new().handle(&env);
        assert!(!action.forward);
        assert!(action.close_session);
    }

    #[test]
    fn test_status_always_forwarded() {
        let env = Envelope::controller_notification("status")
            .with("status", "warming_up")
            .with(CONTROLLER_ONLY_FIELD, true);
        assert_eq!(
            NotificationHandler::new().handle(&env),
            NotificationAction::PASS
        );
    }

    #[test]
    fn test_unknown_notification_forwarded() {
        let env = Envelope::controller_notification("gc_pause");
        assert_eq!(
            NotificationHandler::new().handle(&env),
            NotificationAction::PASS
        );
        assert_eq!(
            NotificationType::parse("gc_pause"),
            NotificationType::Other("gc_pause".to_string())
        );
    }
}
