//! Line-delimited envelope codec.
//!
//! An envelope is one JSON object per line. Anything else on the wire (free
//! text, JSON scalars, invalid UTF-8) decodes to [`Decoded::Raw`] and is
//! relayed byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::capabilities::{CapabilityRequirements, CapabilitySupport};
use crate::error::Result;

/// Field the controller appends to front→back envelopes.
pub const CONTROLLER_VERSION_FIELD: &str = "_controller_version";

/// Recognized `message_type` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Prompt from the front end
    TextGeneration,
    /// Generated text from the back end
    GenerationResult,
    /// Capability query
    CompatibilityCheck,
    /// Capability query answer
    CompatibilityResult,
    /// Unsolicited capability advertisement
    Capabilities,
    /// Keep-alive request
    Ping,
    /// Keep-alive response
    Pong,
    /// Request the peer to stop
    Shutdown,
    /// Acknowledges a shutdown request
    ShutdownAck,
    /// Error report
    Error,
    /// Message addressed to the controller itself
    ControllerNotification,
}

impl MessageType {
    /// Wire name of this message type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextGeneration => "text_generation",
            Self::GenerationResult => "generation_result",
            Self::CompatibilityCheck => "compatibility_check",
            Self::CompatibilityResult => "compatibility_result",
            Self::Capabilities => "capabilities",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Shutdown => "shutdown",
            Self::ShutdownAck => "shutdown_ack",
            Self::Error => "error",
            Self::ControllerNotification => "controller_notification",
        }
    }

    /// Parse a wire name. Unknown names return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let ty = match name {
            "text_generation" => Self::TextGeneration,
            "generation_result" => Self::GenerationResult,
            "compatibility_check" => Self::CompatibilityCheck,
            "compatibility_result" => Self::CompatibilityResult,
            "capabilities" => Self::Capabilities,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "shutdown" => Self::Shutdown,
            "shutdown_ack" => Self::ShutdownAck,
            "error" => Self::Error,
            "controller_notification" => Self::ControllerNotification,
            _ => return None,
        };
        Some(ty)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured message: one JSON object.
///
/// Fields are kept in arrival order. The controller only ever adds
/// [`CONTROLLER_VERSION_FIELD`]; semantic fields such as `request_id` are
/// never rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with only `message_type` set
    pub fn new(message_type: MessageType) -> Self {
        let mut fields = Map::new();
        fields.insert(
            "message_type".to_string(),
            Value::String(message_type.as_str().to_string()),
        );
        Self { fields }
    }

    /// Wrap an already-parsed JSON object
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Raw `message_type` string, if present
    pub fn message_type_str(&self) -> Option<&str> {
        self.get_str("message_type")
    }

    /// Parsed `message_type`, if present and recognized
    pub fn message_type(&self) -> Option<MessageType> {
        self.message_type_str().and_then(MessageType::parse)
    }

    /// Whether `message_type` equals `ty`
    pub fn is(&self, ty: MessageType) -> bool {
        self.message_type_str() == Some(ty.as_str())
    }

    /// Field lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Opaque request correlation id
    pub fn request_id(&self) -> Option<&Value> {
        self.fields.get("request_id")
    }

    /// Set a field, returning the previous value
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.to_string(), value.into())
    }

    /// Builder form of [`Envelope::insert`]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Attach `request_id` when one is given
    pub fn with_request_id(mut self, request_id: Option<Value>) -> Self {
        if let Some(id) = request_id {
            self.fields.insert("request_id".to_string(), id);
        }
        self
    }

    /// Append the controller provenance tag.
    pub fn stamp(&mut self, controller_version: &str) {
        self.insert(CONTROLLER_VERSION_FIELD, controller_version);
    }

    /// Whether the provenance tag is present
    pub fn is_stamped(&self) -> bool {
        self.fields.contains_key(CONTROLLER_VERSION_FIELD)
    }

    /// All fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume into the underlying JSON object
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// Serialize to one newline-terminated line
    pub fn to_line(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    // ------------------------------------------------------------------
    // Builders
    // ------------------------------------------------------------------

    /// `text_generation` request
    pub fn text_generation(prompt: &str, request_id: Option<Value>) -> Self {
        Self::new(MessageType::TextGeneration)
            .with("prompt", prompt)
            .with_request_id(request_id)
    }

    /// Successful `generation_result`
    pub fn generation_result(
        original_prompt: &str,
        generated_text: &str,
        request_id: Option<Value>,
    ) -> Self {
        Self::new(MessageType::GenerationResult)
            .with("original_prompt", original_prompt)
            .with("generated_text", generated_text)
            .with("status", "success")
            .with_request_id(request_id)
    }

    /// `compatibility_check` carrying the front end's requirements
    pub fn compatibility_check(
        requirements: &CapabilityRequirements,
        request_id: Option<Value>,
    ) -> Self {
        Self::new(MessageType::CompatibilityCheck)
            .with("capabilities", requirements.to_value())
            .with_request_id(request_id)
    }

    /// `compatibility_result` answer
    pub fn compatibility_result(
        compatible: bool,
        message: &str,
        protocol_version: &str,
        support: &CapabilitySupport,
        request_id: Option<Value>,
    ) -> Self {
        Self::new(MessageType::CompatibilityResult)
            .with("compatible", compatible)
            .with("message", message)
            .with("protocol_version", protocol_version)
            .with("capabilities", support.to_value())
            .with_request_id(request_id)
    }

    /// Unsolicited capability advertisement
    pub fn capabilities(protocol_version: &str, support: &CapabilitySupport) -> Self {
        Self::new(MessageType::Capabilities)
            .with("protocol_version", protocol_version)
            .with("capabilities", support.to_value())
    }

    /// `ping`
    pub fn ping(request_id: Option<Value>) -> Self {
        Self::new(MessageType::Ping).with_request_id(request_id)
    }

    /// `pong`
    pub fn pong(request_id: Option<Value>) -> Self {
        Self::new(MessageType::Pong)
            .with("status", "alive")
            .with_request_id(request_id)
    }

    /// `shutdown`
    pub fn shutdown(request_id: Option<Value>) -> Self {
        Self::new(MessageType::Shutdown).with_request_id(request_id)
    }

    /// `shutdown_ack`
    pub fn shutdown_ack(request_id: Option<Value>) -> Self {
        Self::new(MessageType::ShutdownAck)
            .with("status", "shutting_down")
            .with_request_id(request_id)
    }

    /// `error` report
    pub fn error(error: &str, source: &str, is_critical: bool, request_id: Option<Value>) -> Self {
        Self::new(MessageType::Error)
            .with("error", error)
            .with("source", source)
            .with("is_critical", is_critical)
            .with("status", "error")
            .with_request_id(request_id)
    }

    /// `controller_notification` of the given kind
    pub fn controller_notification(notification_type: &str) -> Self {
        Self::new(MessageType::ControllerNotification).with("notification_type", notification_type)
    }
}

/// Result of decoding one line
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A JSON object
    Envelope(Envelope),
    /// Anything else, with the original bytes untouched
    Raw(Vec<u8>),
}

impl Decoded {
    /// Whether this is a pass-through line
    pub fn is_raw(&self) -> bool {
        matches!(self, Decoded::Raw(_))
    }
}

/// Decode one line (with or without its trailing newline).
///
/// Never fails: non-objects come back as [`Decoded::Raw`] holding exactly
/// the bytes that were passed in.
pub fn decode(line: &[u8]) -> Decoded {
    let body = trim_line_ending(line);
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Decoded::Envelope(Envelope::from_map(fields)),
        _ => Decoded::Raw(line.to_vec()),
    }
}

/// Encode an envelope as a single newline-terminated line.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(b'\n');
    Ok(line)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_envelope() {
        let decoded = decode(b"{\"message_type\":\"ping\",\"request_id\":\"r1\"}\n");
        let Decoded::Envelope(env) = decoded else {
            panic!("expected envelope");
        };
        assert_eq!(env.message_type(), Some(MessageType::Ping));
        assert_eq!(env.request_id(), Some(&json!("r1")));
    }

    #[test]
    fn test_free_text_is_raw() {
        let line = b"hello there\n".to_vec();
        assert_eq!(decode(&line), Decoded::Raw(line.clone()));
    }

    #[test]
    fn test_json_scalar_is_raw() {
        assert!(decode(b"42\n").is_raw());
        assert!(decode(b"\"quoted\"\n").is_raw());
        assert!(decode(b"[1,2]\n").is_raw());
    }

    #[test]
    fn test_invalid_utf8_is_raw() {
        let line = vec![0xff, 0xfe, b'{', b'\n'];
        assert_eq!(decode(&line), Decoded::Raw(line.clone()));
    }

    #[test]
    fn test_crlf_envelope() {
        assert!(!decode(b"{\"message_type\":\"pong\"}\r\n").is_raw());
    }

    #[test]
    fn test_reencode_preserves_content_and_order() {
        let line = br#"{"message_type":"text_generation","prompt":"hi","request_id":7,"extra":{"a":[1,2]}}"#;
        let Decoded::Envelope(env) = decode(line) else {
            panic!("expected envelope");
        };
        let encoded = encode(&env).unwrap();
        assert_eq!(&encoded[..encoded.len() - 1], &line[..]);
        assert_eq!(encoded.last(), Some(&b'\n'));
    }

    #[test]
    fn test_stamp() {
        let mut env = Envelope::text_generation("hi", Some(json!("r1")));
        assert!(!env.is_stamped());
        env.stamp("1.0.0");
        assert!(env.is_stamped());
        assert_eq!(env.get_str(CONTROLLER_VERSION_FIELD), Some("1.0.0"));
        assert_eq!(env.get_str("prompt"), Some("hi"));
    }

    #[test]
    fn test_builders_omit_absent_request_id() {
        let env = Envelope::pong(None);
        assert!(env.request_id().is_none());
        assert_eq!(env.get_str("status"), Some("alive"));

        let env = Envelope::error("boom", "model", true, Some(json!(3)));
        assert_eq!(env.get("is_critical"), Some(&json!(true)));
        assert_eq!(env.request_id(), Some(&json!(3)));
    }

    #[test]
    fn test_unknown_message_type() {
        let Decoded::Envelope(env) = decode(br#"{"message_type":"telemetry"}"#) else {
            panic!("expected envelope");
        };
        assert_eq!(env.message_type(), None);
        assert_eq!(env.message_type_str(), Some("telemetry"));
    }

    #[test]
    fn test_message_type_names_roundtrip() {
        for ty in [
            MessageType::TextGeneration,
            MessageType::GenerationResult,
            MessageType::CompatibilityCheck,
            MessageType::CompatibilityResult,
            MessageType::Capabilities,
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Shutdown,
            MessageType::ShutdownAck,
            MessageType::Error,
            MessageType::ControllerNotification,
        ] {
            assert_eq!(MessageType::parse(ty.as_str()), Some(ty));
            assert_eq!(serde_json::to_value(ty).unwrap(), json!(ty.as_str()));
        }
    }

    #[test]
    fn test_reencode_keeps_numbers_exact() {
        let line = br#"{"request_id":123456789012345678901234567890,"temperature":0.1000000000000000055511151231257827,"n":-7}"#;
        let Decoded::Envelope(env) = decode(line) else {
            panic!("expected envelope");
        };
        let mut expected = line.to_vec();
        expected.push(b'\n');
        assert_eq!(encode(&env).unwrap(), expected);
    }
}
