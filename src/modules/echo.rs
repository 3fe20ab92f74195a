//! Echo back end.
//!
//! Answers every `text_generation` with the prompt plus a configurable
//! suffix. Handy as a default model and as a fixture in tests.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::BackEnd;
use crate::error::Result;
use crate::protocol::{
    decode, negotiate, versions_compatible, CapabilityRequirements, CapabilitySupport,
    CompatibilityVerdict, Decoded, Envelope, MessageType,
};
use crate::transport::{write_line, BoxedReader, BoxedWriter, LineReader};

/// Protocol version spoken by [`EchoModel`]
pub const PROTOCOL_VERSION: &str = "1.0.0";

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Back end that echoes prompts
pub struct EchoModel {
    support: CapabilitySupport,
    suffix: String,
    advertise: bool,
    task: Option<JoinHandle<()>>,
}

impl EchoModel {
    /// Registry id
    pub const ID: &'static str = "echo";

    /// Echo with no suffix
    pub fn new() -> Self {
        Self {
            support: CapabilitySupport::new()
                .with("text_io", true)
                .with("structured_output", false)
                .with("language_understanding", true),
            suffix: String::new(),
            advertise: false,
            task: None,
        }
    }

    /// Append `suffix` to every generated text
    pub fn with_suffix(mut self, suffix: &str) -> Self {
        self.suffix = suffix.to_string();
        self
    }

    /// Send a `capabilities` envelope as soon as streams arrive
    pub fn with_advertisement(mut self, advertise: bool) -> Self {
        self.advertise = advertise;
        self
    }

    /// Replace the advertised support map
    pub fn with_capabilities(mut self, support: CapabilitySupport) -> Self {
        self.support = support;
        self
    }
}

impl Default for EchoModel {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EchoModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoModel")
            .field("suffix", &self.suffix)
            .field("advertise", &self.advertise)
            .field("serving", &self.task.is_some())
            .finish()
    }
}

#[async_trait]
impl BackEnd for EchoModel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn capabilities(&self) -> CapabilitySupport {
        self.support.clone()
    }

    async fn verify_controller_compatibility(&mut self, controller_version: &str) -> (bool, String) {
        if versions_compatible(PROTOCOL_VERSION, controller_version) {
            (true, "Compatible with controller".to_string())
        } else {
            (
                false,
                format!(
                    "Incompatible controller version: {controller_version}, requires {PROTOCOL_VERSION}"
                ),
            )
        }
    }

    async fn check_compatibility(&mut self, requirements: &CapabilityRequirements) -> (bool, String) {
        evaluate(&self.support, requirements)
    }

    fn set_streams(&mut self, reader: BoxedReader, writer: BoxedWriter) {
        let responder = Responder {
            support: self.support.clone(),
            suffix: self.suffix.clone(),
        };
        let advertise = self.advertise;
        if let Some(previous) = self.task.take() {
            previous.abort();
        }
        self.task = Some(tokio::spawn(serve(reader, writer, responder, advertise)));
    }

    async fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

fn evaluate(support: &CapabilitySupport, requirements: &CapabilityRequirements) -> (bool, String) {
    if requirements.is_empty() {
        return (true, "No capability requirements specified".to_string());
    }
    match negotiate(Some(requirements), support) {
        CompatibilityVerdict::Compatible => (true, "Fully compatible".to_string()),
        CompatibilityVerdict::PartiallyCompatible(missing) => (
            true,
            format!(
                "Compatible, but missing optional capabilities: {}",
                missing.join(", ")
            ),
        ),
        CompatibilityVerdict::Incompatible(missing) => (
            false,
            format!("Required capabilities not supported: {}", missing.join(", ")),
        ),
    }
}

/// Per-line request handling
struct Responder {
    support: CapabilitySupport,
    suffix: String,
}

/// What to send back, and whether to stop afterwards
struct Reply {
    envelope: Envelope,
    stop: bool,
}

impl Reply {
    fn send(envelope: Envelope) -> Self {
        Self {
            envelope,
            stop: false,
        }
    }
}

impl Responder {
    fn respond(&self, line: &[u8]) -> Option<Reply> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        let request = match decode(line) {
            Decoded::Envelope(env) => env,
            Decoded::Raw(_) => {
                warn!("Echo model received invalid JSON");
                return Some(Reply::send(model_error("Invalid JSON format", None)));
            },
        };
        let request_id = request.request_id().cloned();

        // Untyped envelopes are generation requests
        let message_type = request
            .message_type_str()
            .unwrap_or(MessageType::TextGeneration.as_str());

        match MessageType::parse(message_type) {
            Some(MessageType::TextGeneration) => Some(Reply::send(self.generate(&request, request_id))),
            Some(MessageType::CompatibilityCheck) => {
                let requirements = request
                    .get("capabilities")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<CapabilityRequirements>(v).ok())
                    .unwrap_or_default();
                let (compatible, message) = evaluate(&self.support, &requirements);
                Some(Reply::send(Envelope::compatibility_result(
                    compatible,
                    &message,
                    PROTOCOL_VERSION,
                    &self.support,
                    request_id,
                )))
            },
            Some(MessageType::Ping) => Some(Reply::send(Envelope::pong(request_id))),
            Some(MessageType::Shutdown) => Some(Reply {
                envelope: Envelope::shutdown_ack(request_id),
                stop: true,
            }),
            _ => {
                warn!(message_type, "Echo model received unknown message type");
                Some(Reply::send(model_error(
                    &format!("Unknown message type: {message_type}"),
                    request_id,
                )))
            },
        }
    }

    fn generate(&self, request: &Envelope, request_id: Option<Value>) -> Envelope {
        let prompt = match request.get("prompt") {
            Some(Value::String(prompt)) => prompt.clone(),
            Some(other) => other.to_string(),
            None => return model_error("Missing 'prompt' field", request_id),
        };
        debug!(request_id = ?request_id, "Echoing prompt");
        let generated = format!("{prompt}{}", self.suffix);
        Envelope::generation_result(&prompt, &generated, request_id)
    }
}

fn model_error(message: &str, request_id: Option<Value>) -> Envelope {
    Envelope::error(message, "model", false, request_id)
}

async fn send(writer: &mut BoxedWriter, envelope: &Envelope) -> Result<()> {
    write_line(writer, &envelope.to_line()?).await
}

async fn serve(reader: BoxedReader, mut writer: BoxedWriter, responder: Responder, advertise: bool) {
    let mut lines = LineReader::new(reader, MAX_REQUEST_BYTES);

    if advertise {
        let envelope = Envelope::capabilities(PROTOCOL_VERSION, &responder.support);
        if let Err(e) = send(&mut writer, &envelope).await {
            warn!(error = %e, "Echo model could not advertise capabilities");
        }
    }

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Echo model skipped a request");
                if send(&mut writer, &model_error(&e.to_string(), None)).await.is_err() {
                    break;
                }
                continue;
            },
            Err(e) => {
                warn!(error = %e, "Echo model read failed");
                break;
            },
        };

        let Some(reply) = responder.respond(&line) else {
            continue;
        };
        if let Err(e) = send(&mut writer, &reply.envelope).await {
            warn!(error = %e, "Echo model write failed");
            break;
        }
        if reply.stop {
            info!("Echo model shutting down on request");
            break;
        }
    }

    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_pair;
    use tokio::io::AsyncReadExt;

    fn responder() -> Responder {
        Responder {
            support: EchoModel::new().capabilities(),
            suffix: " there".to_string(),
        }
    }

    fn reply(line: &str) -> Envelope {
        responder().respond(line.as_bytes()).unwrap().envelope
    }

    #[test]
    fn test_generation_keeps_request_id() {
        let out = reply(r#"{"message_type":"text_generation","prompt":"hi","request_id":"r1"}"#);
        assert!(out.is(MessageType::GenerationResult));
        assert_eq!(out.get_str("generated_text"), Some("hi there"));
        assert_eq!(out.get_str("original_prompt"), Some("hi"));
        assert_eq!(out.get_str("request_id"), Some("r1"));
    }

    #[test]
    fn test_untyped_envelope_is_generation() {
        let out = reply(r#"{"prompt":"yo"}"#);
        assert_eq!(out.get_str("generated_text"), Some("yo there"));
    }

    #[test]
    fn test_missing_prompt_is_error() {
        let out = reply(r#"{"message_type":"text_generation","request_id":7}"#);
        assert!(out.is(MessageType::Error));
        assert_eq!(out.get_str("error"), Some("Missing 'prompt' field"));
        assert_eq!(out.request_id(), Some(&Value::from(7)));
    }

    #[test]
    fn test_invalid_json_and_unknown_type() {
        assert_eq!(reply("not json").get_str("error"), Some("Invalid JSON format"));
        assert_eq!(
            reply(r#"{"message_type":"dance"}"#).get_str("error"),
            Some("Unknown message type: dance")
        );
        assert!(responder().respond(b"  \n").is_none());
    }

    #[test]
    fn test_compatibility_check() {
        let out = reply(
            r#"{"message_type":"compatibility_check","capabilities":{"required_capabilities":["vision"]}}"#,
        );
        assert_eq!(out.get("compatible"), Some(&Value::Bool(false)));
        assert_eq!(out.get_str("protocol_version"), Some(PROTOCOL_VERSION));
    }

    #[test]
    fn test_shutdown_stops() {
        let out = responder()
            .respond(br#"{"message_type":"shutdown","request_id":"s"}"#)
            .unwrap();
        assert!(out.stop);
        assert_eq!(out.envelope.get_str("status"), Some("shutting_down"));
    }

    #[tokio::test]
    async fn test_controller_version_check() {
        let mut model = EchoModel::new();
        assert!(model.verify_controller_compatibility("1.4.2").await.0);
        assert!(!model.verify_controller_compatibility("2.0.0").await.0);
    }

    #[tokio::test]
    async fn test_serves_over_streams() {
        let pair = channel_pair(1024);
        let (module_reader, module_writer) = pair.module.into_parts();
        let (mut reader, mut writer) = pair.controller.into_parts();

        let mut model = EchoModel::new().with_advertisement(true);
        model.set_streams(module_reader, module_writer);

        write_line(&mut writer, &Envelope::ping(Some("p".into())).to_line().unwrap())
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        let lines: Vec<Envelope> = out
            .split_inclusive(|&b| b == b'\n')
            .map(|line| match decode(line) {
                Decoded::Envelope(env) => env,
                Decoded::Raw(_) => panic!("expected envelope"),
            })
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is(MessageType::Capabilities));
        assert!(lines[1].is(MessageType::Pong));

        model.close().await;
    }
}
