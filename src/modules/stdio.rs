//! Line-oriented terminal front end.
//!
//! Each user line becomes a `text_generation` request with a fresh
//! `request_id`. `exit` or `quit` (or end of input) ends the session.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::FrontEnd;
use crate::error::Result;
use crate::protocol::{decode, CapabilityRequirements, Decoded, Envelope, MessageType};
use crate::transport::{write_line, BoxedReader, BoxedWriter, LineReader};

const MAX_LINE_BYTES: usize = 1024 * 1024;
const PRINT_GRACE: Duration = Duration::from_millis(200);

/// Front end driven by a user's terminal (or any pair of byte streams)
pub struct StdioInterface {
    input: Option<BoxedReader>,
    output: Option<BoxedWriter>,
    prompt_input: Option<JoinHandle<()>>,
    print_output: Option<JoinHandle<()>>,
}

impl StdioInterface {
    /// Registry id
    pub const ID: &'static str = "stdio";

    /// Read the process's stdin, write to its stdout
    pub fn new() -> Self {
        Self::with_io(Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))
    }

    /// Use arbitrary user-facing streams
    pub fn with_io(input: BoxedReader, output: BoxedWriter) -> Self {
        Self {
            input: Some(input),
            output: Some(output),
            prompt_input: None,
            print_output: None,
        }
    }
}

impl Default for StdioInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StdioInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioInterface")
            .field("running", &self.prompt_input.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FrontEnd for StdioInterface {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn capabilities(&mut self) -> Option<CapabilityRequirements> {
        Some(CapabilityRequirements::new(["text_io"], ["structured_output"]))
    }

    fn set_streams(&mut self, reader: BoxedReader, writer: BoxedWriter) {
        let (Some(input), Some(output)) = (self.input.take(), self.output.take()) else {
            warn!("Stdio interface already attached, streams ignored");
            return;
        };
        self.prompt_input = Some(tokio::spawn(forward_user_lines(input, writer)));
        self.print_output = Some(tokio::spawn(print_replies(reader, output)));
    }

    async fn close(&mut self) {
        if let Some(task) = self.prompt_input.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(mut task) = self.print_output.take() {
            // Replies already in flight are still printed
            if tokio::time::timeout(PRINT_GRACE, &mut task).await.is_err() {
                debug!("Stdio output task did not finish in time");
                task.abort();
            }
        }
    }
}

fn is_exit_command(line: &str) -> bool {
    matches!(line.to_ascii_lowercase().as_str(), "exit" | "quit")
}

async fn forward_user_lines(input: BoxedReader, mut writer: BoxedWriter) {
    let mut lines = LineReader::new(input, MAX_LINE_BYTES);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Input line skipped");
                continue;
            },
            Err(e) => {
                warn!(error = %e, "Input read failed");
                break;
            },
        };

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if is_exit_command(text) {
            info!("User ended the session");
            break;
        }

        let request_id = Uuid::new_v4().to_string();
        let request = Envelope::text_generation(text, Some(request_id.clone().into()));
        if let Err(e) = send(&mut writer, &request).await {
            warn!(error = %e, "Request could not be sent");
            break;
        }
        debug!(request_id = %request_id, "Request sent");
    }

    let _ = writer.shutdown().await;
}

async fn send(writer: &mut BoxedWriter, envelope: &Envelope) -> Result<()> {
    write_line(writer, &envelope.to_line()?).await
}

/// Human-readable form of one reply line, `None` for lines not shown
fn render(line: &[u8]) -> Option<String> {
    let envelope = match decode(line) {
        Decoded::Envelope(env) => env,
        Decoded::Raw(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            return Some(text.trim_end().to_string());
        },
    };

    match envelope.message_type() {
        Some(MessageType::GenerationResult) => envelope.get_str("generated_text").map(str::to_string),
        Some(MessageType::Error) => Some(format!(
            "Error: {}",
            envelope.get_str("error").unwrap_or("unknown error")
        )),
        Some(MessageType::ControllerNotification) => Some(format!(
            "[controller] {}",
            envelope.get_str("notification_type").unwrap_or("notification")
        )),
        Some(MessageType::ShutdownAck) => Some("[model shutting down]".to_string()),
        _ => {
            debug!(message_type = ?envelope.message_type_str(), "Reply not shown");
            None
        },
    }
}

async fn print_replies(reader: BoxedReader, output: BoxedWriter) {
    let mut lines = LineReader::new(reader, MAX_LINE_BYTES);
    let mut out = BufWriter::new(output);
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Reply skipped");
                continue;
            },
            Err(e) => {
                warn!(error = %e, "Reply read failed");
                break;
            },
        };
        let Some(text) = render(&line) else {
            continue;
        };
        if let Err(e) = write_line(&mut out, text.as_bytes()).await {
            warn!(error = %e, "Could not print reply");
            break;
        }
    }
    let _ = out.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_pair;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_exit_commands() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("QUIT"));
        assert!(!is_exit_command("exit now"));
    }

    #[test]
    fn test_render() {
        let result = Envelope::generation_result("hi", "hi there", None)
            .to_line()
            .unwrap();
        assert_eq!(render(&result).as_deref(), Some("hi there"));

        let err = Envelope::error("boom", "model", false, None).to_line().unwrap();
        assert_eq!(render(&err).as_deref(), Some("Error: boom"));

        assert_eq!(render(b"free text\n").as_deref(), Some("free text"));
        assert_eq!(render(&Envelope::pong(None).to_line().unwrap()), None);
    }

    #[tokio::test]
    async fn test_user_lines_become_requests() {
        let user = channel_pair(1024);
        let session = channel_pair(1024);
        let (_, mut typing) = user.controller.into_parts();
        let (user_input, _) = user.module.into_parts();
        let (module_reader, module_writer) = session.module.into_parts();
        let (mut requests, _keep) = session.controller.into_parts();

        let (screen_writer, _screen) = tokio::io::duplex(1024);
        let mut interface = StdioInterface::with_io(user_input, Box::new(screen_writer));
        interface.set_streams(module_reader, module_writer);

        typing.write_all(b"hello\n\nquit\nignored\n").await.unwrap();

        let mut out = Vec::new();
        requests.read_to_end(&mut out).await.unwrap();
        let sent: Vec<Envelope> = out
            .split_inclusive(|&b| b == b'\n')
            .map(|line| match decode(line) {
                Decoded::Envelope(env) => env,
                Decoded::Raw(_) => panic!("expected envelope"),
            })
            .collect();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is(MessageType::TextGeneration));
        assert_eq!(sent[0].get_str("prompt"), Some("hello"));
        assert!(sent[0].get_str("request_id").is_some());

        interface.close().await;
    }
}
