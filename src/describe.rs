//! Scene descriptions from a hosted vision-language model.
//!
//! The model is a black box behind `VisionDescriber`. The production client
//! speaks the OpenAI-compatible chat-completions protocol: one system
//! instruction, one user text prompt and one JPEG as a base64 data URI.
//!
//! Requests never run on the mode loop. `PendingDescription` moves each call
//! onto its own thread so the loop can keep polling for quit while waiting.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ServiceError;
use crate::frame::jpeg_data_uri;

pub const DEFAULT_ENDPOINT: &str = "https://api.together.xyz/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-Vision-Free";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are assisting a visually impaired individual. Provide clear, concise and helpful answers.";

pub const OBSTACLE_PROMPT: &str = "What is the obstacle ahead? Answer in a short sentence.";
pub const SCENE_PROMPT: &str = "Describe what's in this scene briefly but informatively.";

/// One description request: a prompt plus the JPEG it is about.
#[derive(Clone, Debug)]
pub struct DescriptionRequest {
    pub prompt: String,
    pub image_jpeg: Vec<u8>,
}

/// External description service.
pub trait VisionDescriber: Send + Sync {
    fn describe(&self, request: &DescriptionRequest) -> Result<String, ServiceError>;
}

/// Text before the first '.', trimmed. Falls back to the whole text.
pub fn first_sentence(text: &str) -> &str {
    let head = text.split('.').next().unwrap_or(text).trim();
    if head.is_empty() {
        text.trim()
    } else {
        head
    }
}

// ----------------------------------------------------------------------------
// Chat-completions client
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ChatCompletionsConfig {
    pub endpoint: String,
    pub model: String,
    pub system_prompt: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ChatCompletionsConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct ChatCompletionsDescriber {
    config: ChatCompletionsConfig,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: MessageContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent<'a> {
    Text(&'a str),
    Parts(Vec<ContentPart<'a>>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl ChatCompletionsDescriber {
    pub fn new(config: ChatCompletionsConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    fn request_body(&self, request: &DescriptionRequest) -> Result<String, ServiceError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(&self.config.system_prompt),
                },
                ChatMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: &request.prompt,
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: jpeg_data_uri(&request.image_jpeg),
                            },
                        },
                    ]),
                },
            ],
        };
        serde_json::to_string(&body)
            .map_err(|err| ServiceError::Transport(format!("encode request: {}", err)))
    }

    fn classify(&self, err: ureq::Error) -> ServiceError {
        match err {
            ureq::Error::Status(code, response) => ServiceError::Transport(format!(
                "http status {} {}",
                code,
                response.status_text()
            )),
            ureq::Error::Transport(transport) => {
                let timed_out = std::error::Error::source(&transport)
                    .and_then(|source| source.downcast_ref::<std::io::Error>())
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::TimedOut);
                if timed_out {
                    ServiceError::Timeout(self.config.timeout)
                } else {
                    ServiceError::Transport(transport.to_string())
                }
            }
        }
    }
}

impl VisionDescriber for ChatCompletionsDescriber {
    fn describe(&self, request: &DescriptionRequest) -> Result<String, ServiceError> {
        let body = self.request_body(request)?;
        let mut call = self
            .agent
            .post(&self.config.endpoint)
            .set("Content-Type", "application/json");
        if let Some(key) = &self.config.api_key {
            call = call.set("Authorization", &format!("Bearer {}", key));
        }
        let response = call.send_string(&body).map_err(|err| self.classify(err))?;
        let raw = response.into_string().map_err(|err| {
            if err.kind() == std::io::ErrorKind::TimedOut {
                ServiceError::Timeout(self.config.timeout)
            } else {
                ServiceError::Transport(format!("read response: {}", err))
            }
        })?;
        parse_reply(&raw)
    }
}

fn parse_reply(raw: &str) -> Result<String, ServiceError> {
    let parsed: ChatResponse = serde_json::from_str(raw).map_err(|_| ServiceError::EmptyResponse)?;
    let text = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        return Err(ServiceError::EmptyResponse);
    }
    Ok(text)
}

// ----------------------------------------------------------------------------
// Off-loop execution
// ----------------------------------------------------------------------------

/// Outcome of waiting one slice on a pending description.
#[derive(Debug)]
pub enum Poll {
    Ready(Result<String, ServiceError>),
    Waiting,
}

/// A description request running on its own thread.
pub struct PendingDescription {
    rx: Receiver<Result<String, ServiceError>>,
    started: Instant,
    deadline: Duration,
}

impl PendingDescription {
    pub fn spawn(
        describer: Arc<dyn VisionDescriber>,
        request: DescriptionRequest,
        deadline: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("describe".to_string())
            .spawn(move || {
                let _ = tx.send(describer.describe(&request));
            });
        if let Err(err) = spawned {
            log::error!("describe: failed to spawn request thread: {}", err);
        }
        Self {
            rx,
            started: Instant::now(),
            deadline,
        }
    }

    /// Wait at most `slice` for the result. Past the deadline the request is
    /// reported as timed out and left to finish on its own.
    pub fn poll(&self, slice: Duration) -> Poll {
        match self.rx.recv_timeout(slice) {
            Ok(result) => Poll::Ready(result),
            Err(RecvTimeoutError::Timeout) => {
                if self.started.elapsed() >= self.deadline {
                    Poll::Ready(Err(ServiceError::Timeout(self.deadline)))
                } else {
                    Poll::Waiting
                }
            }
            Err(RecvTimeoutError::Disconnected) => Poll::Ready(Err(ServiceError::Transport(
                "description worker exited".to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl VisionDescriber for Fixed {
        fn describe(&self, _request: &DescriptionRequest) -> Result<String, ServiceError> {
            Ok(self.0.to_string())
        }
    }

    struct Sleepy;

    impl VisionDescriber for Sleepy {
        fn describe(&self, _request: &DescriptionRequest) -> Result<String, ServiceError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok("late".to_string())
        }
    }

    fn request() -> DescriptionRequest {
        DescriptionRequest {
            prompt: SCENE_PROMPT.to_string(),
            image_jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
        }
    }

    fn wait(pending: &PendingDescription) -> Result<String, ServiceError> {
        loop {
            if let Poll::Ready(result) = pending.poll(Duration::from_millis(10)) {
                return result;
            }
        }
    }

    #[test]
    fn first_sentence_truncates_at_period() {
        assert_eq!(first_sentence("A chair. It is red."), "A chair");
        assert_eq!(first_sentence("  no period here "), "no period here");
        assert_eq!(first_sentence(".hidden"), ".hidden");
    }

    #[test]
    fn request_body_carries_prompt_and_data_uri() {
        let client = ChatCompletionsDescriber::new(ChatCompletionsConfig::default());
        let body = client.request_body(&request()).expect("body");
        let json: serde_json::Value = serde_json::from_str(&body).expect("json");
        assert_eq!(json["model"], DEFAULT_MODEL);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
        let parts = &json["messages"][1]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], SCENE_PROMPT);
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,/9j/2Q==");
    }

    #[test]
    fn parses_first_choice_content() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"  A door.  "}}]}"#;
        assert_eq!(parse_reply(raw).expect("reply"), "A door.");
    }

    #[test]
    fn empty_or_malformed_replies_are_empty_response() {
        for raw in [
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"content":"   "}}]}"#,
            r#"{"choices":[{"message":null}]}"#,
            "not json",
        ] {
            assert!(matches!(parse_reply(raw), Err(ServiceError::EmptyResponse)));
        }
    }

    #[test]
    fn pending_description_delivers_result() {
        let pending =
            PendingDescription::spawn(Arc::new(Fixed("a hallway")), request(), Duration::from_secs(5));
        assert_eq!(wait(&pending).expect("description"), "a hallway");
    }

    #[test]
    fn pending_description_times_out_without_blocking() {
        let pending =
            PendingDescription::spawn(Arc::new(Sleepy), request(), Duration::from_millis(50));
        let started = Instant::now();
        assert!(matches!(wait(&pending), Err(ServiceError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
