use crate::board::Selection;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;
use thiserror::Error;

pub const FALLBACK_REPLY: &str = "No explanation available.";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    #[error("explanation request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("explanation service returned HTTP {status}")]
    Api { status: u16 },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl Config {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// The key comes from the environment and nowhere else; the model is
    /// overridable the same way.
    pub fn from_env() -> Result<Self, ExplainError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| ExplainError::MissingApiKey)?;
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self::new(api_key, model))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub fn build_prompt(text: &str) -> String {
    format!("Explain the following concept in simple terms: \"{text}\"")
}

/// First choice's message content, or the fixed fallback when the body is
/// malformed, the choices are empty, or the content is missing or blank.
pub fn extract_reply(body: &str) -> String {
    let parsed: ChatResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::warn!("unparseable explanation response: {err}");
            return FALLBACK_REPLY.to_string();
        }
    };
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_REPLY.to_string())
}

fn fetch_explanation(config: &Config, text: &str) -> Result<String, ExplainError> {
    let prompt = build_prompt(text);
    // At-most-once, no retry, and deliberately no request timeout.
    let client = reqwest::blocking::Client::builder()
        .timeout(None::<Duration>)
        .build()?;
    let response = client
        .post(&config.endpoint)
        .bearer_auth(&config.api_key)
        .json(&ChatRequest {
            model: &config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        })
        .send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(ExplainError::Api {
            status: status.as_u16(),
        });
    }
    let body = response.text()?;
    Ok(extract_reply(&body))
}

pub struct Completion {
    pub selection: Selection,
    pub result: Result<String, ExplainError>,
}

/// Hands explanation requests to worker threads and collects their
/// results. Each request carries a snapshot of the selection that
/// triggered it, so in-flight requests are unaffected by later
/// selections; boxes appear in completion order.
pub struct Explainer {
    config: Option<Config>,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    in_flight: usize,
}

impl Default for Explainer {
    fn default() -> Self {
        let config = match Config::from_env() {
            Ok(config) => Some(config),
            Err(err) => {
                log::warn!("explanations disabled: {err}");
                None
            }
        };
        Self::with_config(config)
    }
}

impl Explainer {
    pub fn with_config(config: Option<Config>) -> Self {
        let (tx, rx) = channel();
        Self {
            config,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn request(&mut self, selection: Selection) {
        self.in_flight += 1;
        let tx = self.tx.clone();
        match &self.config {
            None => {
                // Surfaced through the same channel as network failures.
                let _ = tx.send(Completion {
                    selection,
                    result: Err(ExplainError::MissingApiKey),
                });
            }
            Some(config) => {
                let config = config.clone();
                thread::spawn(move || {
                    let result = fetch_explanation(&config, &selection.text);
                    let _ = tx.send(Completion { selection, result });
                });
            }
        }
    }

    pub fn poll(&mut self) -> Option<Completion> {
        match self.rx.try_recv() {
            Ok(completion) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                Some(completion)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_wraps_the_selected_text() {
        assert_eq!(
            build_prompt("ring buffer"),
            "Explain the following concept in simple terms: \"ring buffer\""
        );
    }

    #[test]
    fn reply_is_extracted_from_the_first_choice() {
        let body = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "A short answer."}},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}}
            ],
            "usage": {"total_tokens": 12}
        }"#;
        assert_eq!(extract_reply(body), "A short answer.");
    }

    #[test]
    fn missing_content_falls_back() {
        let body = r#"{"choices": [{"message": {"role": "assistant"}}]}"#;
        assert_eq!(extract_reply(body), FALLBACK_REPLY);
    }

    #[test]
    fn empty_choices_fall_back() {
        assert_eq!(extract_reply(r#"{"choices": []}"#), FALLBACK_REPLY);
        assert_eq!(extract_reply(r#"{}"#), FALLBACK_REPLY);
    }

    #[test]
    fn blank_content_falls_back() {
        let body = r#"{"choices": [{"message": {"content": "  "}}]}"#;
        assert_eq!(extract_reply(body), FALLBACK_REPLY);
    }

    #[test]
    fn malformed_body_falls_back() {
        assert_eq!(extract_reply("not json at all"), FALLBACK_REPLY);
    }

    #[test]
    fn request_body_matches_the_wire_format() {
        let prompt = build_prompt("entropy");
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(
            json["messages"][0]["content"],
            "Explain the following concept in simple terms: \"entropy\""
        );
    }

    #[test]
    fn missing_key_is_reported_through_the_channel() {
        use crate::board::{SelectionSource, Selection};
        use eframe::egui::pos2;

        let mut explainer = Explainer::with_config(None);
        let selection = Selection {
            text: "entropy".to_string(),
            source: SelectionSource::Pdf {
                page_index: 0,
                rect: eframe::egui::Rect::from_min_size(pos2(0.0, 0.0), eframe::egui::vec2(10.0, 10.0)),
            },
        };
        explainer.request(selection.clone());
        assert_eq!(explainer.in_flight(), 1);
        let completion = explainer.poll().expect("completion should be queued");
        assert_eq!(completion.selection, selection);
        assert!(matches!(completion.result, Err(ExplainError::MissingApiKey)));
        assert_eq!(explainer.in_flight(), 0);
    }
}
