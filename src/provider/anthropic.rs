//! Anthropic Messages API streaming generator
//!
//! Sends the prompt as a single user message with `stream: true` and turns
//! the server-sent events into `StreamEvent`s:
//! - `content_block_delta` → text
//! - `message_start` / `message_delta` → usage
//! - `error` → `GenerationError::Api`

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChunkStream, StreamEvent, TextGenerator};
use crate::types::{GenerationError, GenerationParams, Prompt, PromptPart, Usage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

pub struct AnthropicGenerator {
    client: Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for AnthropicGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGenerator")
            .field("api_key", &"<REDACTED>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicGenerator {
    pub fn new(api_key: impl Into<String>) -> Result<Self, GenerationError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey(API_KEY_ENV));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a different endpoint (proxies, tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Messages API request body for a prompt
    pub fn request_body(prompt: &Prompt, params: &GenerationParams) -> Value {
        let content: Vec<Value> = prompt
            .parts
            .iter()
            .map(|part| match part {
                PromptPart::Text { text } => json!({ "type": "text", "text": text }),
                PromptPart::Image { media_type, data } => json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": media_type, "data": data },
                }),
            })
            .collect();

        let mut body = json!({
            "model": params.model,
            "max_tokens": params.max_tokens,
            "stream": true,
            "messages": [{ "role": "user", "content": content }],
        });
        if let Some(system) = &prompt.system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_k) = params.top_k {
            body["top_k"] = json!(top_k);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = json!(top_p);
        }
        if !params.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(params.stop_sequences);
        }
        body
    }
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn open(&self, prompt: &Prompt, params: &GenerationParams) -> Result<ChunkStream, GenerationError> {
        let body = Self::request_body(prompt, params);
        tracing::debug!(model = %params.model, has_image = prompt.has_image(), "Anthropic streaming request");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status,
                message: error_message(&text).unwrap_or(text),
            });
        }

        let mut decoder = SseDecoder::default();
        Ok(response
            .bytes_stream()
            .flat_map(move |chunk| {
                let events = match chunk {
                    Ok(bytes) => decoder.feed(&bytes),
                    Err(e) => vec![Err(GenerationError::Http(e))],
                };
                futures_util::stream::iter(events)
            })
            .boxed())
    }
}

/// Extract `error.message` from an Anthropic error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Incremental server-sent-events decoder
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning every event completed by them
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<StreamEvent, GenerationError>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(data) = line.trim().strip_prefix("data:") {
                if let Some(event) = parse_event(data.trim()) {
                    events.push(event);
                }
            }
        }
        events
    }
}

fn parse_event(data: &str) -> Option<Result<StreamEvent, GenerationError>> {
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let event: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(GenerationError::Protocol(format!("{}: {}", e, data)))),
    };
    let token = |pointer: &str| event.pointer(pointer).and_then(Value::as_u64);

    match event.get("type").and_then(Value::as_str).unwrap_or("") {
        "content_block_delta" => event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map(|text| Ok(StreamEvent::Text(text.to_string()))),
        "message_start" => token("/message/usage/input_tokens")
            .map(|input| Ok(StreamEvent::Usage(Usage::new(input, 0)))),
        "message_delta" => token("/usage/output_tokens")
            .map(|output| Ok(StreamEvent::Usage(Usage::new(0, output)))),
        "error" => {
            let message = event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            Some(Err(GenerationError::Api { status: 200, message }))
        }
        _ => None,
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(events: Vec<Result<StreamEvent, GenerationError>>) -> Vec<String> {
        events
            .into_iter()
            .filter_map(|e| match e {
                Ok(StreamEvent::Text(t)) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(matches!(
            AnthropicGenerator::new("  "),
            Err(GenerationError::MissingApiKey(API_KEY_ENV))
        ));
    }

    #[test]
    fn test_decoder_text_and_usage() {
        let mut decoder = SseDecoder::default();
        let stream = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":25,\"output_tokens\":1}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"a door\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":15}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        let events = decoder.feed(stream.as_bytes());
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], Ok(StreamEvent::Usage(u)) if u == Usage::new(25, 0)));
        assert!(matches!(&events[1], Ok(StreamEvent::Text(t)) if t == "a door"));
        assert!(matches!(events[2], Ok(StreamEvent::Usage(u)) if u == Usage::new(0, 15)));
    }

    #[test]
    fn test_decoder_handles_split_lines_and_utf8() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"type\":\"content_block_delta\",\"delta\":{\"text\":\"caf\u{e9} \u{21aa}\"}}\n".as_bytes();
        let (a, b) = line.split_at(line.len() - 6);
        let mut all = decoder.feed(a);
        assert!(all.is_empty());
        all.extend(decoder.feed(b));
        assert_eq!(texts(all), vec!["café ↪"]);
    }

    #[test]
    fn test_decoder_error_event() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(
            b"data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n",
        );
        assert!(matches!(&events[0], Err(GenerationError::Api { message, .. }) if message == "Overloaded"));
    }

    #[test]
    fn test_decoder_rejects_malformed_json() {
        let mut decoder = SseDecoder::default();
        let events = decoder.feed(b"data: {oops\n");
        assert!(matches!(events[0], Err(GenerationError::Protocol(_))));
    }

    #[test]
    fn test_request_body() {
        let mut prompt = Prompt::new().with_system("sys");
        prompt.push_text("look");
        prompt.push_image("image/jpeg", "AAAA");
        let params = GenerationParams {
            model: "claude-3-haiku-20240307".to_string(),
            temperature: Some(1.0),
            max_tokens: 500,
            stop_sequences: vec!["```".to_string()],
            top_k: None,
            top_p: Some(0.9),
        };
        let body = AnthropicGenerator::request_body(&prompt, &params);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stop_sequences"][0], "```");
        assert!(body.get("top_k").is_none());
        assert_eq!(body["messages"][0]["content"][1]["source"]["data"], "AAAA");
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad model"}}"#;
        assert_eq!(error_message(body).as_deref(), Some("bad model"));
        assert_eq!(error_message("<html>"), None);
    }
}
