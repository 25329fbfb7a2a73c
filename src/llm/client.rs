use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ApiSettings;

/// Upper bound on one completion request, streamed body included
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Failure of a completion call
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request to completion API failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("failed to decode completion response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("completion response contained no text")]
    Empty,
    #[error("API key not configured (set DEEPSEEK_API_KEY)")]
    MissingApiKey,
    #[error("{0}")]
    Provider(String),
}

/// Text-completion capability used by the pipeline stages
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete `user` under the `system` role prompt, returning the full text
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;

    /// Complete with incremental delivery: `on_chunk` receives every fragment
    /// before the full text is returned.
    async fn complete_stream(
        &self,
        system: &str,
        user: &str,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, CompletionError> {
        let text = self.complete(system, user).await?;
        on_chunk(&text);
        Ok(text)
    }
}

/// Configuration for the chat completion client
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: String,
    /// Endpoint root, without the `/chat/completions` suffix
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ChatConfig {
    /// Build from config settings; DEEPSEEK_API_KEY overrides the stored key
    pub fn from_settings(settings: &ApiSettings) -> Result<Self, CompletionError> {
        let api_key = resolve_api_key(std::env::var("DEEPSEEK_API_KEY").ok(), settings.api_key.as_deref())?;

        Ok(Self {
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.resolve_model(&settings.model),
            temperature: 0.7,
            max_tokens: 8192,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }
}

fn resolve_api_key(env_key: Option<String>, stored: Option<&str>) -> Result<String, CompletionError> {
    env_key
        .filter(|k| !k.trim().is_empty())
        .or_else(|| stored.filter(|k| !k.trim().is_empty()).map(str::to_string))
        .ok_or(CompletionError::MissingApiKey)
}

/// Client for OpenAI-compatible chat completion endpoints (DeepSeek)
pub struct ChatClient {
    client: Client,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(config: ChatConfig) -> Result<Self, CompletionError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn post(&self, system: &str, user: &str, stream: bool) -> Result<reqwest::Response, CompletionError> {
        let request = ChatRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Api { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionProvider for ChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let response = self.post(system, user, false).await?;
        let body = response.text().await?;
        let response: ChatResponse = serde_json::from_str(&body)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.is_empty())
            .ok_or(CompletionError::Empty)
    }

    async fn complete_stream(
        &self,
        system: &str,
        user: &str,
        on_chunk: &mut (dyn for<'s> FnMut(&'s str) + Send),
    ) -> Result<String, CompletionError> {
        let response = self.post(system, user, true).await?;
        let mut stream = response.bytes_stream();

        let mut decoder = SseDecoder::new();
        let mut full_text = String::new();
        let mut deliver = |line: SseLine| {
            if let SseLine::Delta(text) = line {
                full_text.push_str(&text);
                on_chunk(&text);
            }
        };

        while let Some(chunk) = stream.next().await {
            decoder.feed(&chunk?).into_iter().for_each(&mut deliver);
            if decoder.is_done() {
                break;
            }
        }
        if let Some(line) = decoder.finish() {
            deliver(line);
        }

        debug!("Stream finished with {} characters", full_text.chars().count());

        if full_text.is_empty() {
            return Err(CompletionError::Empty);
        }
        Ok(full_text)
    }
}

/// One decoded server-sent event line
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Splits a streamed response body into SSE lines.
///
/// Raw bytes are buffered until a newline arrives, so a multi-byte character
/// split across network chunks decodes intact. Nothing is produced after
/// `[DONE]`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume one network chunk, returning every complete non-skip line
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        let mut lines = Vec::new();
        if self.done {
            return lines;
        }
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                SseLine::Skip => {}
                SseLine::Done => {
                    self.done = true;
                    self.buffer.clear();
                    lines.push(SseLine::Done);
                    break;
                }
                delta => lines.push(delta),
            }
        }
        lines
    }

    /// Decode a trailing line the server sent without a final newline
    pub fn finish(&mut self) -> Option<SseLine> {
        if self.done || self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        match parse_sse_line(String::from_utf8_lossy(&rest).trim()) {
            SseLine::Skip => None,
            line => Some(line),
        }
    }
}

/// Decode a single SSE line of a streaming chat completion
pub fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
        return SseLine::Skip;
    };

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();

    if text.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Delta(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
