//! Minimal client for OpenAI-compatible chat completions (OpenRouter by
//! default).
//!
//! Only what the planner needs: a system and a user message in, one choice's
//! text and the reported token usage out. Non-2xx statuses and API-level
//! error bodies surface as [`ChatError`].

use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for planning and summarization calls.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ── Request ────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Serialize, Clone, Debug)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ResponseFormat {
    /// Ask the model for a single JSON object.
    pub fn json_object() -> Self {
        Self {
            kind: "json_object",
        }
    }
}

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

// ── Response ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    error: Option<WireError>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

/// The first choice of a completion plus the usage the API reported.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    /// `usage.total_tokens`, or prompt plus completion when only those are
    /// present.
    pub total_tokens: Option<u64>,
}

impl ChatCompletion {
    fn from_body(text: &str) -> Result<Self, ChatError> {
        let parsed: WireResponse =
            serde_json::from_str(text).map_err(|e| ChatError::Decode(e.to_string()))?;
        if let Some(err) = parsed.error {
            return Err(ChatError::Api(err.message));
        }
        let total_tokens = parsed.usage.and_then(|u| {
            u.total_tokens.or(match (u.prompt_tokens, u.completion_tokens) {
                (Some(p), Some(c)) => Some(p + c),
                _ => None,
            })
        });
        let (content, finish_reason) = match parsed.choices.into_iter().next() {
            Some(choice) => (choice.message.content, choice.finish_reason),
            None => (None, None),
        };
        Ok(Self {
            content,
            finish_reason,
            total_tokens,
        })
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for a chat completions endpoint.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("replan/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
            referer: "https://crates.io/crates/replan".into(),
            title: "replan".into(),
        })
    }

    /// Set the `HTTP-Referer` and `X-Title` attribution headers.
    pub fn with_app(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = referer.into();
        self.title = title.into();
        self
    }

    /// Point the client at another OpenAI-compatible completions endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, ChatError> {
        debug!(
            "Chat request: model={}, messages={}, max_tokens={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
        );
        let start = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ChatError::Transport(format!("reading body: {e}")))?;
        debug!(
            "Chat response: HTTP {status} in {:.1}s ({} bytes)",
            start.elapsed().as_secs_f64(),
            text.len()
        );
        trace!("Chat body: {}", text.chars().take(500).collect::<String>());

        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        ChatCompletion::from_body(&text)
    }
}
