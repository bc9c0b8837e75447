//! Remote language model seam.
//!
//! The orchestrator only needs two things from the model provider: a way to open a
//! server-side conversation seeded with instructions, and a completion call that
//! either continues such a conversation or runs statelessly from supplied history.
//! [`OpenAiResponsesClient`] implements both against the Responses and
//! Conversations endpoints; tests substitute a scripted implementation.
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::timeout;

use crate::config::LlmConfig;
use crate::logutil::redact_secrets;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completion call.
///
/// With `conversation` set only `turn` is sent; the remote side already holds the
/// instructions and prior turns. Without it, `instructions` and `history` are sent
/// in full.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub instructions: Option<String>,
    pub history: Vec<ChatMessage>,
    pub turn: String,
    pub conversation: Option<String>,
}

impl CompletionRequest {
    pub fn continued(conversation: impl Into<String>, turn: impl Into<String>) -> Self {
        Self {
            conversation: Some(conversation.into()),
            turn: turn.into(),
            ..Default::default()
        }
    }

    pub fn stateless(
        instructions: impl Into<String>,
        history: Vec<ChatMessage>,
        turn: impl Into<String>,
    ) -> Self {
        Self {
            instructions: Some(instructions.into()),
            history,
            turn: turn.into(),
            conversation: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("model returned an empty completion")]
    EmptyCompletion,

    #[error("remote conversation not found")]
    ConversationNotFound,

    #[error("could not decode upstream response: {0}")]
    Decode(String),

    #[error("language model is not configured")]
    NotConfigured,
}

impl LlmError {
    pub fn code(&self) -> &'static str {
        match self {
            LlmError::Timeout(_) => "llm_timeout",
            LlmError::Http { .. } => "llm_http_error",
            LlmError::Transport(_) => "llm_transport_error",
            LlmError::EmptyCompletion => "empty_reply",
            LlmError::ConversationNotFound => "conversation_not_found",
            LlmError::Decode(_) => "llm_decode_error",
            LlmError::NotConfigured => "llm_not_configured",
        }
    }

    /// Whether the remote side rejected the conversation handle itself.
    pub fn is_invalid_handle(&self) -> bool {
        match self {
            LlmError::ConversationNotFound => true,
            LlmError::Http { status, body } => {
                if *status == 404 {
                    return true;
                }
                let lower = body.to_lowercase();
                lower.contains("conversation")
                    && (lower.contains("not found") || lower.contains("invalid"))
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait LlmService: Send + Sync {
    /// Open a remote conversation seeded with `instructions` as a system item.
    async fn create_conversation(&self, instructions: &str) -> Result<String, LlmError>;

    /// Run one turn and return the model's text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Client for the OpenAI Responses + Conversations HTTP API.
pub struct OpenAiResponsesClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiResponsesClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, url: &str, body: &Value, limit: Duration) -> Result<Value, LlmError> {
        if !self.is_configured() {
            return Err(LlmError::NotConfigured);
        }
        let request = self
            .client
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body);

        let (status, text) = timeout(limit, async {
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        })
        .await
        .map_err(|_| LlmError::Timeout(limit))?
        .map_err(|e| LlmError::Transport(redact_secrets(&e.to_string())))?;

        if !status.is_success() {
            let body: String = text.chars().take(300).collect();
            warn!("LLM call {} returned {}", url, status.as_u16());
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: redact_secrets(&body),
            });
        }
        serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LlmService for OpenAiResponsesClient {
    async fn create_conversation(&self, instructions: &str) -> Result<String, LlmError> {
        let body = json!({
            "items": [
                {"type": "message", "role": "system", "content": instructions}
            ]
        });
        let url = self.endpoint("conversations");
        let value = self
            .post_json(&url, &body, self.config.append_timeout())
            .await?;
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::Decode("conversation response has no id".into()))?;
        debug!("Created remote conversation {}", id);
        Ok(id.to_string())
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut input: Vec<Value> = request
            .history
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        input.push(json!({"role": "user", "content": request.turn}));

        let mut body = json!({
            "model": self.config.model,
            "input": input,
        });
        if let Some(instructions) = &request.instructions {
            body["instructions"] = json!(instructions);
        }
        if let Some(conv) = &request.conversation {
            body["conversation"] = json!(conv);
        }

        let url = self.endpoint("responses");
        let value = self.post_json(&url, &body, self.config.timeout()).await?;
        let text = extract_output_text(&value);
        if text.trim().is_empty() {
            return Err(LlmError::EmptyCompletion);
        }
        Ok(text)
    }
}

/// Concatenate every `output_text` content part of a Responses API payload.
pub fn extract_output_text(value: &Value) -> String {
    if let Some(s) = value.get("output_text").and_then(Value::as_str) {
        return s.to_string();
    }
    let mut out = String::new();
    let items = value
        .get("output")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for item in items {
        let parts = item
            .get("content")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for part in parts {
            if part.get("type").and_then(Value::as_str) == Some("output_text") {
                if let Some(t) = part.get("text").and_then(Value::as_str) {
                    out.push_str(t);
                }
            }
        }
    }
    out
}
