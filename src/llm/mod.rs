//! LLM client types: requests, cancellation, typed errors, and the provider trait.

pub mod openai;
pub mod sse;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared cancellation flag for one in-flight request.
///
/// Cancellation is idempotent and safe across the producer/consumer boundary:
/// after `cancel()`, the owning producer emits at most one further event.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the conversation sent to the provider.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Links a Tool-role result back to the call that produced it.
    pub tool_call_id: Option<String>,
    /// A function call this assistant message made.
    pub tool_call: Option<ToolCall>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_call: None,
        }
    }

    pub fn assistant_tool_call(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_call_id: None,
            tool_call: Some(call),
        }
    }

    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_call: None,
        }
    }
}

/// Function schema exposed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A function call the model asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as sent by the provider.
    pub arguments: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: String,
    pub tool_call: Option<ToolCall>,
}

/// Items surfaced to the caller while a request runs.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem<'a> {
    /// In-order response text; partial UTF-8 at chunk boundaries is already
    /// buffered by the client, so this is always whole code points.
    Text(&'a str),
    /// A transient failure is being retried after `delay`.
    Retrying { attempt: u32, delay: Duration },
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("rate limited by provider")]
    RateLimited,
    #[error("provider error (HTTP {status})")]
    Server { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication failed (HTTP {status})")]
    Auth { status: u16 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("prompt exceeds the model context window")]
    ContextLength,
    #[error("malformed provider response: {0}")]
    Parse(String),
    #[error("request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Transient errors are retried with backoff; everything else surfaces.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited | LlmError::Server { .. } | LlmError::Network(_)
        )
    }
}

pub const MAX_ATTEMPTS: u32 = 6;
const BACKOFF_BASE_MS: u64 = 1600;
const BACKOFF_CAP_MS: u64 = 100_000;

/// Exponential backoff: base 1.6 s, factor 1.6, capped near 100 s.
pub fn retry_delay(attempt: u32) -> Duration {
    let mut delay = BACKOFF_BASE_MS as f64;
    for _ in 0..attempt {
        delay *= 1.6;
    }
    Duration::from_millis((delay as u64).min(BACKOFF_CAP_MS))
}

/// Blocking provider interface; streaming delivers text in order through `sink`.
pub trait LlmClient: Send + Sync {
    /// Full-response completion. `sink` only ever sees `Retrying` items.
    fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(StreamItem<'_>),
    ) -> Result<CompletionResponse, LlmError>;

    /// Streaming completion; the returned response carries the full
    /// accumulated text and any tool call.
    fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancelToken,
        sink: &mut dyn FnMut(StreamItem<'_>),
    ) -> Result<CompletionResponse, LlmError>;
}
