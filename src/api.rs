//! LLM transport: chat-completion wire types, the [`LanguageModel`] seam,
//! and the bundled OpenRouter client.
//!
//! The engine's contract with the model is deliberately small —
//! `chat(messages, tools)` and `summarize(text)` — and async I/O stays
//! confined to this module. Everything else in the crate treats the LLM as
//! a synchronous request/response within a turn.

use crate::error::EngineError;
use crate::{LogEntry, Role, SUMMARY_TARGET_TOKENS};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// System prompt for the one-shot effort summarization call.
const SUMMARIZE_PROMPT: &str = "\
You are a summarization assistant. Condense the following work log into a \
short prose summary capturing what was attempted, what was decided, and the \
outcome. Preserve identifiers, file paths, and error names verbatim. Output \
only the summary, no commentary.";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message on the wire.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation sent to the chat completions API.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Lift a persisted log entry onto the wire.
    pub fn from_entry(entry: &LogEntry) -> Self {
        match entry.role {
            Role::User => Message::user(&entry.content),
            Role::Assistant => Message::assistant_text(&entry.content),
        }
    }
}

// ── Tool types ─────────────────────────────────────────────────────

/// The type of a tool definition. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ToolType {
    #[serde(rename = "function")]
    Function,
}

/// Tool definition sent to the API (OpenAI function-calling format).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: ToolType,
    pub function: FunctionDef,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: ToolType::Function,
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The type of a tool call. Currently always `Function`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum CallType {
    #[serde(rename = "function")]
    Function,
}

/// A tool call returned by the model.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: CallType,
    pub function: FunctionCallData,
}

impl ToolCall {
    /// Convenience constructor (used heavily by tests and fakes).
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FunctionCallData {
    pub name: String,
    /// Raw JSON arguments string, exactly as the model produced it.
    pub arguments: String,
}

// ── Request / response types ───────────────────────────────────────

/// Chat completion request body.
#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "is_zero_f32")]
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_f32(v: &f32) -> bool {
    *v == 0.0
}

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Clean return type from [`LanguageModel::chat`].
#[derive(Debug, Default)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<UsageInfo>,
}

impl ChatCompletion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn with_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Default::default()
        }
    }
}

// ── LanguageModel seam ─────────────────────────────────────────────

/// Boxed future returned by [`LanguageModel`] methods.
///
/// Type alias to keep the trait dyn-compatible while the implementations
/// stay async.
pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// The interface the engine consumes from the model transport.
///
/// Implementors provide a tool-aware chat call and a one-shot summarizer.
/// Tests substitute a scripted fake; production uses
/// [`OpenRouterClient`].
pub trait LanguageModel: Send + Sync {
    /// Send the assembled message list plus tool definitions; the model
    /// answers with text, tool calls, or both.
    fn chat(&self, messages: Vec<Message>, tools: Vec<ToolDef>) -> LlmFuture<'_, ChatCompletion>;

    /// Condense an effort's raw log into a short prose summary
    /// (target ≤ [`SUMMARY_TARGET_TOKENS`] tokens).
    fn summarize(&self, text: &str) -> LlmFuture<'_, String>;
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and the default model.
    pub fn new(api_key: impl Into<String>) -> Result<Self, EngineError> {
        Self::with_model(api_key, crate::DEFAULT_MODEL)
    }

    /// Create a new client pinned to a specific model identifier.
    pub fn with_model(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent("oi-memory/0.3")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, body: &ChatRequest) -> Result<ChatCompletion, EngineError> {
        debug!(
            "LLM request: model={}, messages={}, tools={}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| EngineError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(EngineError::Transport(format!("HTTP {status}: {text}")));
        }

        let parsed: RawChatResponse = serde_json::from_str(&text)
            .map_err(|e| EngineError::Transport(format!("failed to parse response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(EngineError::Transport(err.message));
        }

        let choice = parsed.choices.and_then(|c| c.into_iter().next());
        match choice {
            Some(c) => Ok(ChatCompletion {
                content: c.message.content,
                tool_calls: c.message.tool_calls.unwrap_or_default(),
                usage: parsed.usage,
            }),
            None => Ok(ChatCompletion {
                content: None,
                tool_calls: vec![],
                usage: parsed.usage,
            }),
        }
    }
}

impl LanguageModel for OpenRouterClient {
    fn chat(&self, messages: Vec<Message>, tools: Vec<ToolDef>) -> LlmFuture<'_, ChatCompletion> {
        Box::pin(async move {
            let body = ChatRequest {
                model: self.model.clone(),
                messages,
                max_tokens: 1024,
                temperature: 0.7,
                tools: if tools.is_empty() { None } else { Some(tools) },
            };
            self.send(&body).await
        })
    }

    fn summarize(&self, text: &str) -> LlmFuture<'_, String> {
        let user_prompt = format!(
            "Summarize this work log in at most {SUMMARY_TARGET_TOKENS} tokens:\n\n{text}"
        );
        Box::pin(async move {
            let body = ChatRequest {
                model: self.model.clone(),
                messages: vec![Message::system(SUMMARIZE_PROMPT), Message::user(user_prompt)],
                max_tokens: 256,
                temperature: 0.3,
                tools: None,
            };
            let completion = self.send(&body).await?;
            completion
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| EngineError::Transport("empty summarization response".into()))
        })
    }
}
