//! LLM invocation capability.
//!
//! The pipeline talks to models through [`LanguageModel`]: given messages, a
//! tool namespace, an optional system instruction, a temperature, and a step
//! ceiling, it produces either a completed [`GenerationResult`] or a live
//! [`ModelStream`].
//!
//! # Layers
//!
//! - [`LlmDriver`]: one streamed completion against a backend
//!   ([`ChatCompletionsDriver`] for OpenAI-compatible endpoints).
//! - [`ToolLoopModel`]: runs a driver in a bounded tool-call loop, executing
//!   tools from the namespace between steps.

pub mod chat_completions;
pub mod provider;
pub mod runtime;

pub use chat_completions::ChatCompletionsDriver;
pub use provider::Provider;
pub use runtime::ToolLoopModel;

use std::pin::Pin;

use futures::{Stream, future::BoxFuture, stream::BoxStream};
use serde::{Deserialize, Serialize};

use crate::error::ModelInvocationError;
use crate::normalized::NormalizedEvent;
use crate::tools::ToolNamespace;

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL including the API version segment (e.g. `https://api.openai.com/v1`).
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub provider: Provider,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: MessageContent,
    /// Originating tool call (tool-role messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name (tool-role messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn with_role(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(MessageRole::Assistant, content)
    }

    /// A tool result answering `tool_call_id`.
    #[must_use]
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_role(MessageRole::Tool, content)
        }
    }

    /// Chat Completions wire format.
    #[must_use]
    pub fn to_wire(&self) -> serde_json::Value {
        let text = self.content.to_text();
        let mut obj = serde_json::json!({ "role": self.role.as_str() });

        match &self.tool_calls {
            Some(calls) if !calls.is_empty() => {
                obj["content"] = if text.is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_json::Value::String(text)
                };
                obj["tool_calls"] = serde_json::to_value(calls).unwrap_or_default();
            }
            _ => obj["content"] = serde_json::Value::String(text),
        }
        if let Some(id) = &self.tool_call_id {
            obj["tool_call_id"] = serde_json::Value::String(id.clone());
        }
        obj
    }
}

/// Message content: plain text or a structured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Structured(serde_json::Value),
}

impl MessageContent {
    /// Whether the content carries nothing worth sending.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Text(s) | Self::Structured(serde_json::Value::String(s)) => s.trim().is_empty(),
            Self::Structured(serde_json::Value::Null) => true,
            Self::Structured(serde_json::Value::Array(items)) => items.is_empty(),
            Self::Structured(_) => false,
        }
    }

    /// Text as-is; structured payloads serialized.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) | Self::Structured(serde_json::Value::String(s)) => s.clone(),
            Self::Structured(v) => v.to_string(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    /// Any role this crate does not recognise.
    #[serde(other)]
    Unknown,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Unknown => "unknown",
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Always "function" for now.
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// The outcome of one executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    /// Provider-defined payload, interpreted by the owning adapter.
    pub raw_result: serde_json::Value,
}

/// Completed (non-streaming) model output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResult {
    pub text: Option<String>,
    pub tool_results: Vec<ToolInvocationResult>,
}

/// Structured response of a streamed invocation, available once the stream
/// has been drained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResponse {
    /// Text of the final step.
    pub text: String,
    /// Assistant and tool messages produced during the invocation.
    pub messages: Vec<Message>,
    pub tool_results: Vec<ToolInvocationResult>,
}

impl From<StepResponse> for GenerationResult {
    fn from(resp: StepResponse) -> Self {
        Self {
            text: (!resp.text.is_empty()).then_some(resp.text),
            tool_results: resp.tool_results,
        }
    }
}

/// Assistant reply returned by the non-streaming pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub role: MessageRole,
    pub content: String,
}

impl LlmResponse {
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub tools: ToolNamespace,
    /// Instruction placed ahead of `messages`.
    pub system: Option<String>,
    pub temperature: f32,
    /// Ceiling on model round trips, tool-call rounds included.
    pub max_steps: usize,
}

/// Event stream produced by a model.
pub type EventStream = BoxStream<'static, Result<NormalizedEvent, ModelInvocationError>>;

/// A live streamed invocation.
///
/// `response` resolves once `events` has been drained.
pub struct ModelStream {
    pub events: EventStream,
    pub response: BoxFuture<'static, Result<StepResponse, ModelInvocationError>>,
}

impl std::fmt::Debug for ModelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStream").finish_non_exhaustive()
    }
}

/// Given messages and tools, produce text and/or tool-call results.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run an invocation to completion.
    ///
    /// # Errors
    ///
    /// Returns [`ModelInvocationError`] if the backend call fails.
    async fn generate(&self, req: ModelRequest) -> Result<GenerationResult, ModelInvocationError>;

    /// Start a streamed invocation.
    ///
    /// # Errors
    ///
    /// Returns [`ModelInvocationError`] if the invocation cannot be started.
    async fn stream(&self, req: ModelRequest) -> Result<ModelStream, ModelInvocationError>;
}

/// Request to an LLM driver.
#[derive(Debug)]
pub struct LlmRequest {
    /// Conversation messages in wire format.
    pub messages: Vec<serde_json::Value>,
    /// Available tools in `OpenAI` function schema format.
    pub tools: Vec<serde_json::Value>,
    pub temperature: Option<f32>,
}

/// Stream of driver events for a single completion.
pub type DriverStream =
    Pin<Box<dyn Stream<Item = Result<NormalizedEvent, ModelInvocationError>> + Send>>;

/// Trait for LLM streaming drivers.
///
/// Implementations provide streaming access to one completion, emitting
/// [`NormalizedEvent`]s as the model generates output.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the connection is interrupted.
    async fn stream(&self, req: LlmRequest) -> Result<DriverStream, ModelInvocationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_role_deserializes() {
        let msg: Message = serde_json::from_value(json!({"role": "narrator", "content": "hi"})).unwrap();
        assert_eq!(msg.role, MessageRole::Unknown);
    }

    #[test]
    fn test_structured_content_is_serialized_as_text() {
        let msg: Message =
            serde_json::from_value(json!({"role": "user", "content": {"city": "Lisbon"}})).unwrap();
        assert_eq!(msg.content.to_text(), r#"{"city":"Lisbon"}"#);
        assert!(!msg.content.is_blank());
    }

    #[test]
    fn test_blank_content() {
        assert!(MessageContent::from("  \n").is_blank());
        assert!(MessageContent::Structured(serde_json::Value::Null).is_blank());
        assert!(MessageContent::Structured(json!([])).is_blank());
        let missing: Message = serde_json::from_value(json!({"role": "user"})).unwrap();
        assert!(missing.content.is_blank());
    }

    #[test]
    fn test_wire_format_for_tool_calls() {
        let msg = Message {
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: "search".to_string(),
                    arguments: "{}".to_string(),
                },
            }]),
            ..Message::assistant("")
        };
        let wire = msg.to_wire();
        assert_eq!(wire["content"], serde_json::Value::Null);
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "search");

        let tool = Message::tool("call_1", "search", "results").to_wire();
        assert_eq!(tool, json!({"role": "tool", "content": "results", "tool_call_id": "call_1"}));
    }

    #[test]
    fn test_step_response_into_generation_result() {
        let empty: GenerationResult = StepResponse::default().into();
        assert_eq!(empty.text, None);
    }
}
