//! LLM client abstraction and the chat message model shared by the agent.
//!
//! Provider payloads are normalized into [`ChatMessage`] at the client boundary:
//! content is always an ordered list of [`ContentBlock`]s, whether the provider
//! answered with a plain string or with structured parts.

mod gemini;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use gemini::GeminiClient;

/// Errors raised by external services: the hosted models (chat, embedding,
/// OCR) and the vector index.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid response from {service}: {reason}")]
    InvalidResponse {
        service: &'static str,
        reason: String,
    },

    #[error("{service} did not answer within {elapsed:?}")]
    Timeout {
        service: &'static str,
        elapsed: Duration,
    },
}

impl LlmError {
    pub fn invalid_response(service: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            reason: reason.into(),
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// User-visible text.
    Text { text: String },
    /// Model reasoning; kept in history, never part of an answer.
    Thought { text: String },
    /// Provider payload we do not interpret.
    Other { data: Value },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// Content as it may arrive from outside: a bare string or a list of blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<Value>),
}

/// Normalize a string or block-list payload into content blocks.
///
/// Objects shaped `{"type": "text", "text": ...}` become text blocks,
/// `{"type": "thinking" | "thought", ...}` become thoughts, and anything else
/// is carried as [`ContentBlock::Other`].
pub fn normalize_content(value: Value) -> Vec<ContentBlock> {
    match serde_json::from_value::<RawContent>(value.clone()) {
        Ok(RawContent::Text(text)) if text.is_empty() => Vec::new(),
        Ok(RawContent::Text(text)) => vec![ContentBlock::Text { text }],
        Ok(RawContent::Blocks(blocks)) => blocks.into_iter().map(normalize_block).collect(),
        Err(_) if value.is_null() => Vec::new(),
        Err(_) => vec![ContentBlock::Other { data: value }],
    }
}

fn normalize_block(block: Value) -> ContentBlock {
    if let Some(text) = block.as_str() {
        return ContentBlock::text(text);
    }
    let kind = block.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "text" => match block.get("text").and_then(Value::as_str) {
            Some(text) => ContentBlock::text(text),
            None => ContentBlock::Other { data: block },
        },
        "thinking" | "thought" => {
            let text = block
                .get("thinking")
                .or_else(|| block.get("text"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            ContentBlock::Thought { text }
        }
        _ => ContentBlock::Other { data: block },
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation token, echoed back on the tool result.
    pub id: String,
    pub name: String,
    /// Structured arguments (a JSON object).
    pub arguments: Value,
    /// Provider fields that must be echoed back verbatim when the call is
    /// replayed, such as Gemini's `thoughtSignature`.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            extra: serde_json::Map::new(),
        }
    }
}

/// Schema advertised to the model for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    /// Only on assistant messages that request tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Only on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name, only on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_text(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            role,
            content: if text.is_empty() {
                Vec::new()
            } else {
                vec![ContentBlock::Text { text }]
            },
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::with_text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_text(Role::Assistant, text)
    }

    /// Assistant message carrying tool calls and optional preamble content.
    pub fn assistant_with_tools(content: Vec<ContentBlock>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Self::with_text(Role::Tool, content)
        }
    }

    /// Concatenation of the text blocks only.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chat-capable model endpoint.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate the next assistant message.
    ///
    /// When `tools` is `None` the model is called without function calling.
    /// The returned message always has `Role::Assistant`.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolSchema]>,
    ) -> Result<ChatMessage, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_becomes_single_text_block() {
        let blocks = normalize_content(json!("สวัสดี"));
        assert_eq!(blocks, vec![ContentBlock::text("สวัสดี")]);
    }

    #[test]
    fn block_list_is_normalized_per_type() {
        let blocks = normalize_content(json!([
            {"type": "thinking", "thinking": "plan"},
            {"type": "text", "text": "คำตอบ"},
            {"type": "image", "url": "x"}
        ]));
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], ContentBlock::Thought { text: "plan".into() });
        assert_eq!(blocks[1], ContentBlock::text("คำตอบ"));
        assert!(matches!(blocks[2], ContentBlock::Other { .. }));
    }

    #[test]
    fn text_skips_non_text_blocks() {
        let msg = ChatMessage::assistant_with_tools(
            vec![
                ContentBlock::text("ส่วนแรก "),
                ContentBlock::Thought { text: "hidden".into() },
                ContentBlock::Other { data: json!({"x": 1}) },
                ContentBlock::text("ส่วนหลัง"),
            ],
            vec![],
        );
        assert_eq!(msg.text(), "ส่วนแรก ส่วนหลัง");
    }

    #[test]
    fn tool_result_carries_correlation() {
        let msg = ChatMessage::tool_result("call-1", "query_rag", "result");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
        assert_eq!(msg.name.as_deref(), Some("query_rag"));
        assert_eq!(msg.text(), "result");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn null_and_empty_content_normalize_to_nothing() {
        assert!(normalize_content(Value::Null).is_empty());
        assert!(normalize_content(json!("")).is_empty());
    }
}
