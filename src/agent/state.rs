//! Per-run conversation state.
//!
//! A [`ConversationState`] is owned by exactly one run of the loop. Only the
//! agent step appends assistant messages and only the dispatcher appends tool
//! results; both go through checked methods so the call/result pairing cannot
//! drift.

use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::llm::{normalize_content, ChatMessage, ContentBlock, Role, ToolCall};

/// Which prompt and tool set a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// General knowledge only, no tools.
    General,
    /// Answer from the documents through the retrieval and calculation tools.
    #[default]
    Document,
}

/// Who said a replayed history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

/// A prior turn replayed by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub sender: Sender,
    /// Plain text; a structured block list is accepted and reduced to its text blocks.
    #[serde(deserialize_with = "deserialize_turn_text")]
    pub text: String,
}

fn deserialize_turn_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let text = normalize_content(value)
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");
    Ok(text)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("expected a {expected:?} message, got {actual:?}")]
    WrongRole { expected: Role, actual: Role },

    #[error("{0} tool call(s) from the last assistant message are still unanswered")]
    PendingToolCalls(usize),

    #[error("tool result `{0}` does not answer a pending tool call")]
    UnmatchedToolResult(String),
}

/// Ordered message log plus routing metadata.
#[derive(Debug, Clone)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
    mode: Mode,
    original_query: String,
}

impl ConversationState {
    /// Build the initial state: replayed history (blank turns skipped) followed
    /// by the new user query.
    pub fn seed(query: &str, mode: Mode, history: &[HistoryTurn]) -> Self {
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .filter(|turn| !turn.text.trim().is_empty())
            .map(|turn| match turn.sender {
                Sender::User => ChatMessage::user(turn.text.clone()),
                Sender::Bot => ChatMessage::assistant(turn.text.clone()),
            })
            .collect();
        messages.push(ChatMessage::user(query));

        Self {
            messages,
            mode,
            original_query: query.to_string(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn original_query(&self) -> &str {
        &self.original_query
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    /// Tool calls of the latest assistant message that have no result yet, in
    /// the order the model emitted them.
    pub fn pending_tool_calls(&self) -> Vec<ToolCall> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant)
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();

        self.messages[idx]
            .tool_calls
            .iter()
            .filter(|call| !answered.contains(call.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn awaiting_tool_results(&self) -> bool {
        !self.pending_tool_calls().is_empty()
    }

    /// Append the model's turn. Refused while earlier calls are unanswered.
    ///
    /// Empty or repeated call ids are replaced with fresh ones so every call
    /// in the turn can be answered exactly once.
    pub fn push_assistant(&mut self, mut message: ChatMessage) -> Result<(), StateError> {
        if message.role != Role::Assistant {
            return Err(StateError::WrongRole {
                expected: Role::Assistant,
                actual: message.role,
            });
        }
        let pending = self.pending_tool_calls().len();
        if pending > 0 {
            return Err(StateError::PendingToolCalls(pending));
        }

        let mut seen = HashSet::new();
        for call in &mut message.tool_calls {
            if call.id.is_empty() || !seen.insert(call.id.clone()) {
                let fresh = Uuid::new_v4().to_string();
                tracing::warn!(
                    tool = %call.name,
                    old_id = %call.id,
                    new_id = %fresh,
                    "Reassigned tool call id"
                );
                call.id = fresh.clone();
                seen.insert(fresh);
            }
        }
        self.messages.push(message);
        Ok(())
    }

    /// Append a tool result. Its `tool_call_id` must match a pending call.
    pub fn push_tool_result(&mut self, message: ChatMessage) -> Result<(), StateError> {
        if message.role != Role::Tool {
            return Err(StateError::WrongRole {
                expected: Role::Tool,
                actual: message.role,
            });
        }
        let id = message.tool_call_id.clone().unwrap_or_default();
        if !self.pending_tool_calls().iter().any(|call| call.id == id) {
            return Err(StateError::UnmatchedToolResult(id));
        }
        self.messages.push(message);
        Ok(())
    }

    /// Text of the last message if it is an assistant message.
    pub fn final_answer(&self) -> Option<String> {
        self.last()
            .filter(|m| m.role == Role::Assistant)
            .map(ChatMessage::text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "query_rag", json!({"query_text": "x"}))
    }

    #[test]
    fn seed_replays_history_before_query() {
        let history = vec![
            HistoryTurn {
                sender: Sender::User,
                text: "สวัสดี".into(),
            },
            HistoryTurn {
                sender: Sender::Bot,
                text: "สวัสดีครับ".into(),
            },
            HistoryTurn {
                sender: Sender::Bot,
                text: "   ".into(),
            },
        ];
        let state = ConversationState::seed("งบลงทุนคืออะไร", Mode::Document, &history);
        let roles: Vec<Role> = state.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
        assert_eq!(state.original_query(), "งบลงทุนคืออะไร");
        assert_eq!(state.last().unwrap().text(), "งบลงทุนคืออะไร");
    }

    #[test]
    fn pending_calls_shrink_as_results_arrive() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        state
            .push_assistant(ChatMessage::assistant_with_tools(
                vec![],
                vec![call("a"), call("b")],
            ))
            .unwrap();
        assert_eq!(state.pending_tool_calls().len(), 2);

        state
            .push_tool_result(ChatMessage::tool_result("a", "query_rag", "r"))
            .unwrap();
        let pending = state.pending_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
    }

    #[test]
    fn repeated_and_empty_call_ids_are_made_unique() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        state
            .push_assistant(ChatMessage::assistant_with_tools(
                vec![],
                vec![call("x"), call("x"), call("")],
            ))
            .unwrap();

        let ids: Vec<String> = state.pending_tool_calls().into_iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "x");
        assert!(ids.iter().all(|id| !id.is_empty()));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);
    }

    #[test]
    fn rejects_unmatched_and_duplicate_results() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        state
            .push_assistant(ChatMessage::assistant_with_tools(vec![], vec![call("a")]))
            .unwrap();

        assert_eq!(
            state.push_tool_result(ChatMessage::tool_result("zzz", "query_rag", "r")),
            Err(StateError::UnmatchedToolResult("zzz".into()))
        );
        state
            .push_tool_result(ChatMessage::tool_result("a", "query_rag", "r"))
            .unwrap();
        assert!(state
            .push_tool_result(ChatMessage::tool_result("a", "query_rag", "again"))
            .is_err());
    }

    #[test]
    fn assistant_turn_refused_while_calls_pending() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        state
            .push_assistant(ChatMessage::assistant_with_tools(vec![], vec![call("a")]))
            .unwrap();
        assert_eq!(
            state.push_assistant(ChatMessage::assistant("done")),
            Err(StateError::PendingToolCalls(1))
        );
        assert!(state.push_assistant(ChatMessage::user("x")).is_err());
    }

    #[test]
    fn history_text_accepts_block_lists() {
        let turn: HistoryTurn = serde_json::from_value(json!({
            "sender": "bot",
            "text": [{"type": "text", "text": "ตอบ"}, {"type": "thinking", "thinking": "x"}]
        }))
        .unwrap();
        assert_eq!(turn.sender, Sender::Bot);
        assert_eq!(turn.text, "ตอบ");
    }

    #[test]
    fn mode_defaults_to_document() {
        assert_eq!(Mode::default(), Mode::Document);
        let mode: Mode = serde_json::from_value(json!("general")).unwrap();
        assert_eq!(mode, Mode::General);
    }
}
