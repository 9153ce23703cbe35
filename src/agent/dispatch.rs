//! Tool dispatch: answer every pending tool call of the last assistant turn.

use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use crate::llm::{ChatMessage, ToolCall};
use crate::tools::{ToolError, ToolRegistry};

use super::state::{ConversationState, StateError};

/// Run the pending calls and append one tool result per call, in the order
/// the model emitted them. Calls in a batch run concurrently; a failing,
/// unknown or timed-out call becomes an `Error: ...` result and never stops
/// the rest of the batch.
///
/// Returns the number of results appended.
pub async fn dispatch_tool_calls(
    tools: &ToolRegistry,
    state: &mut ConversationState,
    timeout: Duration,
) -> Result<usize, StateError> {
    let calls = state.pending_tool_calls();
    if calls.is_empty() {
        return Ok(0);
    }

    let results = join_all(calls.iter().map(|call| run_call(tools, call, timeout))).await;

    for (call, result) in calls.iter().zip(results) {
        let content = match result {
            Ok(value) => render_value(value),
            Err(e) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %e, "Tool call failed");
                format!("Error: {}", e)
            }
        };
        tracing::debug!(
            tool = %call.name,
            id = %call.id,
            result = %truncate_for_log(&content, 1000),
            "Tool result"
        );
        state.push_tool_result(ChatMessage::tool_result(
            call.id.clone(),
            call.name.clone(),
            content,
        ))?;
    }

    Ok(calls.len())
}

async fn run_call(
    tools: &ToolRegistry,
    call: &ToolCall,
    timeout: Duration,
) -> Result<Value, ToolError> {
    tracing::info!(
        "Calling tool: {} with args: {}",
        call.name,
        truncate_for_log(&call.arguments.to_string(), 500)
    );

    tokio::time::timeout(timeout, tools.execute(&call.name, call.arguments.clone()))
        .await
        .map_err(|_| ToolError::Timeout(timeout))?
}

/// Strings pass through; any other value is sent to the model as JSON.
fn render_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Truncate a string for logging purposes.
fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::Mode;
    use crate::llm::Role;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixed(&'static str, Value);

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "fixed"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Ok(self.1.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::Execution("boom".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Value::Null)
        }
    }

    fn registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(Fixed("text", json!("plain text"))));
        tools.register(Arc::new(Fixed("object", json!({"ok": true}))));
        tools.register(Arc::new(Failing));
        tools.register(Arc::new(Slow));
        tools
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({}))
    }

    #[tokio::test]
    async fn one_result_per_call_in_order_despite_failures() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        let calls = vec![
            call("1", "failing"),
            call("2", "text"),
            call("3", "missing_tool"),
            call("4", "object"),
        ];
        state
            .push_assistant(ChatMessage::assistant_with_tools(vec![], calls.clone()))
            .unwrap();

        let appended = dispatch_tool_calls(&registry(), &mut state, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(appended, 4);

        let results: Vec<&ChatMessage> = state
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        let ids: Vec<&str> = results
            .iter()
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);

        assert_eq!(results[0].text(), "Error: tool execution failed: boom");
        assert_eq!(results[1].text(), "plain text");
        assert_eq!(results[2].text(), "Error: unknown tool: missing_tool");
        assert_eq!(results[3].text(), r#"{"ok":true}"#);
        assert!(!state.awaiting_tool_results());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_call_becomes_error_result() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        state
            .push_assistant(ChatMessage::assistant_with_tools(
                vec![],
                vec![call("s", "slow"), call("t", "text")],
            ))
            .unwrap();

        dispatch_tool_calls(&registry(), &mut state, Duration::from_secs(1))
            .await
            .unwrap();

        let last_two = &state.messages()[state.messages().len() - 2..];
        assert!(last_two[0].text().starts_with("Error: tool timed out"));
        assert_eq!(last_two[1].text(), "plain text");
    }

    #[tokio::test]
    async fn repeated_call_ids_still_get_one_result_each() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        state
            .push_assistant(ChatMessage::assistant_with_tools(
                vec![],
                vec![call("x", "text"), call("x", "object")],
            ))
            .unwrap();

        let appended = dispatch_tool_calls(&registry(), &mut state, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(appended, 2);

        let last_two = &state.messages()[state.messages().len() - 2..];
        assert_eq!(last_two[0].text(), "plain text");
        assert_eq!(last_two[1].text(), r#"{"ok":true}"#);
        assert_ne!(last_two[0].tool_call_id, last_two[1].tool_call_id);
        assert!(!state.awaiting_tool_results());
    }

    #[tokio::test]
    async fn nothing_pending_is_a_no_op() {
        let mut state = ConversationState::seed("q", Mode::Document, &[]);
        let appended = dispatch_tool_calls(&registry(), &mut state, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(appended, 0);
        assert_eq!(state.messages().len(), 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_log("สวัสดี", 3), "สวั... [truncated]");
        assert_eq!(truncate_for_log("abc", 3), "abc");
    }
}
