//! Core agent loop implementation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::llm::{ChatMessage, LlmClient, LlmError, Role, ToolSchema};
use crate::tools::ToolRegistry;

use super::dispatch::dispatch_tool_calls;
use super::prompt::build_system_prompt;
use super::state::{ConversationState, HistoryTurn, Mode, StateError};

/// Answer returned when the loop ends without usable text.
pub const UNABLE_TO_COMPLETE: &str =
    "ขออภัย ไม่สามารถหาคำตอบให้เสร็จสมบูรณ์ได้ในจำนวนรอบที่กำหนด";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model call failed: {0}")]
    Model(#[from] LlmError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("agent run did not finish within {0:?}")]
    Timeout(Duration),
}

/// What the continuation policy decided after an agent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The last message has no tool calls: return its text.
    End,
    /// The last message requests tools: dispatch them, then step again.
    Continue,
}

/// Inspect only the most recent message.
pub fn decide(state: &ConversationState) -> Decision {
    match state.last() {
        Some(message) if message.has_tool_calls() => Decision::Continue,
        _ => Decision::End,
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    /// The model kept requesting tools past the round-trip cap.
    RoundTripLimit,
}

/// Final answer plus the transcript of one run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub termination: Termination,
    /// Completed agent-step + tool-dispatch cycles.
    pub round_trips: usize,
    pub messages: Vec<ChatMessage>,
}

/// Loop limits and deadlines.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub run_timeout: Duration,
}

impl From<&Config> for AgentSettings {
    fn from(config: &Config) -> Self {
        Self {
            model: config.chat_model.clone(),
            max_iterations: config.max_iterations,
            model_timeout: config.timeouts.model,
            tool_timeout: config.timeouts.tool,
            run_timeout: config.timeouts.run,
        }
    }
}

/// The document question-answering agent.
pub struct Agent {
    settings: AgentSettings,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
}

impl Agent {
    pub fn new(settings: AgentSettings, llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            settings,
            llm,
            tools,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Answer one user message.
    ///
    /// Seeds a fresh state from `query`, `mode` and the replayed `history`,
    /// then alternates agent steps and tool dispatches until the model stops
    /// requesting tools or the round-trip cap is hit.
    pub async fn run(
        &self,
        query: &str,
        mode: Mode,
        history: &[HistoryTurn],
    ) -> Result<AgentOutcome, AgentError> {
        let state = ConversationState::seed(query, mode, history);
        tracing::info!(
            mode = ?mode,
            history = history.len(),
            query_len = query.chars().count(),
            "Starting agent run"
        );

        tokio::time::timeout(self.settings.run_timeout, self.drive(state))
            .await
            .map_err(|_| AgentError::Timeout(self.settings.run_timeout))?
    }

    async fn drive(&self, mut state: ConversationState) -> Result<AgentOutcome, AgentError> {
        let mut round_trips = 0;

        loop {
            tracing::debug!("Agent iteration {}", round_trips + 1);
            self.step(&mut state).await?;

            match decide(&state) {
                Decision::End => {
                    return Ok(finish(state, Termination::Completed, round_trips));
                }
                Decision::Continue if round_trips >= self.settings.max_iterations => {
                    tracing::warn!(
                        round_trips,
                        max = self.settings.max_iterations,
                        "Round-trip cap reached with tool calls still requested"
                    );
                    return Ok(finish(state, Termination::RoundTripLimit, round_trips));
                }
                Decision::Continue => {
                    let dispatched =
                        dispatch_tool_calls(&self.tools, &mut state, self.settings.tool_timeout)
                            .await?;
                    round_trips += 1;
                    tracing::debug!(dispatched, round_trips, "Tool batch complete");
                }
            }
        }
    }

    /// Call the model once and append its reply.
    ///
    /// Document mode binds every registered tool; general mode binds none,
    /// and any tool call a provider returns anyway is dropped.
    pub async fn step(&self, state: &mut ConversationState) -> Result<(), AgentError> {
        let pending = state.pending_tool_calls().len();
        if pending > 0 {
            return Err(StateError::PendingToolCalls(pending).into());
        }

        let schemas: Option<Vec<ToolSchema>> = match state.mode() {
            Mode::Document if !self.tools.is_empty() => Some(self.tools.get_tool_schemas()),
            _ => None,
        };

        let mut messages = Vec::with_capacity(state.messages().len() + 1);
        messages.push(ChatMessage::system(build_system_prompt(
            state.mode(),
            &self.tools,
        )));
        messages.extend(state.messages().iter().cloned());

        let mut response = tokio::time::timeout(
            self.settings.model_timeout,
            self.llm
                .chat_completion(&self.settings.model, &messages, schemas.as_deref()),
        )
        .await
        .map_err(|_| LlmError::Timeout {
            service: "model",
            elapsed: self.settings.model_timeout,
        })??;

        response.role = Role::Assistant;
        response.tool_call_id = None;
        response.name = None;
        if schemas.is_none() && response.has_tool_calls() {
            tracing::warn!(
                count = response.tool_calls.len(),
                "Dropping tool calls returned without tools bound"
            );
            response.tool_calls.clear();
        }

        tracing::debug!(
            tool_calls = response.tool_calls.len(),
            text_len = response.text().chars().count(),
            "Model replied"
        );
        state.push_assistant(response)?;
        Ok(())
    }
}

fn finish(state: ConversationState, termination: Termination, round_trips: usize) -> AgentOutcome {
    let answer = state
        .final_answer()
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| UNABLE_TO_COMPLETE.to_string());

    tracing::info!(
        termination = ?termination,
        round_trips,
        answer_len = answer.chars().count(),
        "Agent run finished"
    );

    AgentOutcome {
        answer,
        termination,
        round_trips,
        messages: state.into_messages(),
    }
}
