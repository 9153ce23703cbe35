//! Agent module - the tool-calling loop that answers questions over the documents.
//!
//! A run alternates model steps and tool dispatches:
//! seed → step → decide → (dispatch → step → decide)* → done.

mod agent_loop;
mod dispatch;
mod prompt;
mod state;

pub use agent_loop::{
    decide, Agent, AgentError, AgentOutcome, AgentSettings, Decision, Termination,
    UNABLE_TO_COMPLETE,
};
pub use dispatch::dispatch_tool_calls;
pub use prompt::{build_system_prompt, NOT_FOUND_PHRASE};
pub use state::{ConversationState, HistoryTurn, Mode, Sender, StateError};
