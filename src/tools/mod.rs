//! Tools exposed to the model and the registry that resolves them by name.
//!
//! The set of tools is fixed at startup. Handlers share one signature
//! (`Value` arguments in, `Value` result out) so the dispatcher never needs to
//! know which tool it is running.

mod budget;
mod retrieval;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::llm::{LlmError, ToolSchema};

pub use budget::{check_budget_discipline, BudgetDisciplineCheck, BudgetDisciplineReport};
pub use retrieval::{format_passages, Passage, PassageSearch, QueryRag, NOT_FOUND_SENTINEL};

/// Failure of a single tool call. Always recoverable: the dispatcher turns it
/// into a tool result the model can read.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("tool execution failed: {0}")]
    Execution(String),

    #[error("external service error: {0}")]
    ExternalService(#[from] LlmError),

    #[error("tool timed out after {0:?}")]
    Timeout(Duration),
}

/// A callable the model may request.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Registry of available tools, keyed by name. Registration order is kept
/// for the schemas sent to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the document tools: retrieval and budget discipline.
    pub fn for_documents(search: Arc<dyn PassageSearch>, top_k: usize) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(QueryRag::new(search, top_k)));
        registry.register(Arc::new(BudgetDisciplineCheck));
        registry
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        } else {
            tracing::warn!(tool = %name, "Replacing already registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.ordered()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Schemas in registration order, ready to bind to a model call.
    pub fn get_tool_schemas(&self) -> Vec<ToolSchema> {
        self.ordered()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Look up and run a tool.
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args).await
    }

    fn ordered(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }
}

/// Read a required numeric argument. Numeric strings are accepted since
/// models occasionally quote numbers.
pub(crate) fn number_arg(args: &Value, key: &str) -> Result<Option<f64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| ToolError::InvalidArgument(format!("'{}' is not a finite number", key))),
        Some(Value::String(s)) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ToolError::InvalidArgument(format!("'{}' is not a number: {}", key, s))),
        Some(other) => Err(ToolError::InvalidArgument(format!(
            "'{}' must be a number, got {}",
            key, other
        ))),
    }
}
