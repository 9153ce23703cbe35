//! Document retrieval tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolError};

/// Returned when the index has nothing for the query.
pub const NOT_FOUND_SENTINEL: &str = "ไม่พบข้อมูลในเอกสาร (No documents found in database)";

const PASSAGE_SEPARATOR: &str = "\n\n---\n\n";

/// One retrieved chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub content: String,
    pub page: Option<u32>,
    pub source: Option<String>,
    pub score: f32,
}

/// Hybrid (dense + sparse) search over the document index.
#[async_trait]
pub trait PassageSearch: Send + Sync {
    /// Return up to `limit` passages, best first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Passage>, ToolError>;
}

/// Render passages as source-tagged blocks, or the not-found sentinel when empty.
pub fn format_passages(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NOT_FOUND_SENTINEL.to_string();
    }

    passages
        .iter()
        .map(|p| {
            let page = p
                .page
                .map(|n| n.to_string())
                .unwrap_or_else(|| "Unknown".to_string());
            format!("[Source: Page {}]\n{}", page, p.content.replace('\n', " "))
        })
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

/// `query_rag`: retrieve relevant passages from the ingested documents.
pub struct QueryRag {
    search: Arc<dyn PassageSearch>,
    top_k: usize,
}

impl QueryRag {
    pub fn new(search: Arc<dyn PassageSearch>, top_k: usize) -> Self {
        Self {
            search,
            top_k: top_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for QueryRag {
    fn name(&self) -> &str {
        "query_rag"
    }

    fn description(&self) -> &str {
        "Retrieve relevant passages from the uploaded law, finance and procurement documents. \
         Pass the user's question as-is (fix only obvious typos). Each passage is tagged with its page."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query_text": {
                    "type": "string",
                    "description": "The search query, usually the user's question in Thai"
                }
            },
            "required": ["query_text"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let query = args["query_text"]
            .as_str()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::InvalidArgument("Missing 'query_text' argument".into()))?;

        tracing::info!(query, top_k = self.top_k, "Searching documents");
        let passages = self.search.search(query, self.top_k).await?;
        tracing::info!(found = passages.len(), "Retrieved passages");

        for (i, p) in passages.iter().enumerate() {
            tracing::debug!(
                rank = i + 1,
                page = ?p.page,
                source = ?p.source,
                score = p.score,
                preview = %p.content.chars().take(100).collect::<String>(),
                "Passage"
            );
        }

        Ok(Value::String(format_passages(&passages)))
    }
}
