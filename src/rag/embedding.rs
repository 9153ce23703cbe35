//! Dense embeddings through the Gemini embedding API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{GeminiClient, LlmError};

/// Largest batch `batchEmbedContents` accepts.
const MAX_BATCH: usize = 100;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed chunks for storage, one vector per input, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

#[derive(Debug, Clone, Copy)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            TaskType::Document => "RETRIEVAL_DOCUMENT",
            TaskType::Query => "RETRIEVAL_QUERY",
        }
    }
}

pub struct GeminiEmbedder {
    client: GeminiClient,
    model: String,
    dimension: usize,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient, model: String, dimension: usize) -> Self {
        let model = model
            .strip_prefix("models/")
            .unwrap_or(&model)
            .to_string();
        Self {
            client,
            model,
            dimension,
        }
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = self.client.model_url(&self.model, "batchEmbedContents");
        let body = batch_request(&self.model, texts, task, self.dimension);
        let response = self.client.post_json(&url, &body).await?;
        parse_batch_response(response, texts.len())
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(MAX_BATCH).enumerate() {
            tracing::debug!(batch = i, size = batch.len(), "Embedding chunk batch");
            vectors.extend(self.embed_batch(batch, TaskType::Document).await?);
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vectors = self
            .embed_batch(&[text.to_string()], TaskType::Query)
            .await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::invalid_response("gemini", "no embedding returned"))
    }
}

fn batch_request(model: &str, texts: &[String], task: TaskType, dimension: usize) -> Value {
    let requests: Vec<Value> = texts
        .iter()
        .map(|text| {
            json!({
                "model": format!("models/{}", model),
                "content": { "parts": [{ "text": text }] },
                "taskType": task.as_str(),
                "outputDimensionality": dimension,
            })
        })
        .collect();
    json!({ "requests": requests })
}

#[derive(Deserialize)]
struct BatchResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

fn parse_batch_response(value: Value, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    let response: BatchResponse = serde_json::from_value(value)
        .map_err(|e| LlmError::invalid_response("gemini", e.to_string()))?;
    if response.embeddings.len() != expected {
        return Err(LlmError::invalid_response(
            "gemini",
            format!(
                "expected {} embeddings, got {}",
                expected,
                response.embeddings.len()
            ),
        ));
    }
    Ok(response.embeddings.into_iter().map(|e| e.values).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_task_type_and_dimension() {
        let body = batch_request(
            "gemini-embedding-001",
            &["ก".to_string(), "ข".to_string()],
            TaskType::Document,
            3072,
        );
        let requests = body["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0]["model"], "models/gemini-embedding-001");
        assert_eq!(requests[0]["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(requests[1]["content"]["parts"][0]["text"], "ข");
        assert_eq!(requests[1]["outputDimensionality"], 3072);
    }

    #[test]
    fn response_count_must_match_inputs() {
        let ok = parse_batch_response(
            json!({"embeddings": [{"values": [0.1, 0.2]}, {"values": [0.3, 0.4]}]}),
            2,
        )
        .unwrap();
        assert_eq!(ok, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);

        let err = parse_batch_response(json!({"embeddings": [{"values": [0.1]}]}), 2).unwrap_err();
        assert!(err.to_string().contains("expected 2 embeddings, got 1"));
    }

    #[test]
    fn model_prefix_is_normalized() {
        let client = GeminiClient::new("k".into(), std::time::Duration::from_secs(1));
        let embedder = GeminiEmbedder::new(client, "models/gemini-embedding-001".into(), 3072);
        assert_eq!(embedder.model, "gemini-embedding-001");
    }
}
