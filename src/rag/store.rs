//! Qdrant collection access over its REST API.
//!
//! The collection holds one named dense vector (`dense`, cosine) and one
//! sparse vector (`sparse`, IDF applied by the index). Every point carries
//! `{page_content, metadata: {page, source, document_id}}` as payload.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::llm::LlmError;
use crate::tools::Passage;

use super::sparse::SparseVector;

const SERVICE: &str = "qdrant";
const UPSERT_BATCH: usize = 64;

/// A chunk ready to be written.
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub content: String,
    pub page: u32,
    pub source: String,
    pub document_id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing. With `recreate`, an existing
    /// collection is dropped first.
    async fn ensure_collection(&self, recreate: bool) -> Result<(), LlmError>;

    /// Insert or overwrite points by id.
    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), LlmError>;

    /// Remove the points of `document_id` whose id is not in `keep`.
    async fn delete_stale_points(&self, document_id: &str, keep: &[Uuid]) -> Result<(), LlmError>;

    /// Dense and sparse prefetch fused with reciprocal rank fusion.
    /// A missing collection yields no passages.
    async fn hybrid_query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<Passage>, LlmError>;
}

pub struct QdrantStore {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    dimension: usize,
    timeout: Duration,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        collection: String,
        dimension: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            collection,
            dimension,
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, path)
    }

    /// Send a request and return the JSON body, or `None` on 404.
    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<&Value>,
    ) -> Result<Option<Value>, LlmError> {
        let mut request = self.http.request(method, url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }
        let value = response.json().await.map_err(|e| self.transport_error(e))?;
        Ok(Some(value))
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                service: SERVICE,
                elapsed: self.timeout,
            }
        } else {
            LlmError::Http(e)
        }
    }

    async fn exists(&self) -> Result<bool, LlmError> {
        let value = self.send(Method::GET, self.url("/exists"), None).await?;
        Ok(value
            .as_ref()
            .and_then(|v| v["result"]["exists"].as_bool())
            .unwrap_or(false))
    }

    async fn create(&self) -> Result<(), LlmError> {
        let body = collection_schema(self.dimension);
        self.send(Method::PUT, self.url(""), Some(&body)).await?;

        let index = json!({ "field_name": "metadata.document_id", "field_schema": "keyword" });
        self.send(Method::PUT, self.url("/index?wait=true"), Some(&index))
            .await?;
        tracing::info!(collection = %self.collection, dimension = self.dimension, "Created collection");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, recreate: bool) -> Result<(), LlmError> {
        let exists = self.exists().await?;
        if exists && recreate {
            tracing::warn!(collection = %self.collection, "Dropping collection before re-ingest");
            self.send(Method::DELETE, self.url(""), None).await?;
        } else if exists {
            return Ok(());
        }
        self.create().await
    }

    async fn upsert(&self, points: &[ChunkPoint]) -> Result<(), LlmError> {
        for batch in points.chunks(UPSERT_BATCH) {
            let body = json!({ "points": batch.iter().map(point_json).collect::<Vec<_>>() });
            let written = self
                .send(Method::PUT, self.url("/points?wait=true"), Some(&body))
                .await?;
            if written.is_none() {
                return Err(LlmError::invalid_response(
                    SERVICE,
                    format!("collection `{}` disappeared during upsert", self.collection),
                ));
            }
        }
        Ok(())
    }

    async fn delete_stale_points(&self, document_id: &str, keep: &[Uuid]) -> Result<(), LlmError> {
        let body = json!({ "filter": stale_filter(document_id, keep) });
        self.send(Method::POST, self.url("/points/delete?wait=true"), Some(&body))
            .await?;
        tracing::debug!(document_id, kept = keep.len(), "Deleted stale chunks");
        Ok(())
    }

    async fn hybrid_query(
        &self,
        dense: &[f32],
        sparse: &SparseVector,
        limit: usize,
    ) -> Result<Vec<Passage>, LlmError> {
        let body = hybrid_query_body(dense, sparse, limit);
        match self
            .send(Method::POST, self.url("/points/query"), Some(&body))
            .await?
        {
            Some(value) => parse_query_response(&value),
            None => {
                tracing::warn!(collection = %self.collection, "Collection missing; nothing ingested yet");
                Ok(Vec::new())
            }
        }
    }
}

fn collection_schema(dimension: usize) -> Value {
    json!({
        "vectors": {
            "dense": { "size": dimension, "distance": "Cosine" }
        },
        "sparse_vectors": {
            "sparse": { "index": { "on_disk": false }, "modifier": "idf" }
        }
    })
}

/// Points of `document_id` outside `keep`. An empty `keep` matches the whole document.
fn stale_filter(document_id: &str, keep: &[Uuid]) -> Value {
    let mut filter = json!({
        "must": [{ "key": "metadata.document_id", "match": { "value": document_id } }]
    });
    if !keep.is_empty() {
        let ids: Vec<String> = keep.iter().map(Uuid::to_string).collect();
        filter["must_not"] = json!([{ "has_id": ids }]);
    }
    filter
}

fn point_json(point: &ChunkPoint) -> Value {
    json!({
        "id": point.id.to_string(),
        "vector": {
            "dense": point.dense,
            "sparse": point.sparse,
        },
        "payload": {
            "page_content": point.content,
            "metadata": {
                "page": point.page,
                "source": point.source,
                "document_id": point.document_id,
            }
        }
    })
}

fn hybrid_query_body(dense: &[f32], sparse: &SparseVector, limit: usize) -> Value {
    let mut prefetch = vec![json!({ "query": dense, "using": "dense", "limit": limit })];
    if !sparse.is_empty() {
        prefetch.push(json!({ "query": sparse, "using": "sparse", "limit": limit }));
    }
    json!({
        "prefetch": prefetch,
        "query": { "fusion": "rrf" },
        "limit": limit,
        "with_payload": true,
    })
}

fn parse_query_response(value: &Value) -> Result<Vec<Passage>, LlmError> {
    let points = value["result"]["points"]
        .as_array()
        .ok_or_else(|| LlmError::invalid_response(SERVICE, "missing result.points"))?;

    Ok(points
        .iter()
        .map(|point| {
            let payload = &point["payload"];
            let metadata = &payload["metadata"];
            Passage {
                content: payload["page_content"].as_str().unwrap_or_default().to_string(),
                page: metadata["page"].as_u64().and_then(|p| u32::try_from(p).ok()),
                source: metadata["source"].as_str().map(str::to_string),
                score: point["score"].as_f64().unwrap_or_default() as f32,
            }
        })
        .collect())
}
