//! Hybrid retriever backing the `query_rag` tool.

use std::sync::Arc;

use async_trait::async_trait;

use crate::tools::{Passage, PassageSearch, ToolError};

use super::embedding::Embedder;
use super::sparse::Bm25Encoder;
use super::store::VectorStore;

pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    sparse: Bm25Encoder,
    store: Arc<dyn VectorStore>,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            sparse: Bm25Encoder::default(),
            store,
        }
    }
}

#[async_trait]
impl PassageSearch for HybridRetriever {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Passage>, ToolError> {
        let dense = self.embedder.embed_query(query).await?;
        let sparse = self.sparse.encode_query(query);
        let passages = self.store.hybrid_query(&dense, &sparse, limit).await?;
        Ok(passages.into_iter().take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::rag::sparse::SparseVector;
    use crate::rag::store::ChunkPoint;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![0.0, 1.0])
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            unreachable!()
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Err(LlmError::Api {
                service: "gemini",
                status: 429,
                body: "quota".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        queries: Mutex<Vec<(Vec<f32>, SparseVector, usize)>>,
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        async fn ensure_collection(&self, _recreate: bool) -> Result<(), LlmError> {
            Ok(())
        }
        async fn delete_stale_points(
            &self,
            _document_id: &str,
            _keep: &[Uuid],
        ) -> Result<(), LlmError> {
            Ok(())
        }
        async fn upsert(&self, _points: &[ChunkPoint]) -> Result<(), LlmError> {
            Ok(())
        }
        async fn hybrid_query(
            &self,
            dense: &[f32],
            sparse: &SparseVector,
            limit: usize,
        ) -> Result<Vec<Passage>, LlmError> {
            self.queries
                .lock()
                .unwrap()
                .push((dense.to_vec(), sparse.clone(), limit));
            Ok((1..=10)
                .map(|page| Passage {
                    content: format!("page {}", page),
                    page: Some(page),
                    source: None,
                    score: 1.0 / page as f32,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn sends_query_embedding_and_sparse_terms() {
        let store = Arc::new(RecordingStore::default());
        let retriever = HybridRetriever::new(Arc::new(UnitEmbedder), store.clone());

        let passages = retriever.search("งบลงทุน", 8).await.unwrap();
        assert_eq!(passages.len(), 8);

        let queries = store.queries.lock().unwrap();
        let (dense, sparse, limit) = &queries[0];
        assert_eq!(dense, &vec![0.0, 1.0]);
        assert_eq!(sparse.indices.len(), 6);
        assert_eq!(*limit, 8);
    }

    #[tokio::test]
    async fn embedding_failure_is_external_service_error() {
        let retriever =
            HybridRetriever::new(Arc::new(DownEmbedder), Arc::new(RecordingStore::default()));
        let err = retriever.search("q", 8).await.unwrap_err();
        assert!(matches!(err, ToolError::ExternalService(LlmError::Api { status: 429, .. })));
    }
}
