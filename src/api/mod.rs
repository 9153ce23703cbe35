//! HTTP API: conversation, document upload and ingestion status.

mod conversation;
mod routes;
mod types;
mod upload;

pub use routes::{router, serve, AppState};
pub use types::*;

#[cfg(test)]
pub(crate) mod test_support {
    //! Offline fakes for handler tests.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::AppState;
    use crate::config::Config;
    use crate::llm::{ChatMessage, LlmClient, LlmError, ToolSchema};
    use crate::rag::{
        ChunkPoint, Embedder, IngestOptions, Ingestor, OcrPage, OcrService, SparseVector,
        VectorStore,
    };
    use crate::tools::{Passage, PassageSearch, ToolError};
    use uuid::Uuid;

    /// Replays canned replies and records every request it receives.
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<ChatMessage>>,
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<ChatMessage>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Arc::default(),
            }
        }

        /// Handle to the recorded requests; stays valid after the LLM is moved.
        pub fn requests(&self) -> Arc<Mutex<Vec<Vec<ChatMessage>>>> {
            Arc::clone(&self.seen)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            messages: &[ChatMessage],
            _tools: Option<&[ToolSchema]>,
        ) -> Result<ChatMessage, LlmError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ChatMessage::assistant("ok")))
        }
    }

    struct OnePassage;

    #[async_trait]
    impl PassageSearch for OnePassage {
        async fn search(&self, _q: &str, _k: usize) -> Result<Vec<Passage>, ToolError> {
            Ok(vec![Passage {
                content: "มาตรา 20 งบลงทุน".into(),
                page: Some(4),
                source: Some("act.pdf".into()),
                score: 1.0,
            }])
        }
    }

    struct TwoPageOcr;

    #[async_trait]
    impl OcrService for TwoPageOcr {
        async fn pdf_to_pages(&self, _pdf: &[u8]) -> Result<Vec<OcrPage>, LlmError> {
            Ok(vec![
                OcrPage {
                    page: 1,
                    markdown: "หน้าแรก".into(),
                },
                OcrPage {
                    page: 2,
                    markdown: "หน้าสอง".into(),
                },
            ])
        }
    }

    struct TinyEmbedder;

    #[async_trait]
    impl Embedder for TinyEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct NullStore;

    #[async_trait]
    impl VectorStore for NullStore {
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
            _dense: &[f32],
            _sparse: &SparseVector,
            _limit: usize,
        ) -> Result<Vec<Passage>, LlmError> {
            Ok(vec![])
        }
    }

    pub fn state_with(llm: ScriptedLlm) -> Arc<AppState> {
        state_with_ocr(llm, Arc::new(TwoPageOcr))
    }

    pub fn state_with_ocr(llm: ScriptedLlm, ocr: Arc<dyn OcrService>) -> Arc<AppState> {
        let config = Config::new("test-key".into());
        let ingestor = Arc::new(Ingestor::new(
            Some(ocr),
            Arc::new(TinyEmbedder),
            Arc::new(NullStore),
            IngestOptions {
                mode: config.index.ingest_mode,
                overlap: config.index.chunk_overlap,
                dimension: 2,
            },
        ));
        Arc::new(AppState::new(
            config,
            Arc::new(llm),
            Arc::new(OnePassage),
            ingestor,
        ))
    }
}
