//! PDF ingestion: OCR, page chunking, dense and sparse embedding, index write.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::IngestMode;
use crate::llm::LlmError;

use super::chunking::split_pages;
use super::embedding::Embedder;
use super::ocr::OcrService;
use super::sparse::Bm25Encoder;
use super::store::{ChunkPoint, VectorStore};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("file is empty")]
    Empty,

    #[error("file is not a PDF")]
    NotPdf,

    #[error("OCR is not configured (set MISTRAL_API_KEY)")]
    OcrUnavailable,

    #[error("OCR returned no text")]
    NoText,

    #[error("embedding has {got} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error(transparent)]
    External(#[from] LlmError),
}

/// What one successful ingestion wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub document_id: String,
    pub pages: usize,
    pub chunks: usize,
}

impl IngestReport {
    pub fn status_text(&self) -> String {
        format!(
            "Successfully embedded {} chunks from {} pages",
            self.chunks, self.pages
        )
    }
}

/// Render an ingestion result as the status text shown to users.
pub fn status_text(result: &Result<IngestReport, IngestError>) -> String {
    match result {
        Ok(report) => report.status_text(),
        Err(e) => format!("Failed to embed: {}", e),
    }
}

/// SHA-256 of the file, hex encoded.
pub fn document_id(pdf: &[u8]) -> String {
    format!("{:x}", Sha256::digest(pdf))
}

/// Stable point id for one page of one document, so re-ingesting a file
/// overwrites its points in place.
pub fn chunk_point_id(document_id: &str, page: u32) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}/page/{}", document_id, page).as_bytes(),
    )
}

pub fn looks_like_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"%PDF-")
}

/// Settings for [`Ingestor`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub mode: IngestMode,
    pub overlap: usize,
    pub dimension: usize,
}

pub struct Ingestor {
    ocr: Option<Arc<dyn OcrService>>,
    embedder: Arc<dyn Embedder>,
    sparse: Bm25Encoder,
    store: Arc<dyn VectorStore>,
    options: IngestOptions,
    // One ingestion writes to the collection at a time.
    write_lock: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        ocr: Option<Arc<dyn OcrService>>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            ocr,
            embedder,
            sparse: Bm25Encoder::default(),
            store,
            options,
            write_lock: Mutex::new(()),
        }
    }

    /// Ingest one PDF.
    ///
    /// In upsert mode the file's points are overwritten in place and only
    /// then are its leftover points removed, so a failed write never leaves
    /// the document missing. Other documents are left alone. In recreate
    /// mode the whole collection is dropped first.
    pub async fn ingest(&self, filename: &str, pdf: &[u8]) -> Result<IngestReport, IngestError> {
        if pdf.is_empty() {
            return Err(IngestError::Empty);
        }
        if !looks_like_pdf(pdf) {
            return Err(IngestError::NotPdf);
        }
        let ocr = self.ocr.as_ref().ok_or(IngestError::OcrUnavailable)?;
        let document_id = document_id(pdf);

        let _guard = self.write_lock.lock().await;
        tracing::info!(filename, %document_id, mode = ?self.options.mode, "Ingesting document");

        let pages = ocr.pdf_to_pages(pdf).await?;
        if pages.iter().all(|p| p.markdown.trim().is_empty()) {
            return Err(IngestError::NoText);
        }

        let chunks = split_pages(&pages, self.options.overlap);
        tracing::info!(pages = pages.len(), chunks = chunks.len(), "Chunked document");

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let dense = self.embedder.embed_documents(&texts).await?;
        if let Some(bad) = dense.iter().find(|v| v.len() != self.options.dimension) {
            return Err(IngestError::DimensionMismatch {
                expected: self.options.dimension,
                got: bad.len(),
            });
        }

        let points: Vec<ChunkPoint> = chunks
            .into_iter()
            .zip(dense)
            .map(|(chunk, dense)| ChunkPoint {
                id: chunk_point_id(&document_id, chunk.page),
                sparse: self.sparse.encode_document(&chunk.content),
                content: chunk.content,
                page: chunk.page,
                source: filename.to_string(),
                document_id: document_id.clone(),
                dense,
            })
            .collect();

        let recreate = self.options.mode == IngestMode::Recreate;
        self.store.ensure_collection(recreate).await?;
        self.store.upsert(&points).await?;
        if !recreate {
            let keep: Vec<Uuid> = points.iter().map(|p| p.id).collect();
            self.store.delete_stale_points(&document_id, &keep).await?;
        }

        let report = IngestReport {
            document_id,
            pages: pages.len(),
            chunks: points.len(),
        };
        tracing::info!(chunks = report.chunks, pages = report.pages, "Ingestion finished");
        Ok(report)
    }
}
