//! Document ingestion and hybrid retrieval.
//!
//! Upload path: PDF → OCR pages → page chunks → dense + sparse vectors → Qdrant.
//! Query path: dense + sparse query vectors → fused search → passages.

mod chunking;
mod embedding;
mod ingest;
mod ocr;
mod retriever;
mod sparse;
mod store;

pub use chunking::{split_pages, PageChunk};
pub use embedding::{Embedder, GeminiEmbedder};
pub use ingest::{
    chunk_point_id, document_id, looks_like_pdf, status_text, IngestError, IngestOptions,
    IngestReport, Ingestor,
};
pub use ocr::{MistralOcr, OcrPage, OcrService};
pub use retriever::HybridRetriever;
pub use sparse::{Bm25Encoder, SparseVector};
pub use store::{ChunkPoint, QdrantStore, VectorStore};
