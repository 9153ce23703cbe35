//! # thaidoc-rag
//!
//! Question answering over Thai legal, public-finance and procurement PDFs.
//!
//! This library provides:
//! - An ingestion pipeline: hosted OCR, page chunking, dense and sparse
//!   embeddings, and a hybrid Qdrant index
//! - A tool-calling agent loop with a retrieval tool and a Section 20 budget
//!   discipline calculator
//! - An HTTP API for uploads, conversations and ingestion status
//!
//! ## Architecture
//!
//! The agent follows the "tools in a loop" pattern:
//! 1. Seed the conversation with the replayed history and the new question
//! 2. Call the model with the mode's system prompt and tools
//! 3. Run any requested tools and append their results
//! 4. Repeat until the model answers without tool calls, or the round-trip cap is hit
//!
//! ## Example
//!
//! ```rust,ignore
//! use thaidoc_rag::{api::AppState, agent::Mode, config::Config};
//!
//! let state = AppState::from_config(Config::from_env()?);
//! let outcome = state.agent.run("งบลงทุนผ่านเกณฑ์มาตรา 20 ไหม", Mode::Document, &[]).await?;
//! println!("{}", outcome.answer);
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod jobs;
pub mod llm;
pub mod rag;
pub mod tools;

pub use config::Config;
