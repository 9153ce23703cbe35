//! PDF to page markdown through the hosted Mistral OCR model.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::LlmError;

const DEFAULT_BASE_URL: &str = "https://api.mistral.ai/v1";
const SERVICE: &str = "mistral-ocr";

/// Markdown of one PDF page. `page` starts at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPage {
    pub page: u32,
    pub markdown: String,
}

#[async_trait]
pub trait OcrService: Send + Sync {
    /// Extract markdown for every page, in page order.
    async fn pdf_to_pages(&self, pdf: &[u8]) -> Result<Vec<OcrPage>, LlmError>;
}

pub struct MistralOcr {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl MistralOcr {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl OcrService for MistralOcr {
    async fn pdf_to_pages(&self, pdf: &[u8]) -> Result<Vec<OcrPage>, LlmError> {
        let body = build_request(&self.model, pdf);
        tracing::info!(bytes = pdf.len(), model = %self.model, "Running OCR");

        let response = self
            .http
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        let pages = parse_response(value)?;
        tracing::info!(pages = pages.len(), "OCR finished");
        Ok(pages)
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            service: SERVICE,
            elapsed: timeout,
        }
    } else {
        LlmError::Http(e)
    }
}

pub(crate) fn build_request(model: &str, pdf: &[u8]) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(pdf);
    json!({
        "model": model,
        "document": {
            "type": "document_url",
            "document_url": format!("data:application/pdf;base64,{}", encoded),
        },
        "include_image_base64": false,
    })
}

#[derive(Deserialize)]
struct OcrResponse {
    pages: Vec<RawPage>,
}

#[derive(Deserialize)]
struct RawPage {
    index: u32,
    #[serde(default)]
    markdown: String,
}

/// The API numbers pages from 0; they are renumbered from 1 and sorted.
pub(crate) fn parse_response(value: Value) -> Result<Vec<OcrPage>, LlmError> {
    let response: OcrResponse = serde_json::from_value(value)
        .map_err(|e| LlmError::invalid_response(SERVICE, e.to_string()))?;

    let mut pages: Vec<OcrPage> = response
        .pages
        .into_iter()
        .map(|p| OcrPage {
            page: p.index + 1,
            markdown: p.markdown,
        })
        .collect();
    pages.sort_by_key(|p| p.page);
    Ok(pages)
}
