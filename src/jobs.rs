//! In-memory ingestion job tracking (non-persistent).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::rag::{status_text, IngestError, IngestReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Done,
    Failed,
}

/// Aggregate over all known jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Idle,
    Processing,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    /// Status text once finished.
    pub message: Option<String>,
    pub chunks: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, IngestJob>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in the `processing` state.
    pub async fn create(&self, filename: &str) -> IngestJob {
        let now = Utc::now();
        let job = IngestJob {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            status: JobStatus::Processing,
            message: None,
            chunks: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        job
    }

    /// Record the outcome of an ingestion. Returns the updated job, or `None`
    /// if it was removed in the meantime.
    pub async fn finish(
        &self,
        id: Uuid,
        result: &Result<IngestReport, IngestError>,
    ) -> Option<IngestJob> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        job.status = if result.is_ok() {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        job.message = Some(status_text(result));
        job.chunks = result.as_ref().ok().map(|r| r.chunks);
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    pub async fn get(&self, id: Uuid) -> Option<IngestJob> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn status(&self) -> UploadStatus {
        let jobs = self.jobs.read().await;
        if jobs.values().any(|j| j.status == JobStatus::Processing) {
            UploadStatus::Processing
        } else if jobs.is_empty() {
            UploadStatus::Idle
        } else {
            UploadStatus::Done
        }
    }

    /// Forget finished jobs. Jobs still processing are kept.
    pub async fn reset(&self) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| job.status == JobStatus::Processing);
        before - jobs.len()
    }
}
