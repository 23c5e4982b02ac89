//! Per-file conversion job and its state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// One input file's passage through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub status: JobStatus,
    /// Adapter whose output was used, once conversion succeeds.
    pub adapter: Option<String>,
    /// Dropped entity count from the stream filter.
    pub dropped_entities: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Complete,
    Failed,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl ConversionJob {
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            input_path,
            output_path,
            status: JobStatus::Queued,
            adapter: None,
            dropped_entities: 0,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub fn start_processing(&mut self) {
        self.status = JobStatus::Processing;
        self.updated_at = Utc::now();
    }

    pub fn mark_complete(&mut self, adapter: String) {
        self.status = JobStatus::Complete;
        self.adapter = Some(adapter);
        self.updated_at = Utc::now();
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.updated_at = Utc::now();
        self.error = Some(error);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        if self.status == JobStatus::Complete || self.status == JobStatus::Failed {
            Some(self.updated_at.signed_duration_since(self.created_at).num_milliseconds())
        } else {
            None
        }
    }
}
