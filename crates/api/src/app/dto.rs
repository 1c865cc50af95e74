//! Request/response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sibyl_core::{Job, JobId, JobStatus, SourceRef};

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct JobCreateResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

impl JobCreateResponse {
    pub fn accepted(job_id: JobId) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            message: "Job accepted and queued for processing.".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobResultResponse {
    pub id: JobId,
    pub question: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
}

impl From<Job> for JobResultResponse {
    fn from(job: Job) -> Self {
        let processing_time_seconds = job.processing_time_seconds();
        Self {
            id: job.id,
            question: job.question,
            status: job.status,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result_text: job.result_text,
            sources: job.sources,
            processing_time_seconds,
        }
    }
}
