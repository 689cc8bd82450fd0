use crate::{
    category::ClassificationResult,
    condition::ConditionMatch,
    pipeline::{
        PipelineJob,
        progress::{self, Eta},
    },
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassifyRequest {
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassifyResponse {
    pub category: ClassificationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionMatch>,
}

#[derive(Debug, Deserialize)]
pub struct BulkClassifyRequest {
    pub items: Vec<ClassifyRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkClassifyResponse {
    pub results: Vec<ClassifyResponse>,
}

/// A job as the console renders it: the reconciled view plus derived values.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    #[serde(flatten)]
    pub job: PipelineJob,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<Eta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_label: Option<String>,
}

impl From<PipelineJob> for JobView {
    fn from(job: PipelineJob) -> Self {
        let eta = progress::eta(&job);
        Self {
            progress_percent: progress::progress_percent(&job),
            eta_label: eta.as_ref().map(Eta::label),
            eta,
            job,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Serialize)]
pub struct WatchResponse {
    pub job_id: String,
    pub already_watching: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub message: String,
}
