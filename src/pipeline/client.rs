use super::PipelineJob;
use crate::http::{HttpTimeouts, build_client};
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiCallError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// REST surface of the backend job runner.
#[derive(Debug, Clone)]
pub struct PipelineApi {
    base_url: String,
    http: Client,
}

impl PipelineApi {
    pub fn new(base_url: &str, timeouts: HttpTimeouts) -> Self {
        Self::with_client(base_url, build_client(timeouts))
    }

    pub fn with_client(base_url: &str, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!(
            "{}/api/pipeline/{}",
            self.base_url,
            urlencoding::encode(job_id)
        )
    }

    pub fn events_url(&self, job_id: &str) -> String {
        format!("{}/events", self.job_url(job_id))
    }

    pub fn cancel_url(&self, job_id: &str) -> String {
        format!("{}/cancel", self.job_url(job_id))
    }

    pub async fn fetch_job(&self, job_id: &str) -> Result<PipelineJob, ApiCallError> {
        let response = self
            .http
            .get(self.job_url(job_id))
            .send()
            .await
            .map_err(|err| ApiCallError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiCallError::Status(response.status().as_u16()));
        }
        response
            .json::<PipelineJob>()
            .await
            .map_err(|err| ApiCallError::Deserialize(err.to_string()))
    }

    /// Asks the backend to stop a job. The local view only changes once the
    /// backend reports the new state on the job channel.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ApiCallError> {
        let response = self
            .http
            .post(self.cancel_url(job_id))
            .send()
            .await
            .map_err(|err| ApiCallError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiCallError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_escape_job_ids() {
        let api = PipelineApi::new("http://backend.local/", HttpTimeouts::default());
        assert_eq!(api.job_url("j 1"), "http://backend.local/api/pipeline/j%201");
        assert_eq!(
            api.events_url("abc"),
            "http://backend.local/api/pipeline/abc/events"
        );
        assert_eq!(
            api.cancel_url("abc"),
            "http://backend.local/api/pipeline/abc/cancel"
        );
    }
}
