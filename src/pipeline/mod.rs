//! Client-side view of background listing pipeline jobs.
//!
//! The backend runs each job through four fixed steps and reports progress
//! over a per-job event channel. This module owns the wire shapes of that
//! channel, the fold that turns it into a per-job view ([`Reconciler`]), the
//! derived progress values, and the transports that feed it.

pub mod client;
pub mod monitor;
pub mod progress;
pub mod reconciler;
pub mod source;

pub use client::{ApiCallError, PipelineApi};
pub use monitor::JobMonitor;
pub use reconciler::{Moment, Reconciler, Retention};
pub use source::{
    EventStream, FallbackSource, JobEventSource, PollSource, SourceError, SseSource,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    FetchProduct,
    GenerateDescription,
    ProcessImages,
    CreateEbayListing,
}

impl StepName {
    pub const ALL: [StepName; 4] = [
        StepName::FetchProduct,
        StepName::GenerateDescription,
        StepName::ProcessImages,
        StepName::CreateEbayListing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::FetchProduct => "fetch_product",
            StepName::GenerateDescription => "generate_description",
            StepName::ProcessImages => "process_images",
            StepName::CreateEbayListing => "create_ebay_listing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl StepStatus {
    /// Position in the step lifecycle. `done` and `error` share the last rank.
    pub const fn rank(self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Done | StepStatus::Error => 2,
        }
    }

    /// Whether an incremental event may move a step from `self` to `next`.
    pub fn may_become(self, next: StepStatus) -> bool {
        next == self || next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub current: u32,
    pub total: u32,
}

impl StepProgress {
    /// Fraction of the step's internal work, clamped to `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (f64::from(self.current) / f64::from(self.total)).clamp(0.0, 1.0)
    }

    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.current)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: StepName,
    pub status: StepStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub progress: Option<StepProgress>,
}

impl Step {
    pub fn pending(name: StepName) -> Self {
        Self {
            name,
            status: StepStatus::Pending,
            result: None,
            progress: None,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub shopify_title: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl PipelineJob {
    /// A fresh view with every step pending.
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            shopify_title: None,
            started_at: None,
            steps: StepName::ALL.iter().copied().map(Step::pending).collect(),
        }
    }

    pub fn step(&self, name: StepName) -> Option<&Step> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn step_mut(&mut self, name: StepName) -> Option<&mut Step> {
        self.steps.iter_mut().find(|step| step.name == name)
    }

    pub fn running_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::Running)
    }
}

/// Incremental update naming a single step.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub job_id: String,
    pub step: StepName,
    #[serde(default)]
    pub status: Option<StepStatus>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub progress: Option<StepProgress>,
    #[serde(default)]
    pub job_status: Option<JobStatus>,
    #[serde(default)]
    pub shopify_title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotTag {
    Snapshot,
}

/// Authoritative full state of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub tag: SnapshotTag,
    pub job: PipelineJob,
}

/// Anything the job channel can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelMessage {
    Snapshot(Snapshot),
    Step(StepEvent),
}

impl ChannelMessage {
    pub fn snapshot(job: PipelineJob) -> Self {
        ChannelMessage::Snapshot(Snapshot {
            tag: SnapshotTag::Snapshot,
            job,
        })
    }

    pub fn job_id(&self) -> &str {
        match self {
            ChannelMessage::Snapshot(snapshot) => &snapshot.job.job_id,
            ChannelMessage::Step(event) => &event.job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::Snapshot(_) => "snapshot",
            ChannelMessage::Step(_) => "step",
        }
    }

    /// Whether the job is finished once this message is applied. A step
    /// event only says so when it carries a terminal `jobStatus`.
    pub fn is_terminal(&self) -> bool {
        match self {
            ChannelMessage::Snapshot(snapshot) => snapshot.job.status.is_terminal(),
            ChannelMessage::Step(event) => event.job_status.is_some_and(JobStatus::is_terminal),
        }
    }
}

/// Parses one channel payload. Anything that does not parse is dropped.
pub fn decode_message(raw: &str) -> Option<ChannelMessage> {
    match serde_json::from_str::<ChannelMessage>(raw) {
        Ok(message) if !message.job_id().is_empty() => Some(message),
        Ok(_) => {
            debug!(target = "storeops.events", "dropping event without job id");
            crate::metrics::event_dropped();
            None
        }
        Err(err) => {
            debug!(target = "storeops.events", error = %err, "dropping malformed event");
            crate::metrics::event_dropped();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_step_event() {
        let raw = r#"{"jobId":"j1","step":"process_images","status":"running","progress":{"current":2,"total":5}}"#;
        let Some(ChannelMessage::Step(event)) = decode_message(raw) else {
            panic!("expected step event");
        };
        assert_eq!(event.job_id, "j1");
        assert_eq!(event.step, StepName::ProcessImages);
        assert_eq!(event.progress, Some(StepProgress { current: 2, total: 5 }));
        assert!(event.job_status.is_none());
    }

    #[test]
    fn decodes_snapshot() {
        let raw = r#"{"type":"snapshot","job":{"jobId":"j2","status":"processing","shopifyTitle":"Leica M6","startedAt":"2026-01-02T03:04:05Z","steps":[{"name":"fetch_product","status":"done","result":"ok"}]}}"#;
        let Some(ChannelMessage::Snapshot(snapshot)) = decode_message(raw) else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.job.job_id, "j2");
        assert_eq!(snapshot.job.shopify_title.as_deref(), Some("Leica M6"));
        assert_eq!(snapshot.job.steps.len(), 1);
        assert!(snapshot.job.started_at.is_some());
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        assert!(decode_message("not json").is_none());
        assert!(decode_message(r#"{"jobId":"j1","step":"teleport"}"#).is_none());
        assert!(decode_message(r#"{"type":"snapshot","job":{"status":"queued"}}"#).is_none());
        assert!(decode_message(r#"{"jobId":"","step":"fetch_product"}"#).is_none());
    }

    #[test]
    fn step_status_never_moves_backward() {
        assert!(StepStatus::Pending.may_become(StepStatus::Running));
        assert!(StepStatus::Running.may_become(StepStatus::Done));
        assert!(StepStatus::Running.may_become(StepStatus::Running));
        assert!(!StepStatus::Done.may_become(StepStatus::Running));
        assert!(!StepStatus::Done.may_become(StepStatus::Error));
        assert!(!StepStatus::Error.may_become(StepStatus::Pending));
    }

    #[test]
    fn progress_fraction_handles_zero_total() {
        assert_eq!(StepProgress { current: 3, total: 0 }.fraction(), 0.0);
        assert_eq!(StepProgress { current: 5, total: 10 }.fraction(), 0.5);
        assert_eq!(StepProgress { current: 12, total: 10 }.remaining(), 0);
    }
}
