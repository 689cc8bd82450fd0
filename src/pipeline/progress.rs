use super::{JobStatus, PipelineJob, StepName, StepStatus};
use serde::Serialize;
use std::time::Duration;

/// Calibrated time to process one listing photo.
pub const SECONDS_PER_IMAGE: u64 = 8;

// A running step never earns full credit; that is reserved for `done`.
const RUNNING_STEP_WEIGHT: f64 = 0.9;

pub fn progress_percent(job: &PipelineJob) -> u8 {
    let total = job.steps.len();
    if total == 0 {
        return 0;
    }
    let done = job
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::Done)
        .count();
    let partial = job
        .running_step()
        .and_then(|step| step.progress)
        .map(|progress| progress.fraction())
        .unwrap_or(0.0);
    let percent = ((done as f64 + partial * RUNNING_STEP_WEIGHT) / total as f64) * 100.0;
    percent.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Eta {
    Remaining { seconds: u64 },
    Finished { label: &'static str },
}

impl Eta {
    pub fn label(&self) -> String {
        match self {
            Eta::Remaining { seconds } => {
                let duration = Duration::from_secs(*seconds);
                let minutes = duration.as_secs() / 60;
                let secs = duration.as_secs() % 60;
                if minutes > 0 {
                    format!("~{minutes}m {secs}s left")
                } else {
                    format!("~{secs}s left")
                }
            }
            Eta::Finished { label } => (*label).to_string(),
        }
    }
}

/// Only image processing reports per-item progress, so it is the only step
/// with an estimate. Terminal jobs get a fixed label.
pub fn eta(job: &PipelineJob) -> Option<Eta> {
    match job.status {
        JobStatus::Completed => return Some(Eta::Finished { label: "Complete" }),
        JobStatus::Failed => return Some(Eta::Finished { label: "Failed" }),
        JobStatus::Queued | JobStatus::Processing => {}
    }
    let step = job.step(StepName::ProcessImages)?;
    if step.status != StepStatus::Running {
        return None;
    }
    let progress = step.progress?;
    Some(Eta::Remaining {
        seconds: u64::from(progress.remaining()) * SECONDS_PER_IMAGE,
    })
}
