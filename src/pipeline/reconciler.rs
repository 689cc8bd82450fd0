use super::{ChannelMessage, JobStatus, PipelineJob, Snapshot, StepEvent, StepStatus};
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tracing::debug;

/// How long a completed job stays visible before it is swept.
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(10);
/// How long a failed job stays visible before it is swept.
pub const FAILED_RETENTION: Duration = Duration::from_secs(15);

/// The instant an event was received, in both clocks the fold needs.
#[derive(Debug, Clone, Copy)]
pub struct Moment {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl Moment {
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            wall: Utc::now(),
        }
    }

    pub fn after(&self, elapsed: Duration) -> Self {
        Self {
            instant: self.instant + elapsed,
            wall: self.wall
                + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()),
        }
    }
}

/// Grace periods before a terminal job is swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub completed: Duration,
    pub failed: Duration,
}

impl Retention {
    fn for_status(&self, status: JobStatus) -> Option<Duration> {
        match status {
            JobStatus::Completed => Some(self.completed),
            JobStatus::Failed => Some(self.failed),
            JobStatus::Queued | JobStatus::Processing => None,
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            completed: COMPLETED_RETENTION,
            failed: FAILED_RETENTION,
        }
    }
}

#[derive(Debug)]
struct Tracked {
    seq: u64,
    job: PipelineJob,
    expires_at: Option<Instant>,
}

/// In-memory fold of job channel messages into per-job views.
///
/// `apply` is synchronous and touches one job only; jobs never affect each
/// other. Terminal jobs carry a cleanup deadline that any later message for
/// the same job cancels before it is recomputed.
#[derive(Debug, Default)]
pub struct Reconciler {
    jobs: HashMap<String, Tracked>,
    next_seq: u64,
    retention: Retention,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        Self {
            retention,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, message: ChannelMessage, at: Moment) {
        let job_id = message.job_id().to_string();
        match message {
            ChannelMessage::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            ChannelMessage::Step(event) => self.apply_step(event, at),
        }
        if let Some(tracked) = self.jobs.get_mut(&job_id) {
            tracked.expires_at = self
                .retention
                .for_status(tracked.job.status)
                .map(|keep| at.instant + keep);
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let incoming = snapshot.job;
        let tracked = self.track(&incoming.job_id, incoming.status);
        let view = &mut tracked.job;
        view.status = incoming.status;
        if incoming.shopify_title.is_some() {
            view.shopify_title = incoming.shopify_title;
        }
        if incoming.started_at.is_some() {
            view.started_at = incoming.started_at;
        }
        for step in incoming.steps {
            if let Some(existing) = view.step_mut(step.name) {
                existing.status = step.status;
                existing.result = step.result;
                existing.progress = step.progress;
            }
        }
    }

    fn apply_step(&mut self, event: StepEvent, at: Moment) {
        let initial = event.job_status.unwrap_or(JobStatus::Processing);
        let tracked = self.track(&event.job_id, initial);
        let view = &mut tracked.job;

        if view.started_at.is_none() && event.status == Some(StepStatus::Running) {
            view.started_at = Some(at.wall);
        }
        if let Some(status) = event.job_status {
            view.status = status;
        }
        if let Some(title) = event.shopify_title {
            view.shopify_title = Some(title);
        }

        let Some(step) = view.step_mut(event.step) else {
            return;
        };
        match event.status {
            Some(next) if step.status.may_become(next) => step.status = next,
            Some(next) => debug!(
                target = "storeops.events",
                job_id = %event.job_id,
                step = event.step.as_str(),
                current = ?step.status,
                ignored = ?next,
                "ignoring backward step transition"
            ),
            None if step.status == StepStatus::Pending => step.status = StepStatus::Running,
            None => {}
        }
        if let Some(detail) = event.detail {
            step.result = Some(detail);
        }
        if let Some(progress) = event.progress {
            step.progress = Some(progress);
        }
    }

    fn track(&mut self, job_id: &str, initial: JobStatus) -> &mut Tracked {
        let seq = self.next_seq;
        let tracked = self
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| Tracked {
                seq,
                job: PipelineJob::new(job_id, initial),
                expires_at: None,
            });
        if tracked.seq == seq {
            self.next_seq += 1;
        }
        tracked
    }

    /// Removes every job whose cleanup deadline is at or before `now` and
    /// returns their ids. Calling it again with the same `now` removes nothing.
    pub fn sweep(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|(_, tracked)| tracked.expires_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.jobs.remove(id);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.jobs.values().filter_map(|t| t.expires_at).min()
    }

    pub fn cleanup_deadline(&self, job_id: &str) -> Option<Instant> {
        self.jobs.get(job_id).and_then(|t| t.expires_at)
    }

    pub fn get(&self, job_id: &str) -> Option<&PipelineJob> {
        self.jobs.get(job_id).map(|t| &t.job)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Live jobs in the order they were first seen.
    pub fn jobs(&self) -> Vec<&PipelineJob> {
        let mut tracked: Vec<&Tracked> = self.jobs.values().collect();
        tracked.sort_by_key(|t| t.seq);
        tracked.into_iter().map(|t| &t.job).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StepName, StepProgress};

    fn event(job: &str, step: StepName, status: Option<StepStatus>) -> ChannelMessage {
        ChannelMessage::Step(StepEvent {
            job_id: job.to_string(),
            step,
            status,
            detail: None,
            progress: None,
            job_status: None,
            shopify_title: None,
        })
    }

    fn statuses(reconciler: &Reconciler, job: &str) -> Vec<StepStatus> {
        reconciler
            .get(job)
            .expect("job")
            .steps
            .iter()
            .map(|s| s.status)
            .collect()
    }

    #[test]
    fn first_event_creates_view_and_records_start() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        reconciler.apply(event("j1", StepName::FetchProduct, Some(StepStatus::Running)), at);

        let job = reconciler.get("j1").expect("job");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.started_at, Some(at.wall));
        assert_eq!(job.steps.len(), 4);
        assert_eq!(
            statuses(&reconciler, "j1"),
            vec![
                StepStatus::Running,
                StepStatus::Pending,
                StepStatus::Pending,
                StepStatus::Pending
            ]
        );
    }

    #[test]
    fn step_event_touches_only_named_step() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        reconciler.apply(event("j1", StepName::FetchProduct, Some(StepStatus::Done)), at);
        reconciler.apply(
            ChannelMessage::Step(StepEvent {
                job_id: "j1".into(),
                step: StepName::ProcessImages,
                status: Some(StepStatus::Running),
                detail: Some("3 of 8".into()),
                progress: Some(StepProgress { current: 3, total: 8 }),
                job_status: None,
                shopify_title: Some("Nikon F3".into()),
            }),
            at,
        );
        let job = reconciler.get("j1").expect("job");
        assert_eq!(job.shopify_title.as_deref(), Some("Nikon F3"));
        let images = job.step(StepName::ProcessImages).expect("step");
        assert_eq!(images.result.as_deref(), Some("3 of 8"));
        assert_eq!(images.progress, Some(StepProgress { current: 3, total: 8 }));
        assert_eq!(job.step(StepName::FetchProduct).map(|s| s.status), Some(StepStatus::Done));
        assert_eq!(
            job.step(StepName::CreateEbayListing).map(|s| s.status),
            Some(StepStatus::Pending)
        );
    }

    #[test]
    fn status_less_event_starts_pending_step() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(event("j1", StepName::GenerateDescription, None), Moment::now());
        let job = reconciler.get("j1").expect("job");
        assert_eq!(
            job.step(StepName::GenerateDescription).map(|s| s.status),
            Some(StepStatus::Running)
        );
        assert!(job.started_at.is_none());
    }

    #[test]
    fn step_events_do_not_regress() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        reconciler.apply(event("j1", StepName::FetchProduct, Some(StepStatus::Done)), at);
        reconciler.apply(event("j1", StepName::FetchProduct, Some(StepStatus::Running)), at);
        assert_eq!(statuses(&reconciler, "j1")[0], StepStatus::Done);
    }

    #[test]
    fn snapshot_replaces_present_steps_only() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        reconciler.apply(event("j1", StepName::CreateEbayListing, Some(StepStatus::Error)), at);

        let mut job = PipelineJob::new("j1", JobStatus::Processing);
        job.steps = vec![
            crate::pipeline::Step {
                name: StepName::FetchProduct,
                status: StepStatus::Done,
                result: Some("fetched".into()),
                progress: None,
            },
            crate::pipeline::Step {
                name: StepName::GenerateDescription,
                status: StepStatus::Running,
                result: None,
                progress: None,
            },
        ];
        let snapshot = ChannelMessage::snapshot(job);
        reconciler.apply(snapshot.clone(), at);
        let once = reconciler.get("j1").cloned().expect("job");
        assert_eq!(
            statuses(&reconciler, "j1"),
            vec![
                StepStatus::Done,
                StepStatus::Running,
                StepStatus::Pending,
                StepStatus::Error
            ]
        );

        reconciler.apply(snapshot, at);
        assert_eq!(reconciler.get("j1"), Some(&once));
    }

    #[test]
    fn snapshot_is_authoritative_for_retries() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        reconciler.apply(event("j1", StepName::FetchProduct, Some(StepStatus::Error)), at);
        let mut job = PipelineJob::new("j1", JobStatus::Processing);
        job.steps.truncate(1);
        job.steps[0].status = StepStatus::Running;
        reconciler.apply(ChannelMessage::snapshot(job), at);
        assert_eq!(statuses(&reconciler, "j1")[0], StepStatus::Running);
    }

    #[test]
    fn disjoint_step_events_commute() {
        let at = Moment::now();
        let a = event("j1", StepName::FetchProduct, Some(StepStatus::Done));
        let b = event("j1", StepName::ProcessImages, Some(StepStatus::Running));

        let mut forward = Reconciler::new();
        forward.apply(a.clone(), at);
        forward.apply(b.clone(), at);

        let mut reverse = Reconciler::new();
        reverse.apply(b, at);
        reverse.apply(a, at);

        assert_eq!(forward.get("j1"), reverse.get("j1"));
    }

    #[test]
    fn jobs_are_independent() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        reconciler.apply(event("a", StepName::FetchProduct, Some(StepStatus::Done)), at);
        reconciler.apply(event("b", StepName::FetchProduct, Some(StepStatus::Error)), at);
        assert_eq!(statuses(&reconciler, "a")[0], StepStatus::Done);
        assert_eq!(statuses(&reconciler, "b")[0], StepStatus::Error);
        let order: Vec<&str> = reconciler.jobs().iter().map(|j| j.job_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn failed_job_is_swept_after_fifteen_seconds() {
        let mut reconciler = Reconciler::new();
        let start = Moment::now();
        let mut failing = StepEvent {
            job_id: "j1".into(),
            step: StepName::CreateEbayListing,
            status: Some(StepStatus::Error),
            detail: Some("ebay rejected".into()),
            progress: None,
            job_status: Some(JobStatus::Failed),
            shopify_title: None,
        };
        reconciler.apply(ChannelMessage::Step(failing.clone()), start);

        assert!(reconciler.sweep(start.after(Duration::from_millis(14_999)).instant).is_empty());
        assert_eq!(
            reconciler.sweep(start.after(Duration::from_secs(15)).instant),
            vec!["j1".to_string()]
        );
        assert!(reconciler.sweep(start.after(Duration::from_secs(15)).instant).is_empty());

        // A late event recreates the view and restarts the clock from its arrival.
        failing.detail = Some("retry scheduled".into());
        reconciler.apply(ChannelMessage::Step(failing), start.after(Duration::from_secs(16)));
        assert!(reconciler.contains("j1"));
    }

    #[test]
    fn new_event_resets_cleanup_timer() {
        let mut reconciler = Reconciler::new();
        let start = Moment::now();
        let failed = ChannelMessage::Step(StepEvent {
            job_id: "j1".into(),
            step: StepName::ProcessImages,
            status: Some(StepStatus::Error),
            detail: None,
            progress: None,
            job_status: Some(JobStatus::Failed),
            shopify_title: None,
        });
        reconciler.apply(failed.clone(), start);
        let late = start.after(Duration::from_secs(14));
        reconciler.apply(failed, late);

        assert!(reconciler.sweep(start.after(Duration::from_secs(16)).instant).is_empty());
        assert_eq!(
            reconciler.cleanup_deadline("j1"),
            Some(late.instant + FAILED_RETENTION)
        );
        assert_eq!(reconciler.sweep(late.after(FAILED_RETENTION).instant).len(), 1);
    }

    #[test]
    fn reopened_job_cancels_cleanup() {
        let mut reconciler = Reconciler::new();
        let at = Moment::now();
        let mut done = PipelineJob::new("j1", JobStatus::Completed);
        for step in &mut done.steps {
            step.status = StepStatus::Done;
        }
        reconciler.apply(ChannelMessage::snapshot(done), at);
        assert_eq!(reconciler.next_deadline(), Some(at.instant + COMPLETED_RETENTION));

        reconciler.apply(
            ChannelMessage::Step(StepEvent {
                job_id: "j1".into(),
                step: StepName::CreateEbayListing,
                status: None,
                detail: Some("relisting".into()),
                progress: None,
                job_status: Some(JobStatus::Processing),
                shopify_title: None,
            }),
            at.after(Duration::from_secs(5)),
        );
        assert_eq!(reconciler.next_deadline(), None);
        assert!(reconciler.sweep(at.after(Duration::from_secs(60)).instant).is_empty());
    }
}
