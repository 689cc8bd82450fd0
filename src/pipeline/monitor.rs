use super::{
    ApiCallError, ChannelMessage, JobEventSource, PipelineApi, PipelineJob, Reconciler,
    Retention, decode_message, reconciler::Moment,
};
use futures::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::{
    sync::{Mutex, Notify},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, info, warn};

/// Hosts the reconciler: subscribes to job channels, applies what arrives
/// and sweeps finished jobs once their retention runs out.
#[derive(Clone)]
pub struct JobMonitor {
    reconciler: Arc<Mutex<Reconciler>>,
    source: Arc<dyn JobEventSource>,
    api: PipelineApi,
    subscriptions: Arc<Mutex<HashMap<String, AbortHandle>>>,
    deadlines_changed: Arc<Notify>,
}

impl JobMonitor {
    /// Builds the monitor and starts its sweeper task.
    pub fn spawn(
        source: Arc<dyn JobEventSource>,
        api: PipelineApi,
        retention: Retention,
    ) -> (Self, JoinHandle<()>) {
        let monitor = Self {
            reconciler: Arc::new(Mutex::new(Reconciler::with_retention(retention))),
            source,
            api,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            deadlines_changed: Arc::new(Notify::new()),
        };
        let sweeper = monitor.clone();
        let handle = tokio::spawn(async move { sweeper.run_sweeper().await });
        (monitor, handle)
    }

    /// Starts following `job_id`. Returns `false` when it is already followed.
    pub async fn watch(&self, job_id: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains_key(job_id) {
            return false;
        }
        let monitor = self.clone();
        let id = job_id.to_string();
        let task = tokio::spawn(async move {
            let mut events = monitor.source.subscribe(&id);
            while let Some(item) = events.next().await {
                match item {
                    Ok(message) => monitor.ingest(message).await,
                    Err(err) => warn!(
                        target = "storeops.monitor",
                        job_id = %id,
                        error = %err,
                        "job channel error"
                    ),
                }
            }
            debug!(target = "storeops.monitor", job_id = %id, "job channel ended");
            monitor.subscriptions.lock().await.remove(&id);
        });
        subscriptions.insert(job_id.to_string(), task.abort_handle());
        info!(target = "storeops.monitor", job_id, "watching job");
        true
    }

    pub async fn ingest(&self, message: ChannelMessage) {
        crate::metrics::event_applied(message.kind());
        self.reconciler.lock().await.apply(message, Moment::now());
        self.deadlines_changed.notify_one();
    }

    /// Decodes and applies a raw channel payload. Malformed payloads are
    /// dropped and reported as `false`.
    pub async fn ingest_raw(&self, raw: &str) -> bool {
        match decode_message(raw) {
            Some(message) => {
                self.ingest(message).await;
                true
            }
            None => false,
        }
    }

    pub async fn job(&self, job_id: &str) -> Option<PipelineJob> {
        self.reconciler.lock().await.get(job_id).cloned()
    }

    pub async fn jobs(&self) -> Vec<PipelineJob> {
        self.reconciler
            .lock()
            .await
            .jobs()
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn is_watching(&self, job_id: &str) -> bool {
        self.subscriptions.lock().await.contains_key(job_id)
    }

    pub async fn cancel(&self, job_id: &str) -> Result<(), ApiCallError> {
        self.api.cancel(job_id).await?;
        info!(target = "storeops.monitor", job_id, "cancel requested");
        Ok(())
    }

    async fn sweep(&self) {
        let removed = self.reconciler.lock().await.sweep(Instant::now());
        if removed.is_empty() {
            return;
        }
        let mut subscriptions = self.subscriptions.lock().await;
        for job_id in removed {
            crate::metrics::job_swept();
            if let Some(handle) = subscriptions.remove(&job_id) {
                handle.abort();
            }
            info!(target = "storeops.monitor", job_id = %job_id, "job view retired");
        }
    }

    async fn run_sweeper(self) {
        loop {
            let deadline = self.reconciler.lock().await.next_deadline();
            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {
                            self.sweep().await;
                        }
                        _ = self.deadlines_changed.notified() => {}
                    }
                }
                None => self.deadlines_changed.notified().await,
            }
        }
    }
}
