use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder renders
// whatever a metrics layer forwards to it.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "storeops.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn classification(category_id: &str, defaulted: bool) {
    trace!(
        target = "storeops.metrics",
        category_id = category_id,
        defaulted = defaulted,
        "classifications_total_inc"
    );
}

pub fn event_applied(kind: &'static str) {
    trace!(
        target = "storeops.metrics",
        kind = kind,
        "pipeline_events_applied_inc"
    );
}

pub fn event_dropped() {
    trace!(target = "storeops.metrics", "pipeline_events_dropped_inc");
}

pub fn job_swept() {
    trace!(target = "storeops.metrics", "pipeline_jobs_swept_inc");
}
