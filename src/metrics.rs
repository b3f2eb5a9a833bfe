use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{trace, warn};

// Counters are emitted as trace events; the Prometheus handle only renders
// what the exporter itself records.

pub fn install_recorder() -> PrometheusHandle {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => handle,
        Err(err) => {
            warn!(target = "ingest.metrics", error = %err, "prometheus_install_failed");
            PrometheusBuilder::new().build_recorder().handle()
        }
    }
}

pub fn inc_requests(route: &'static str) {
    trace!(target = "ingest.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "ingest.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn row_outcome(outcome: &'static str) {
    trace!(target = "ingest.metrics", outcome = outcome, "row_outcome");
}

pub fn image_upload(succeeded: bool) {
    trace!(
        target = "ingest.metrics",
        outcome = if succeeded { "success" } else { "failure" },
        "image_upload"
    );
}
