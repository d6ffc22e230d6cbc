use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};

use crate::planner::NodeStatus;
use crate::request::ModuleId;

struct OrchestratorMetrics {
    attempts: Counter<u64>,
    duration_ms: Histogram<f64>,
    retries: Counter<u64>,
    runs: Counter<u64>,
}

static METRICS: OnceCell<OrchestratorMetrics> = OnceCell::new();

fn handles() -> &'static OrchestratorMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("pharmresearch.orchestrator");
        OrchestratorMetrics {
            attempts: meter
                .u64_counter("specialist_attempts_total")
                .with_description("Specialist invocations by module and outcome")
                .init(),
            duration_ms: meter
                .f64_histogram("specialist_duration_ms")
                .with_description("Specialist attempt runtime in milliseconds")
                .init(),
            retries: meter
                .u64_counter("specialist_retries_total")
                .with_description("Attempts rescheduled after a retryable failure")
                .init(),
            runs: meter
                .u64_counter("research_runs_total")
                .with_description("Research runs by final outcome")
                .init(),
        }
    })
}

/// Record one finished specialist attempt (no-op if no provider installed).
pub fn record_attempt(module: ModuleId, status: NodeStatus, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("module", module.as_str()),
        KeyValue::new("status", status.as_str()),
    ];
    metrics.attempts.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_retry(module: ModuleId) {
    handles()
        .retries
        .add(1, &[KeyValue::new("module", module.as_str())]);
}

/// `outcome` is `completed` or `cancelled`.
pub fn record_run(outcome: &'static str, failed_nodes: usize) {
    handles().runs.add(
        1,
        &[
            KeyValue::new("outcome", outcome),
            KeyValue::new("failed_nodes", failed_nodes as i64),
        ],
    );
}
