use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // Engine Metrics
    pub static ref QUESTION_ACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "qengine_question_actions_total",
        "Total number of actions processed by question attempts",
        &["behaviour", "outcome"]
    )
    .unwrap();

    pub static ref OUT_OF_SEQUENCE_TOTAL: IntCounter = register_int_counter!(
        "qengine_out_of_sequence_total",
        "Total number of submissions rejected as out of sequence"
    )
    .unwrap();

    pub static ref ATTEMPTS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "qengine_attempts_started_total",
        "Total number of question attempts started",
        &["behaviour"]
    )
    .unwrap();

    pub static ref REGRADES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "qengine_regrades_total",
        "Total number of question attempts regraded",
        &["status"]
    )
    .unwrap();

    // Storage Metrics (MongoDB)
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "qengine_store_operations_total",
        "Total number of usage store operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "qengine_store_operation_duration_seconds",
        "Usage store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track usage store operation with metrics
pub async fn track_store_operation<F, T>(operation: &str, future: F) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

pub fn record_action(behaviour: &str, outcome: &str) {
    QUESTION_ACTIONS_TOTAL
        .with_label_values(&[behaviour, outcome])
        .inc();
}

pub fn record_attempt_started(behaviour: &str) {
    ATTEMPTS_STARTED_TOTAL.with_label_values(&[behaviour]).inc();
}

pub fn record_out_of_sequence() {
    OUT_OF_SEQUENCE_TOTAL.inc();
}

pub fn record_regrade(status: &str) {
    REGRADES_TOTAL.with_label_values(&[status]).inc();
}
