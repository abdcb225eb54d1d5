use lazy_static::lazy_static;
use prometheus::register_histogram_vec;
use prometheus::register_int_counter_vec;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;

lazy_static! {
    pub(crate) static ref CALL_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "resilience_call_duration_seconds",
        "Latency of calls executed under a resilience policy",
        &["policy"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("valid metric definition");
    pub(crate) static ref RETRIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resilience_retries_total",
        "Retries performed after transient failures, per policy",
        &["policy"]
    )
    .expect("valid metric definition");
    pub(crate) static ref CIRCUIT_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "resilience_circuit_rejections_total",
        "Calls rejected because the circuit breaker was open",
        &["policy"]
    )
    .expect("valid metric definition");
}

/// Retries recorded for a policy since process start. Exposed for tests and
/// operational assertions; the scrape path goes through the default registry.
pub fn retries_for(policy: &str) -> u64 {
    RETRIES_TOTAL.with_label_values(&[policy]).get()
}
