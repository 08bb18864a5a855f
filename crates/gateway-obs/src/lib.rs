//! Prometheus metrics for the admission/batching core: a handful of
//! gauges/counters that need registering once and updating from a
//! background task.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder};
use std::time::Duration;

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        "gateway_requests_total",
        "Total ingress requests, by endpoint",
        &["endpoint"]
    )
    .unwrap()
});

static UPSTREAM_CALLS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("gateway_upstream_calls_total", "Total LLM upstream calls").unwrap()
});

static UPSTREAM_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!(
        "gateway_upstream_retries_total",
        "Total retries after a transient upstream error or reply mismatch"
    )
    .unwrap()
});

static TOKEN_BUCKET_LEVEL: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("gateway_token_bucket_level", "Current admission token count").unwrap()
});

static MERGE_BATCH_SIZE: Lazy<Histogram> = Lazy::new(|| {
    prometheus::register_histogram!(
        "gateway_merge_batch_size",
        "Number of requests coalesced into one merge-flow upstream call"
    )
    .unwrap()
});

static SPLIT_PARTS: Lazy<Histogram> = Lazy::new(|| {
    prometheus::register_histogram!(
        "gateway_split_parts",
        "Number of parallel sub-requests a split-flow request was divided into"
    )
    .unwrap()
});

/// Registers every metric. Idempotent; call once at start-up before serving
/// traffic so `/metrics` always reports a full, stable set of series.
pub fn init() {
    let _ = &*REQUESTS_TOTAL;
    let _ = &*UPSTREAM_CALLS_TOTAL;
    let _ = &*UPSTREAM_RETRIES_TOTAL;
    let _ = &*TOKEN_BUCKET_LEVEL;
    let _ = &*MERGE_BATCH_SIZE;
    let _ = &*SPLIT_PARTS;
    tracing::info!("metrics registered");
}

pub fn record_request(endpoint: &str) {
    REQUESTS_TOTAL.with_label_values(&[endpoint]).inc();
}

pub fn record_upstream_call() {
    UPSTREAM_CALLS_TOTAL.inc();
}

pub fn record_upstream_retry() {
    UPSTREAM_RETRIES_TOTAL.inc();
}

pub fn observe_merge_batch_size(size: usize) {
    MERGE_BATCH_SIZE.observe(size as f64);
}

pub fn observe_split_parts(parts: usize) {
    SPLIT_PARTS.observe(parts as f64);
}

pub fn set_token_bucket_level(level: u32) {
    TOKEN_BUCKET_LEVEL.set(level as i64);
}

/// Renders every registered metric in the Prometheus text exposition
/// format, paired with the content-type header value it must be served
/// under.
pub fn render() -> (String, Vec<u8>) {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    ENCODER.encode(&metric_families, &mut buffer).expect("prometheus text encoding never fails");
    (ENCODER.format_type().to_string(), buffer)
}

/// Polls `sample` on an interval and feeds it to the token-bucket-level
/// gauge. `sample` is typically `AdaptiveTokenBucket::current_tokens`.
pub fn spawn_token_bucket_sampler<F>(interval: Duration, mut sample: F)
where
    F: FnMut() -> u32 + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            set_token_bucket_level(sample());
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_after_init() {
        init();
        let before = UPSTREAM_CALLS_TOTAL.get();
        record_upstream_call();
        assert_eq!(UPSTREAM_CALLS_TOTAL.get(), before + 1);
    }
}
