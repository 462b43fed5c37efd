//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming. Generation latencies
//! get their own buckets since provider calls run seconds to minutes,
//! far outside normal HTTP latency ranges.

use metrics::{counter, describe_counter, describe_histogram, histogram, Label, Unit};
use std::time::Instant;

/// Metrics prefix for all Visual Neurons metrics
pub const METRICS_PREFIX: &str = "visualneurons";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for provider generation latency (seconds to minutes)
pub const GENERATION_BUCKETS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 240.0, 420.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Total generation requests by provider and outcome"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Provider generation latency in seconds"
    );

    describe_counter!(
        format!("{}_video_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Video jobs dispatched by completion mode"
    );

    describe_counter!(
        format!("{}_webhook_deliveries_total", METRICS_PREFIX),
        Unit::Count,
        "Webhook deliveries received by outcome"
    );

    describe_counter!(
        format!("{}_predictions_reconciled_total", METRICS_PREFIX),
        Unit::Count,
        "Stale predictions resolved by the reconciliation sweep"
    );

    describe_counter!(
        format!("{}_media_bytes_written_total", METRICS_PREFIX),
        Unit::Bytes,
        "Bytes written to the media store"
    );

    describe_counter!(
        format!("{}_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total errors by code"
    );
}

/// Timer for recording generation latency per provider
pub struct GenerationTimer {
    start: Instant,
    provider: String,
}

impl GenerationTimer {
    pub fn start(provider: &str) -> Self {
        Self {
            start: Instant::now(),
            provider: provider.to_string(),
        }
    }

    pub fn finish(self, outcome: &'static str) {
        let elapsed = self.start.elapsed().as_secs_f64();
        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "provider" => self.provider.clone(),
        )
        .record(elapsed);
        counter!(
            format!("{}_generations_total", METRICS_PREFIX),
            "provider" => self.provider,
            "outcome" => outcome,
        )
        .increment(1);
    }
}

/// Record a dispatched video job by completion mode
pub fn record_video_job(mode: &'static str) {
    counter!(
        format!("{}_video_jobs_total", METRICS_PREFIX),
        "mode" => mode,
    )
    .increment(1);
}

/// Record a received webhook delivery by outcome
pub fn record_webhook_delivery(outcome: &'static str) {
    counter!(
        format!("{}_webhook_deliveries_total", METRICS_PREFIX),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Record a stale prediction resolved by the reconciliation sweep
pub fn record_reconciled(outcome: &'static str) {
    counter!(
        format!("{}_predictions_reconciled_total", METRICS_PREFIX),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Record a handled HTTP request with its latency
pub fn record_request(method: &str, path: &str, status: u16, elapsed_secs: f64) {
    let labels = vec![
        Label::new("method", method.to_string()),
        Label::new("path", path.to_string()),
        Label::new("status", status.to_string()),
    ];
    counter!(format!("{}_requests_total", METRICS_PREFIX), labels.clone()).increment(1);
    histogram!(format!("{}_request_duration_seconds", METRICS_PREFIX), labels).record(elapsed_secs);
}

/// Record bytes persisted to the media store
pub fn record_media_written(bytes: u64) {
    counter!(format!("{}_media_bytes_written_total", METRICS_PREFIX)).increment(bytes);
}

/// Record an error response by numeric code
pub fn record_error(code: u16) {
    counter!(
        format!("{}_errors_total", METRICS_PREFIX),
        "code" => code.to_string(),
    )
    .increment(1);
}
