//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the question pipeline with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Unigraph metrics
pub const METRICS_PREFIX: &str = "unigraph";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Buckets for graph store latency
pub const STORE_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    5.000, // 5s
];

/// Buckets for text generation latency (typically slower)
pub const GENERATION_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.000, // 2s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
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

    // Pipeline metrics
    describe_counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        Unit::Count,
        "Questions processed, by intent and outcome"
    );

    describe_histogram!(
        format!("{}_question_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question latency in seconds"
    );

    describe_counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline failures by stage"
    );

    // Graph store metrics
    describe_counter!(
        format!("{}_store_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Graph store template executions"
    );

    describe_counter!(
        format!("{}_store_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Graph store retries after transient failures"
    );

    describe_histogram!(
        format!("{}_store_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Graph store latency in seconds"
    );

    // Generation metrics
    describe_counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total text generation requests"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Text generation latency in seconds"
    );

    // Catalog metrics
    describe_gauge!(
        format!("{}_catalog_entries", METRICS_PREFIX),
        Unit::Count,
        "Entities held by the entity catalog"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total row cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total row cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a finished question
pub fn record_question(duration_secs: f64, intent: &str, outcome: &str) {
    counter!(
        format!("{}_questions_total", METRICS_PREFIX),
        "intent" => intent.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_question_duration_seconds", METRICS_PREFIX),
        "intent" => intent.to_string()
    )
    .record(duration_secs);
}

/// Record a pipeline failure at a given stage
pub fn record_stage_failure(stage: &str, code: &str) {
    counter!(
        format!("{}_stage_failures_total", METRICS_PREFIX),
        "stage" => stage.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record one graph store call (one attempt)
pub fn record_store_query(duration_secs: f64, template: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_store_queries_total", METRICS_PREFIX),
        "template" => template.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_store_duration_seconds", METRICS_PREFIX),
        "template" => template.to_string()
    )
    .record(duration_secs);
}

pub fn record_store_retry(template: &str) {
    counter!(
        format!("{}_store_retries_total", METRICS_PREFIX),
        "template" => template.to_string()
    )
    .increment(1);
}

/// Helper to record generation metrics
pub fn record_generation(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_generation_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_generation_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

pub fn record_catalog_size(entries: usize) {
    gauge!(format!("{}_catalog_entries", METRICS_PREFIX)).set(entries as f64);
}

pub fn record_cache_lookup(hit: bool) {
    let name = if hit { "cache_hits_total" } else { "cache_misses_total" };
    counter!(format!("{}_{}", METRICS_PREFIX, name)).increment(1);
}
