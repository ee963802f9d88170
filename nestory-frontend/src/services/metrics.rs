use crate::services::image_gateway::GatewayError;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

pub struct Metrics {
    registry: Registry,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub upstream_requests_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn build() -> Result<Metrics, prometheus::Error> {
    let registry = Registry::new();

    let http_requests_total = IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )?;
    let http_request_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        ),
        &["method", "path", "status"],
    )?;
    let upstream_requests_total = IntCounterVec::new(
        Opts::new(
            "upstream_requests_total",
            "Calls to the image generation API by operation and outcome",
        ),
        &["operation", "outcome"],
    )?;

    registry.register(Box::new(http_requests_total.clone()))?;
    registry.register(Box::new(http_request_duration_seconds.clone()))?;
    registry.register(Box::new(upstream_requests_total.clone()))?;

    Ok(Metrics {
        registry,
        http_requests_total,
        http_request_duration_seconds,
        upstream_requests_total,
    })
}

/// Process-wide metrics, created on first use.
///
/// Returns `None` only if the collectors could not be registered, in which
/// case recording is skipped rather than taking the request down.
pub fn metrics() -> Option<&'static Metrics> {
    if let Some(metrics) = METRICS.get() {
        return Some(metrics);
    }
    match build() {
        Ok(metrics) => Some(METRICS.get_or_init(|| metrics)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to register prometheus collectors");
            None
        }
    }
}

pub fn record_http(method: &str, path: &str, status: &str, seconds: f64) {
    if let Some(m) = metrics() {
        let labels = [method, path, status];
        m.http_requests_total.with_label_values(&labels).inc();
        m.http_request_duration_seconds
            .with_label_values(&labels)
            .observe(seconds);
    }
}

pub fn record_upstream<T>(operation: &str, outcome: &Result<T, GatewayError>) {
    let outcome = match outcome {
        Ok(_) => "ok",
        Err(e) => e.stage(),
    };
    if let Some(m) = metrics() {
        m.upstream_requests_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}

/// Text exposition of everything registered so far.
pub fn get_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&m.registry.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
