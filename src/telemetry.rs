//! Telemetry module for PressGate
//!
//! Prometheus counters for token issuance, token validation, ability
//! execution and HTTP traffic. Metrics register lazily on first use.

use crate::{PressGateError, Result};
use once_cell::sync::Lazy;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, TextEncoder, register_counter_vec,
    register_histogram_vec,
};

/// HTTP requests total counter
static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pressgate_http_requests_total",
        "Total number of HTTP requests received",
        &["method", "code"]
    )
    .unwrap()
});

/// HTTP request duration histogram
static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        HistogramOpts::new(
            "pressgate_http_request_duration_seconds",
            "Duration of HTTP requests in seconds"
        ),
        &["method"]
    )
    .unwrap()
});

/// Tokens issued by the authorization server
static TOKENS_ISSUED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pressgate_tokens_issued_total",
        "Total number of access tokens issued",
        &["grant"]
    )
    .unwrap()
});

/// Bearer token validations by outcome
static TOKEN_VALIDATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pressgate_token_validations_total",
        "Total number of bearer token validations",
        &["outcome"]
    )
    .unwrap()
});

/// Guarded ability executions by outcome
static ABILITY_EXECUTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pressgate_ability_executions_total",
        "Total number of guarded ability executions",
        &["ability", "outcome"]
    )
    .unwrap()
});

/// Record HTTP request metric
pub fn record_http_request(method: &str, status_code: u16) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, &status_code.to_string()])
        .inc();
}

/// Record HTTP request duration
pub fn record_http_duration(method: &str, duration_secs: f64) {
    HTTP_REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record an issued access token for a grant type
pub fn record_token_issued(grant: &str) {
    TOKENS_ISSUED_TOTAL.with_label_values(&[grant]).inc();
}

/// Record a bearer validation outcome (`valid`, `missing`, `invalid_token`, ...)
pub fn record_token_validation(outcome: &str) {
    TOKEN_VALIDATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a guarded execution outcome (`ok`, `error`, `disabled`, `forbidden`)
pub fn record_ability_execution(ability: &str, outcome: &str) {
    ABILITY_EXECUTIONS_TOTAL
        .with_label_values(&[ability, outcome])
        .inc();
}

/// Get Prometheus metrics in text format
pub fn get_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| PressGateError::internal(format!("Failed to encode metrics: {}", e)))?;

    String::from_utf8(buffer)
        .map_err(|e| PressGateError::internal(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Axum middleware counting requests and their latency
pub async fn track_http_metrics(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    record_http_request(&method, response.status().as_u16());
    record_http_duration(&method, start.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render_in_text_format() {
        record_token_issued("authorization_code");
        record_token_validation("valid");
        record_ability_execution("pressgate/get-site-info", "ok");

        let metrics = get_metrics().unwrap();
        assert!(metrics.contains("pressgate_tokens_issued_total"));
        assert!(metrics.contains("pressgate_token_validations_total"));
        assert!(metrics.contains("pressgate_ability_executions_total"));
    }
}
