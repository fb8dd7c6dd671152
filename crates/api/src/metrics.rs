// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics module
//!
//! Provides global metrics using the default Prometheus registry via macros,
//! an observational request-tracking middleware, and an Axum-compatible
//! metrics handler.

use std::{sync::LazyLock, time::Instant};

use axum::{
    extract::Request,
    http::{Response, StatusCode, header},
    middleware::Next,
};
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, register_histogram_vec,
    register_int_counter_vec,
};

/// Total number of HTTP requests handled, labeled by method and status.
pub static HTTP_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ledger_api_http_requests_total",
        "Total number of HTTP requests, labeled by method and status",
        &["method", "status"]
    )
    .expect("Failed to create ledger_api_http_requests_total counter vec")
});

/// Histogram of HTTP request durations in seconds, labeled by method.
pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "ledger_api_http_request_duration_seconds",
        "HTTP request durations in seconds, labeled by method",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to create HTTP request duration histogram")
});

/// Observational middleware recording request counts and latency.
///
/// Never mutates request or response semantics.
pub async fn track_requests(req: Request, next: Next) -> axum::response::Response {
    let method = req.method().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    HTTP_REQUESTS
        .with_label_values(&[&method, response.status().as_str()])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&method])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Axum handler that exports metrics in Prometheus text format
///
/// # Panics
///
/// This function will panic if:
/// - The metrics encoder fails to encode the metrics data
/// - The UTF-8 conversion of the encoded buffer fails
/// - The HTTP response builder fails to create the response
pub async fn metrics_handler() -> Response<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(String::from_utf8(buffer).expect("metrics buffer should be valid UTF-8"))
        .expect("Failed to create metrics response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_handler_exports_text_format() {
        // Touch a metric so the registry has something to export
        HTTP_REQUESTS.with_label_values(&["GET", "200"]).inc();

        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response
                .body()
                .contains("ledger_api_http_requests_total")
        );
    }
}
