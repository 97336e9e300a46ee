//! Prometheus metrics for the SXG signing service.
//!
//! All metric types use atomics internally (no locks on the hot path). The
//! `Metrics` struct is `Clone`-cheap (registry + collectors are all
//! `Arc`-backed under the hood).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts,
    Registry, TextEncoder, TEXT_FORMAT,
};
use std::sync::Arc;
use std::time::Instant;

use crate::api::handlers::AppState;

/// All Prometheus metrics for the signer.
#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // -- Process & Build --
    pub process_start_time_seconds: Gauge,
    pub build_info: GaugeVec,

    // -- HTTP Requests --
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // -- Packaging Gate --
    pub packaging_outcomes_total: IntCounterVec,
    pub fetch_duration_seconds: Histogram,
    pub mice_payload_bytes: Histogram,
    pub sign_duration_seconds: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let process_start_time_seconds =
            Gauge::new("process_start_time_seconds", "Start time of the process").unwrap();
        registry
            .register(Box::new(process_start_time_seconds.clone()))
            .unwrap();

        let build_info = GaugeVec::new(
            Opts::new("sxg_signer_build_info", "Build information"),
            &["version"],
        )
        .unwrap();
        registry.register(Box::new(build_info.clone())).unwrap();

        #[cfg(target_os = "linux")]
        {
            let pc = prometheus::process_collector::ProcessCollector::for_self();
            let _ = registry.register(Box::new(pc));
        }

        let http_requests_total = IntCounterVec::new(
            Opts::new(
                "sxg_signer_http_requests_total",
                "Total HTTP requests by method, status, and route",
            ),
            &["method", "status", "route"],
        )
        .unwrap();
        registry
            .register(Box::new(http_requests_total.clone()))
            .unwrap();

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "sxg_signer_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "route"],
        )
        .unwrap();
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .unwrap();

        let packaging_outcomes_total = IntCounterVec::new(
            Opts::new(
                "sxg_signer_packaging_outcomes_total",
                "Terminal packaging-gate outcomes by kind",
            ),
            &["outcome"],
        )
        .unwrap();
        registry
            .register(Box::new(packaging_outcomes_total.clone()))
            .unwrap();

        let fetch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sxg_signer_fetch_duration_seconds",
                "Upstream fetch duration in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .unwrap();
        registry
            .register(Box::new(fetch_duration_seconds.clone()))
            .unwrap();

        let mice_payload_bytes = Histogram::with_opts(
            HistogramOpts::new(
                "sxg_signer_mice_payload_bytes",
                "Size of the MICE-encoded payload in bytes",
            )
            .buckets(prometheus::exponential_buckets(1024.0, 4.0, 8).unwrap()),
        )
        .unwrap();
        registry
            .register(Box::new(mice_payload_bytes.clone()))
            .unwrap();

        let sign_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "sxg_signer_sign_duration_seconds",
                "Time spent encoding + signing the exchange",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1]),
        )
        .unwrap();
        registry
            .register(Box::new(sign_duration_seconds.clone()))
            .unwrap();

        Metrics {
            registry,
            process_start_time_seconds,
            build_info,
            http_requests_total,
            http_request_duration_seconds,
            packaging_outcomes_total,
            fetch_duration_seconds,
            mice_payload_bytes,
            sign_duration_seconds,
        }
    }
}

/// Classify a request path into a bounded route label for metrics
/// cardinality.
pub fn classify_route(path: &str) -> &'static str {
    if path == "/healthz" {
        "healthz"
    } else if path == "/metrics" {
        "metrics"
    } else if path.starts_with("/amppkg/cert/") {
        "cert"
    } else if path == "/amppkg/validity" {
        "validity"
    } else if path.starts_with("/priv/doc") {
        "doc"
    } else {
        "unknown"
    }
}

/// Axum middleware that records HTTP request metrics.
pub async fn http_metrics_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let metrics = &state.metrics;
    let method = request.method().to_string();
    let route = classify_route(request.uri().path());

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests_total
        .with_label_values(&[&method, &status, route])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, route])
        .observe(duration);

    response
}

/// Handler for `GET /metrics` — Prometheus text exposition format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }
    (StatusCode::OK, [("content-type", TEXT_FORMAT)], buffer).into_response()
}
