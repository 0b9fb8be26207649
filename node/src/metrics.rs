//! # Prometheus Metrics
//!
//! Exposes operational metrics for the platform node. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total number of HTTP requests served by the REST API.
    pub api_requests_total: IntCounter,
    /// Total number of asset tokens created on this node.
    pub tokens_created_total: IntCounter,
    /// Total number of accepted funding contributions.
    pub contributions_total: IntCounter,
    /// Total number of tokens activated by custodian attestation.
    pub activations_total: IntCounter,
    /// Total number of refunds paid out of failed funding rounds.
    pub reclaims_total: IntCounter,
    /// Total number of revenue payouts deposited.
    pub payouts_deposited_total: IntCounter,
    /// Total number of payout shares claimed.
    pub claims_total: IntCounter,
    /// Current number of token instances hosted by this node.
    pub tokens_hosted: IntGauge,
    /// Total value currently escrowed across all hosted tokens, in base units
    /// (clamped to the gauge's i64 range).
    pub escrowed_value: IntGauge,
    /// Histogram of token operation latency in seconds.
    pub operation_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("keel".into()), None)
            .expect("failed to create prometheus registry");

        let api_requests_total = IntCounter::new(
            "api_requests_total",
            "Total number of HTTP requests served by the REST API",
        )
        .expect("metric creation");
        registry
            .register(Box::new(api_requests_total.clone()))
            .expect("metric registration");

        let tokens_created_total = IntCounter::new(
            "tokens_created_total",
            "Total number of asset tokens created on this node",
        )
        .expect("metric creation");
        registry
            .register(Box::new(tokens_created_total.clone()))
            .expect("metric registration");

        let contributions_total = IntCounter::new(
            "contributions_total",
            "Total number of accepted funding contributions",
        )
        .expect("metric creation");
        registry
            .register(Box::new(contributions_total.clone()))
            .expect("metric registration");

        let activations_total = IntCounter::new(
            "activations_total",
            "Total number of tokens activated by custodian attestation",
        )
        .expect("metric creation");
        registry
            .register(Box::new(activations_total.clone()))
            .expect("metric registration");

        let reclaims_total = IntCounter::new(
            "reclaims_total",
            "Total number of refunds paid out of failed funding rounds",
        )
        .expect("metric creation");
        registry
            .register(Box::new(reclaims_total.clone()))
            .expect("metric registration");

        let payouts_deposited_total = IntCounter::new(
            "payouts_deposited_total",
            "Total number of revenue payouts deposited",
        )
        .expect("metric creation");
        registry
            .register(Box::new(payouts_deposited_total.clone()))
            .expect("metric registration");

        let claims_total =
            IntCounter::new("claims_total", "Total number of payout shares claimed")
                .expect("metric creation");
        registry
            .register(Box::new(claims_total.clone()))
            .expect("metric registration");

        let tokens_hosted = IntGauge::new(
            "tokens_hosted",
            "Current number of token instances hosted by this node",
        )
        .expect("metric creation");
        registry
            .register(Box::new(tokens_hosted.clone()))
            .expect("metric registration");

        let escrowed_value = IntGauge::new(
            "escrowed_value",
            "Total value escrowed across all hosted tokens, in base units",
        )
        .expect("metric creation");
        registry
            .register(Box::new(escrowed_value.clone()))
            .expect("metric registration");

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "End-to-end token operation latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            api_requests_total,
            tokens_created_total,
            contributions_total,
            activations_total,
            reclaims_total,
            payouts_deposited_total,
            claims_total,
            tokens_hosted,
            escrowed_value,
            operation_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

/// Shared metrics handle passed to axum handlers as state.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
