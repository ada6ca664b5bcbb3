//! # Prometheus Metrics
//!
//! Operational metrics for the vault node, scraped at `/metrics` on the
//! metrics port. Everything lives in a dedicated [`prometheus::Registry`]
//! prefixed with `zap_vault`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct VaultMetrics {
    registry: Registry,
    /// Vault operations by operation name and outcome (`ok` or an error kind).
    pub operations_total: IntCounterVec,
    /// Handler latency per operation, in seconds.
    pub operation_latency_seconds: HistogramVec,
    /// Sum of all internal ledger balances.
    pub custodied_tokens: IntGauge,
    /// Owners with a ledger slot.
    pub ledger_owners: IntGauge,
    /// Currently connected event stream clients.
    pub event_subscribers: IntGauge,
}

impl VaultMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("zap_vault".into()), None)?;

        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Vault operations by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Vault operation latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_latency_seconds.clone()))?;

        let custodied_tokens =
            IntGauge::new("custodied_tokens", "Sum of all internal ledger balances")?;
        registry.register(Box::new(custodied_tokens.clone()))?;

        let ledger_owners = IntGauge::new("ledger_owners", "Owners with a ledger slot")?;
        registry.register(Box::new(ledger_owners.clone()))?;

        let event_subscribers = IntGauge::new(
            "event_subscribers",
            "Connected WebSocket event stream clients",
        )?;
        registry.register(Box::new(event_subscribers.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            operation_latency_seconds,
            custodied_tokens,
            ledger_owners,
            event_subscribers,
        })
    }

    /// Records one completed operation.
    pub fn observe(&self, operation: &str, outcome: &str, elapsed: Duration) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_latency_seconds
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Refreshes the ledger gauges. Totals beyond `i64::MAX` saturate.
    pub fn set_ledger_totals(&self, custodied: u128, owners: usize) {
        self.custodied_tokens
            .set(i64::try_from(custodied).unwrap_or(i64::MAX));
        self.ledger_owners
            .set(i64::try_from(owners).unwrap_or(i64::MAX));
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Shared metrics handle passed to axum handlers as state.
pub type SharedMetrics = Arc<VaultMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(metrics): State<SharedMetrics>) -> impl IntoResponse {
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
