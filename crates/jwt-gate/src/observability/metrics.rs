//! Prometheus metrics for jwt-gate

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::Result;
use crate::auth::DenialReason;
use crate::error::Error;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

// Server metrics
const METRIC_UPTIME: &str = "jwt_gate_uptime_seconds";
const METRIC_INFO: &str = "jwt_gate_info";
const METRIC_TENANTS: &str = "jwt_gate_tenants";

// Authentication metrics
const METRIC_AUTH_TOTAL: &str = "jwt_gate_auth_total";
const METRIC_AUTH_DURATION: &str = "jwt_gate_auth_duration_seconds";

// Key material metrics
const METRIC_KEY_CACHE_HITS: &str = "jwt_gate_key_cache_hits_total";
const METRIC_KEY_CACHE_MISSES: &str = "jwt_gate_key_cache_misses_total";
const METRIC_JWKS_REFRESH: &str = "jwt_gate_jwks_refresh_total";

/// Initialize Prometheus metrics recorder.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("Failed to install metrics recorder: {e}")))?;

    PROMETHEUS_HANDLE.set(handle).ok();
    START_TIME.set(Instant::now()).ok();

    register_metrics();
    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

fn register_metrics() {
    describe_gauge!(METRIC_UPTIME, "Gateway uptime in seconds");
    describe_gauge!(METRIC_INFO, "Gateway information (always 1)");
    describe_gauge!(METRIC_TENANTS, "Number of configured tenants");

    describe_counter!(
        METRIC_AUTH_TOTAL,
        "Authentication attempts by outcome and denial reason"
    );
    describe_histogram!(
        METRIC_AUTH_DURATION,
        "Time spent authenticating a request in seconds"
    );

    describe_counter!(METRIC_KEY_CACHE_HITS, "Key material served from cache");
    describe_counter!(METRIC_KEY_CACHE_MISSES, "Key material resolved from the store");
    describe_counter!(METRIC_JWKS_REFRESH, "Remote key set refreshes by result");

    gauge!(
        METRIC_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
    )
    .set(1.0);
}

/// Render metrics in Prometheus text format.
#[must_use]
pub fn render_metrics() -> String {
    if let Some(start) = START_TIME.get() {
        gauge!(METRIC_UPTIME).set(start.elapsed().as_secs_f64());
    }

    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record one authentication outcome. `None` means the request was allowed.
pub fn record_auth(denial: Option<DenialReason>, duration: Duration) {
    let (outcome, reason) = match denial {
        None => ("allowed", "none"),
        Some(reason) => ("denied", reason.as_str()),
    };

    counter!(METRIC_AUTH_TOTAL, "outcome" => outcome, "reason" => reason).increment(1);
    histogram!(METRIC_AUTH_DURATION, "outcome" => outcome).record(duration.as_secs_f64());
}

pub fn record_key_cache_hit() {
    counter!(METRIC_KEY_CACHE_HITS).increment(1);
}

pub fn record_key_cache_miss() {
    counter!(METRIC_KEY_CACHE_MISSES).increment(1);
}

pub fn record_jwks_refresh(success: bool) {
    let result = if success { "success" } else { "failure" };
    counter!(METRIC_JWKS_REFRESH, "result" => result).increment(1);
}

/// Update the configured tenant gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_tenant_count(count: usize) {
    gauge!(METRIC_TENANTS).set(count as f64);
}
