//! Prometheus counters for mapping, access and reconciliation outcomes.
//!
//! Recording functions are always callable; without the `prometheus`
//! feature they compile to no-ops.

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::counter;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle, rendered by the host's metrics endpoint.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::debug!("Metrics enabled in config but the 'prometheus' feature is not compiled");
    }
    Ok(())
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a mapping evaluation ("role", "user" or "unmapped").
pub fn record_mapping_outcome(kind: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("rolemap_mapping_outcomes_total", "outcome" => kind.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = kind;
    }
}

/// Record an access decision ("allowed" or "denied").
pub fn record_access_decision(result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("rolemap_access_decisions_total", "result" => result.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = result;
    }
}

/// Record a reconciliation ("updated", "unchanged", "skipped" or "error").
pub fn record_reconciliation(outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("rolemap_reconciliations_total", "outcome" => outcome.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = outcome;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
