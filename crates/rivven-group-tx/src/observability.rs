//! Tracker metrics
//!
//! Lightweight metrics through the `metrics` crate, exported to Prometheus
//! when the `metrics-prometheus` feature is enabled. Every call compiles to
//! nothing without the feature.
//!
//! ```rust,ignore
//! use rivven_group_tx::observability::{init_metrics, TrackerMetrics};
//!
//! init_metrics(Some("0.0.0.0:9090".parse()?))?;
//! TrackerMetrics::increment_transactions("begun");
//! TrackerMetrics::set_max_collectible_offset(1024);
//! ```

use crate::error::{Result, TrackerError};
use crate::types::Offset;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Group transaction tracker metrics
pub struct TrackerMetrics;

#[cfg_attr(not(feature = "metrics-prometheus"), allow(unused_variables))]
impl TrackerMetrics {
    // ---- Counters ----

    /// Records accepted by the applier
    pub fn increment_records_applied() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rivven_group_tx_records_applied_total").increment(1);
    }

    /// Records skipped without a state change
    pub fn increment_records_skipped(reason: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rivven_group_tx_records_skipped_total", "reason" => reason).increment(1);
    }

    /// Fences ignored because a newer epoch already owns the producer
    pub fn increment_stale_fences() {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rivven_group_tx_stale_fences_total").increment(1);
    }

    /// Transaction lifecycle events (begun, committed, aborted, fenced, expired)
    pub fn increment_transactions(event: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rivven_group_tx_transactions_total", "event" => event).increment(1);
    }

    /// Snapshots written, by kind (local, raft)
    pub fn increment_snapshots(kind: &'static str) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::counter!("rivven_group_tx_snapshots_total", "kind" => kind).increment(1);
    }

    // ---- Gauges ----

    /// Currently open transactions
    pub fn set_open_transactions(count: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("rivven_group_tx_open_transactions").set(count as f64);
    }

    /// Earliest offset compaction must retain
    pub fn set_max_collectible_offset(offset: Offset) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::gauge!("rivven_group_tx_max_collectible_offset").set(offset as f64);
    }

    // ---- Histograms ----

    /// Duration of one expiry sweep
    pub fn record_sweep_duration(duration: Duration) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::histogram!("rivven_group_tx_sweep_duration_seconds").record(duration.as_secs_f64());
    }

    /// Encoded snapshot size
    pub fn record_snapshot_size(bytes: usize) {
        #[cfg(feature = "metrics-prometheus")]
        metrics::histogram!("rivven_group_tx_snapshot_size_bytes").record(bytes as f64);
    }
}

impl TrackerMetrics {
    /// Register help text for every tracker metric with the installed recorder
    pub fn describe() {
        #[cfg(feature = "metrics-prometheus")]
        {
            metrics::describe_counter!(
                "rivven_group_tx_records_applied_total",
                "Committed records accepted by the group transaction applier"
            );
            metrics::describe_counter!(
                "rivven_group_tx_records_skipped_total",
                "Records skipped without a state change, by reason"
            );
            metrics::describe_counter!(
                "rivven_group_tx_stale_fences_total",
                "Fences ignored because a newer producer epoch is tracked"
            );
            metrics::describe_counter!(
                "rivven_group_tx_transactions_total",
                "Group transaction lifecycle events"
            );
            metrics::describe_counter!("rivven_group_tx_snapshots_total", "Snapshots written, by kind");
            metrics::describe_gauge!(
                "rivven_group_tx_open_transactions",
                "Open group transactions on this partition"
            );
            metrics::describe_gauge!(
                "rivven_group_tx_max_collectible_offset",
                "Earliest offset the compactor must retain"
            );
            metrics::describe_histogram!(
                "rivven_group_tx_sweep_duration_seconds",
                metrics::Unit::Seconds,
                "Duration of one legacy transaction expiry sweep"
            );
            metrics::describe_histogram!(
                "rivven_group_tx_snapshot_size_bytes",
                metrics::Unit::Bytes,
                "Encoded snapshot size"
            );
        }
    }
}

static METRICS_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Describe the tracker metrics and, given an address, serve them on
/// `http://{addr}/metrics`.
///
/// Returns `Ok(true)` for the call that performed the setup and `Ok(false)`
/// afterwards. A failed exporter start leaves the subsystem uninitialized so
/// a later call may retry.
#[cfg_attr(not(feature = "metrics-prometheus"), allow(unused_variables))]
pub fn init_metrics(prometheus_addr: Option<SocketAddr>) -> Result<bool> {
    if METRICS_INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(false);
    }

    if let Some(addr) = prometheus_addr {
        #[cfg(feature = "metrics-prometheus")]
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            METRICS_INSTALLED.store(false, Ordering::Release);
            return Err(TrackerError::InvalidConfig(format!(
                "cannot serve group tx metrics on {}: {}",
                addr, e
            )));
        }

        #[cfg(not(feature = "metrics-prometheus"))]
        {
            METRICS_INSTALLED.store(false, Ordering::Release);
            return Err(TrackerError::InvalidConfig(
                "metrics exporter requested but the metrics-prometheus feature is disabled"
                    .to_string(),
            ));
        }
    }

    TrackerMetrics::describe();
    info!(
        exporter = ?prometheus_addr,
        "Group transaction metrics initialized"
    );
    Ok(true)
}
