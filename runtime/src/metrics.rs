//! Prometheus metrics.
//!
//! Recorders are plain structs with associated functions so call sites read
//! `ReconcileMetrics::record_pass(..)`. Without an installed recorder the
//! `metrics` macros are no-ops, which is what tests run against.
//!
//! # Example
//!
//! ```rust,no_run
//! use rollcall_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9100".parse()?);
//! server.start()?;
//! let scrape = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter handle.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an exporter that will report `addr` as its scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe every rollcall metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            },
        }
    }

    /// Scrape address this exporter was configured with
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// `None` until [`MetricsServer::start`] installed the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Commands
    describe_counter!(
        "rollcall_commands_total",
        "Commands handled, labelled by action and outcome"
    );
    describe_histogram!(
        "rollcall_command_duration_seconds",
        "Time from command receipt to committed record"
    );
    describe_counter!(
        "rollcall_promotions_total",
        "Users promoted off a waitlist"
    );
    describe_counter!(
        "rollcall_effect_failures_total",
        "Collaborator calls that failed and were skipped"
    );

    // Reconciliation
    describe_counter!(
        "rollcall_reconcile_changes_total",
        "Audit entries produced by reconciliation, labelled by action"
    );
    describe_histogram!(
        "rollcall_reconcile_duration_seconds",
        "Wall-clock time of a full reconciliation pass"
    );
    describe_counter!(
        "rollcall_reconcile_failures_total",
        "Records skipped by a pass because of a platform failure"
    );
    describe_counter!(
        "rollcall_membership_fetch_failures_total",
        "Slot membership fetches that failed"
    );
    describe_counter!(
        "rollcall_records_purged_total",
        "Records purged because their post is gone"
    );

    // Store
    describe_counter!(
        "rollcall_persist_failures_total",
        "Durable writes that failed"
    );
    describe_gauge!(
        "rollcall_dirty_records",
        "Records changed in memory but not yet persisted"
    );

    // Recovery
    describe_counter!(
        "rollcall_records_recovered_total",
        "Records rebuilt from rendered posts"
    );
}

/// Command surface metrics.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record one handled command.
    pub fn record(action: &'static str, outcome: &'static str, duration: Duration) {
        counter!("rollcall_commands_total", "action" => action, "outcome" => outcome).increment(1);
        histogram!("rollcall_command_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record users promoted as a side effect.
    pub fn record_promotions(count: usize) {
        if count > 0 {
            counter!("rollcall_promotions_total").increment(count as u64);
        }
    }

    /// Record a collaborator call that failed.
    pub fn record_effect_failure(effect: &'static str) {
        counter!("rollcall_effect_failures_total", "effect" => effect).increment(1);
    }
}

/// Reconciliation metrics.
pub struct ReconcileMetrics;

impl ReconcileMetrics {
    /// Record a completed pass.
    pub fn record_pass(duration: Duration, tally: &BTreeMap<String, usize>) {
        histogram!("rollcall_reconcile_duration_seconds").record(duration.as_secs_f64());
        for (action, count) in tally {
            counter!("rollcall_reconcile_changes_total", "action" => action.clone())
                .increment(*count as u64);
        }
    }

    /// Record a record skipped by the pass.
    pub fn record_failure() {
        counter!("rollcall_reconcile_failures_total").increment(1);
    }

    /// Record a failed slot fetch.
    pub fn record_fetch_failure() {
        counter!("rollcall_membership_fetch_failures_total").increment(1);
    }

    /// Record a purged record.
    pub fn record_purge() {
        counter!("rollcall_records_purged_total").increment(1);
    }
}

/// Record store metrics.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record a failed durable write.
    pub fn record_persist_failure() {
        counter!("rollcall_persist_failures_total").increment(1);
    }

    /// Record the number of unpersisted records.
    #[allow(clippy::cast_precision_loss)] // Dirty counts stay far below 2^52
    pub fn record_dirty(count: usize) {
        gauge!("rollcall_dirty_records").set(count as f64);
    }
}

/// Recovery metrics.
pub struct RecoveryMetrics;

impl RecoveryMetrics {
    /// Record records rebuilt by a scan.
    pub fn record_recovered(count: usize) {
        counter!("rollcall_records_recovered_total").increment(count as u64);
    }
}
