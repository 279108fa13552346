//! Prometheus metrics for registration, saga compensation and retries.
//!
//! Recorders are zero-sized types with associated functions so call sites
//! read as `RegistrationMetrics::record_outcome(...)`. Without an installed
//! recorder the `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use clubhouse_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! println!("{}", server.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
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

/// Prometheus recorder handle plus the address it is meant to be scraped on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (e.g., by another test) is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the exporter should be scraped on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "registration_requests_total",
        "Register/unregister requests by operation and outcome"
    );
    describe_histogram!(
        "registration_duration_seconds",
        "Time taken by a register/unregister request"
    );
    describe_counter!(
        "registration_saga_compensations_total",
        "Paired writes undone after the second write failed"
    );
    describe_counter!(
        "registration_saga_compensation_failures_total",
        "Compensating writes that failed, leaving stores to reconcile"
    );
    describe_counter!(
        "registration_comments_total",
        "Comment additions and deletions by outcome"
    );
    describe_counter!(
        "registration_ledger_transactions_total",
        "Transactional membership changes by operation and outcome"
    );
    describe_histogram!(
        "registration_ledger_transaction_duration_seconds",
        "Time taken by a transactional membership change"
    );
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Registration coordinator metrics recorder.
pub struct RegistrationMetrics;

impl RegistrationMetrics {
    /// Record the outcome of a register/unregister request.
    pub fn record_outcome(operation: &'static str, outcome: &'static str, duration: Duration) {
        counter!("registration_requests_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("registration_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }
}

/// Saga ledger metrics recorder.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record a successful compensation.
    pub fn record_compensation(operation: &'static str) {
        counter!("registration_saga_compensations_total", "operation" => operation).increment(1);
    }

    /// Record a compensation that itself failed.
    pub fn record_compensation_failure(operation: &'static str) {
        counter!("registration_saga_compensation_failures_total", "operation" => operation)
            .increment(1);
    }
}

/// Comment ledger metrics recorder.
pub struct CommentMetrics;

impl CommentMetrics {
    /// Record a comment operation outcome.
    pub fn record(operation: &'static str, outcome: &'static str) {
        counter!("registration_comments_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
