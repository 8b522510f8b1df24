//! Prometheus metrics for the hold engine.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed. [`MetricsRecorder::install`] installs the Prometheus
//! recorder and registers the metric descriptions:
//!
//! - `seathold_claims_total{outcome}`
//! - `seathold_confirmations_total{kind,result}` and
//!   `seathold_confirmation_duration_seconds`
//! - `seathold_tokens_expired_total`
//! - `seathold_best_available_total{result}`
//! - `seathold_bookings_total{outcome}`
//! - `seathold_active_tokens`
//!
//! # Example
//!
//! ```rust,no_run
//! use seathold_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//! println!("{}", recorder.render().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use seathold_core::catalog::BookingOutcome;
use seathold_core::error::HoldError;
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

/// Installed Prometheus recorder.
///
/// Owns the handle used to render the scrape payload. Serving it over HTTP
/// is left to the embedding application.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Install the Prometheus recorder and register descriptions.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed (e.g. by another test) is tolerated.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
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

fn register_metrics() {
    describe_counter!(
        "seathold_claims_total",
        "Claim attempts on units and GA pools, by outcome"
    );
    describe_counter!(
        "seathold_confirmations_total",
        "Backend hold/release confirmations, by kind and result"
    );
    describe_histogram!(
        "seathold_confirmation_duration_seconds",
        "Time spent waiting for the backend to confirm a hold or release"
    );
    describe_counter!(
        "seathold_tokens_expired_total",
        "Hold tokens expired by the sweeper or lazily on access"
    );
    describe_counter!(
        "seathold_best_available_total",
        "Best-available requests, by result"
    );
    describe_counter!(
        "seathold_bookings_total",
        "Booking confirmations applied to the catalog, by outcome"
    );
    describe_gauge!("seathold_active_tokens", "Live hold tokens");
}

/// Kind of backend confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationKind {
    /// Hold confirmation
    Hold,
    /// Release confirmation
    Release,
}

impl ConfirmationKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Release => "release",
        }
    }
}

/// Hold engine metrics recorder.
pub struct HoldMetrics;

impl HoldMetrics {
    /// Record granted claims.
    pub fn record_claims_granted(count: usize) {
        counter!("seathold_claims_total", "outcome" => "granted").increment(count as u64);
    }

    /// Record a claim that was refused.
    pub fn record_claim_refused(error: &HoldError) {
        let outcome = match error {
            HoldError::AlreadyHeldOrBooked(_) => "already_held_or_booked",
            HoldError::NotSelectable(_) => "not_selectable",
            HoldError::CapacityExhausted { .. } => "capacity_exhausted",
            HoldError::SelectionLimitReached { .. } => "limit_reached",
            HoldError::TokenExpired(_) => "token_expired",
            _ => "rejected",
        };
        counter!("seathold_claims_total", "outcome" => outcome).increment(1);
    }

    /// Record a settled backend confirmation.
    pub fn record_confirmation(kind: ConfirmationKind, ok: bool, duration: Duration) {
        let result = if ok { "success" } else { "failure" };
        counter!("seathold_confirmations_total", "kind" => kind.as_str(), "result" => result).increment(1);
        histogram!("seathold_confirmation_duration_seconds", "kind" => kind.as_str())
            .record(duration.as_secs_f64());
    }

    /// Record expired tokens.
    pub fn record_expired(count: usize) {
        counter!("seathold_tokens_expired_total").increment(count as u64);
    }

    /// Record a best-available request.
    pub fn record_best_available(ok: bool) {
        let result = if ok { "success" } else { "failure" };
        counter!("seathold_best_available_total", "result" => result).increment(1);
    }

    /// Record an applied booking confirmation.
    pub fn record_booking(outcome: &BookingOutcome) {
        let outcome = match outcome {
            BookingOutcome::Booked { displaced, .. } if !displaced.is_empty() => "displaced",
            BookingOutcome::Booked { .. } => "booked",
            BookingOutcome::Duplicate => "duplicate",
            BookingOutcome::Unknown => "unknown",
        };
        counter!("seathold_bookings_total", "outcome" => outcome).increment(1);
    }

    /// Record the number of live tokens.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_active_tokens(count: usize) {
        gauge!("seathold_active_tokens").set(count as f64);
    }
}
