//! Background expiry of hold tokens.
//!
//! Tokens are also expired lazily when touched after their deadline; the
//! sweeper makes sure idle ones go away on time as well.

use crate::coordinator::HoldCoordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle of a running sweeper task
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawns a task sweeping `coordinator` every
    /// [`HoldConfig::sweep_interval`](seathold_core::config::HoldConfig::sweep_interval).
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(coordinator: Arc<HoldCoordinator>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        // tokio rejects a zero period
        let period = coordinator.sessions().config().sweep_interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(interval_ms = period.as_millis(), "Hold sweeper started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let expired = coordinator.sweep_expired();
                        for token in &expired {
                            tracing::debug!(token = %token, "Swept expired hold token");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Hold sweeper shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx, handle }
    }

    /// Stops the sweeper and waits for it to finish
    pub async fn shutdown(self) {
        // The task may already be gone
        let _ = self.shutdown_tx.send(());
        if let Err(error) = self.handle.await {
            tracing::warn!(error = %error, "Hold sweeper task ended abnormally");
        }
    }
}
