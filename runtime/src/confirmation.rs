//! Backend confirmation boundary.
//!
//! Local claims are applied synchronously; the backend that owns the
//! authoritative booking state confirms them afterwards. A rejected hold is
//! rolled back locally by the [`Chart`](crate::chart::Chart). Nothing here
//! retries: a failure is reported once and the caller decides.

use async_trait::async_trait;
use seathold_core::notification::HoldItem;
use seathold_core::types::HoldToken;
use thiserror::Error;

/// Errors reported by the backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    /// The backend refused the request
    #[error("Backend rejected the request: {0}")]
    Rejected(String),

    /// The backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend no longer knows the token
    #[error("Backend does not know hold token {0}")]
    UnknownToken(HoldToken),
}

/// Confirms holds and releases with the backend.
///
/// Implementations are shared between every open chart, so they must be
/// cheap to call concurrently.
#[async_trait]
pub trait ConfirmationService: Send + Sync {
    /// Confirm that `items` are held for `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmationError`] if the backend does not accept the hold.
    async fn confirm_hold(&self, token: &HoldToken, items: &[HoldItem]) -> Result<(), ConfirmationError>;

    /// Confirm that `items` are no longer held for `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfirmationError`] if the backend does not accept the release.
    async fn confirm_release(&self, token: &HoldToken, items: &[HoldItem]) -> Result<(), ConfirmationError>;
}

/// Accepts everything immediately; for charts without a backend
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConfirmationService;

#[async_trait]
impl ConfirmationService for NoopConfirmationService {
    async fn confirm_hold(&self, token: &HoldToken, items: &[HoldItem]) -> Result<(), ConfirmationError> {
        tracing::trace!(token = %token, items = items.len(), "Hold accepted without backend");
        Ok(())
    }

    async fn confirm_release(&self, token: &HoldToken, items: &[HoldItem]) -> Result<(), ConfirmationError> {
        tracing::trace!(token = %token, items = items.len(), "Release accepted without backend");
        Ok(())
    }
}
