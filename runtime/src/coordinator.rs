//! Shared entry point for every buyer of one catalog.
//!
//! A [`HoldCoordinator`] owns the [`SessionManager`] (and through it the
//! [`ResourceCatalog`]) plus the backend [`ConfirmationService`]. Rendering
//! contexts are opened with [`HoldCoordinator::open_chart`]; bookings pushed
//! by the backend enter through [`HoldCoordinator::confirm_booking`].

use crate::chart::Chart;
use crate::confirmation::ConfirmationService;
use crate::metrics::HoldMetrics;
use seathold_core::catalog::{BookingConfirmation, BookingOutcome, ResourceCatalog};
use seathold_core::chart::ChartLayout;
use seathold_core::config::{ChartConfig, HoldConfig};
use seathold_core::environment::{Clock, SystemClock, TokenStore};
use seathold_core::error::HoldError;
use seathold_core::notification::EventSink;
use seathold_core::session::{SessionManager, SessionRequest};
use seathold_core::types::{EventKey, HoldToken};
use std::sync::Arc;

/// Coordinates holds for one catalog
pub struct HoldCoordinator {
    sessions: Arc<SessionManager>,
    confirmation: Arc<dyn ConfirmationService>,
}

impl std::fmt::Debug for HoldCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HoldCoordinator")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl HoldCoordinator {
    /// Creates a coordinator over `catalog`
    #[must_use]
    pub fn new(
        catalog: Arc<ResourceCatalog>,
        config: HoldConfig,
        clock: Arc<dyn Clock>,
        confirmation: Arc<dyn ConfirmationService>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(catalog, config, clock)),
            confirmation,
        }
    }

    /// Creates a coordinator for `layout` rendered against `events`, using
    /// the system clock
    #[must_use]
    pub fn for_layout(
        layout: ChartLayout,
        events: Vec<EventKey>,
        config: HoldConfig,
        confirmation: Arc<dyn ConfirmationService>,
    ) -> Self {
        let catalog = Arc::new(ResourceCatalog::new(Arc::new(layout), events));
        Self::new(catalog, config, Arc::new(SystemClock), confirmation)
    }

    /// The shared catalog
    #[must_use]
    pub fn catalog(&self) -> &Arc<ResourceCatalog> {
        self.sessions.catalog()
    }

    /// The session manager
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Opens a rendering context.
    ///
    /// Starts (or resumes) the session the configuration asks for, restores
    /// the selection of a resumed token and selects
    /// [`ChartConfig::selected_objects`] that are still free.
    ///
    /// # Errors
    ///
    /// - [`HoldError::UnknownEvent`] if the configuration names an event the
    ///   catalog does not render
    /// - [`HoldError::NoActiveSession`] / [`HoldError::TokenExpired`] if a
    ///   manual session cannot be adopted
    #[tracing::instrument(skip_all, fields(session = ?config.session))]
    pub async fn open_chart(
        &self,
        config: ChartConfig,
        sink: Arc<dyn EventSink>,
        store: Option<Arc<dyn TokenStore>>,
    ) -> Result<Chart, HoldError> {
        if let Some(unknown) = config
            .events
            .iter()
            .find(|event| !self.catalog().events().contains(event))
        {
            return Err(HoldError::UnknownEvent(unknown.clone()));
        }

        let token = self.sessions.start_session(
            config.session,
            SessionRequest {
                supplied: config.hold_token.clone(),
                store: store.clone(),
                sink: Some(Arc::clone(&sink)),
            },
        )?;
        HoldMetrics::record_active_tokens(self.sessions.active_tokens());

        let initial = config.selected_objects.clone();
        let chart = Chart::new(
            Arc::clone(&self.sessions),
            Arc::clone(&self.confirmation),
            sink,
            store,
            config,
            token,
        );

        if !initial.is_empty() {
            match chart.select(initial).await {
                Ok(report) => {
                    for (target, error) in &report.failures {
                        tracing::debug!(object = %target.object, error = %error, "Initial object not selected");
                    }
                }
                Err(error) => tracing::warn!(error = %error, "Initial selection failed"),
            }
        }
        Ok(chart)
    }

    /// Applies a booking pushed by the backend.
    ///
    /// Holds the booking displaces are revoked from their tokens, which are
    /// told through `HeldObjectBooked`. Duplicate ids are ignored.
    pub fn confirm_booking(&self, confirmation: &BookingConfirmation) -> BookingOutcome {
        let outcome = self.catalog().confirm_booked(confirmation);
        let revoked = self.sessions.revoke_booked(&outcome);
        HoldMetrics::record_booking(&outcome);
        tracing::info!(
            booking = %confirmation.id,
            object = %confirmation.object,
            event = %confirmation.event,
            revoked = revoked.len(),
            "Booking applied"
        );
        outcome
    }

    /// Expires every token past its deadline
    pub fn sweep_expired(&self) -> Vec<HoldToken> {
        let expired = self.sessions.sweep();
        if !expired.is_empty() {
            HoldMetrics::record_expired(expired.len());
            tracing::debug!(count = expired.len(), "Expired hold tokens swept");
        }
        HoldMetrics::record_active_tokens(self.sessions.active_tokens());
        expired
    }
}
