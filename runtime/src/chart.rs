//! One buyer's rendering context and its inbound command surface.
//!
//! A [`Chart`] pairs a hold token with a [`SelectionState`] and the
//! selection settings of its [`ChartConfig`]. Every command first applies
//! its local transitions synchronously (catalog claims, validation,
//! notifications) under the chart's own lock, then awaits the backend
//! confirmation without holding any lock:
//!
//! - a confirmed hold emits `HoldSucceeded` for the entries still selected;
//!   entries deselected while the confirmation was in flight get a
//!   compensating release
//! - a rejected hold rolls the entries back and emits `HoldFailed`
//! - a rejected release emits `ReleaseHoldFailed`; the items stay released
//!   locally
//!
//! Holds the session lost in the meantime (expiry, bookings) are dropped
//! from the selection silently at the start of the next command; the session
//! already reported why.

use crate::confirmation::ConfirmationService;
use crate::metrics::{ConfirmationKind, HoldMetrics};
use seathold_core::catalog::{SectionSummary, UnitStatus};
use seathold_core::chart::Bookable;
use seathold_core::config::ChartConfig;
use seathold_core::environment::TokenStore;
use seathold_core::error::HoldError;
use seathold_core::notification::{EventSink, HoldItem, Notification};
use seathold_core::selectability::SelectabilityRules;
use seathold_core::selection::{
    ClaimId, ReplaceReport, SelectionContext, SelectionEntry, SelectionLimits, SelectionState,
};
use seathold_core::session::{SessionClaims, SessionManager, SessionMode, SessionRequest, TokenState};
use seathold_core::solver::{BestAvailableRequest, BestAvailableSolver, Solution};
use seathold_core::types::{CategoryKey, HoldToken, ObjectLabel, SelectTarget, TicketType};
use seathold_core::validation::{ActionScope, ValidationResult, ValidatorEngine};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// What a selection command changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionReport {
    /// Items that joined the selection
    pub selected: Vec<HoldItem>,
    /// Items that left the selection
    pub deselected: Vec<HoldItem>,
    /// Targets that could not be selected or deselected, with the reason
    pub failures: Vec<(SelectTarget, HoldError)>,
}

impl From<ReplaceReport> for SelectionReport {
    fn from(report: ReplaceReport) -> Self {
        Self {
            selected: report.added.iter().map(SelectionEntry::item).collect(),
            deselected: report.removed.iter().map(SelectionEntry::item).collect(),
            failures: report.failures,
        }
    }
}

struct ChartState {
    mode: SessionMode,
    token: Option<HoldToken>,
    rules: SelectabilityRules,
    limits: SelectionLimits,
    validators: ValidatorEngine,
    hold_on_select_for_ga: bool,
    selection: SelectionState,
}

impl ChartState {
    fn split<'a>(
        &'a mut self,
        sessions: &'a SessionManager,
        sink: &'a dyn EventSink,
    ) -> (&'a mut SelectionState, SelectionContext<'a>) {
        let ctx = SelectionContext {
            sessions,
            token: self.token.as_ref(),
            rules: &self.rules,
            limits: &self.limits,
            validators: &self.validators,
            sink: Some(sink),
            hold_on_select_for_ga: self.hold_on_select_for_ga,
        };
        (&mut self.selection, ctx)
    }

    fn current_targets(&self) -> Vec<SelectTarget> {
        self.selection
            .list()
            .iter()
            .map(|entry| SelectTarget {
                object: entry.object.clone(),
                ticket_type: entry.ticket_type.clone(),
                amount: entry.quantity,
            })
            .collect()
    }
}

/// A buyer's rendering context
pub struct Chart {
    sessions: Arc<SessionManager>,
    confirmation: Arc<dyn ConfirmationService>,
    sink: Arc<dyn EventSink>,
    store: Option<Arc<dyn TokenStore>>,
    state: Mutex<ChartState>,
}

impl std::fmt::Debug for Chart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Chart")
            .field("mode", &state.mode)
            .field("token", &state.token)
            .field("selection", &state.selection)
            .finish_non_exhaustive()
    }
}

impl Chart {
    pub(crate) fn new(
        sessions: Arc<SessionManager>,
        confirmation: Arc<dyn ConfirmationService>,
        sink: Arc<dyn EventSink>,
        store: Option<Arc<dyn TokenStore>>,
        config: ChartConfig,
        token: Option<HoldToken>,
    ) -> Self {
        let mut selection = SelectionState::new();
        if let Some(claims) = token.as_ref().and_then(|t| sessions.claims(t)) {
            if !claims.is_empty() {
                selection.restore(&claims);
                tracing::info!(items = selection.list().len(), "Selection restored from session");
            }
        }

        Self {
            sessions,
            confirmation,
            sink,
            store,
            state: Mutex::new(ChartState {
                mode: config.session,
                token,
                rules: config.selectability,
                limits: config.max_selected_objects,
                validators: ValidatorEngine::from_config(&config.selection_validators),
                hold_on_select_for_ga: config.hold_on_select_for_ga,
                selection,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_synced(&self) -> MutexGuard<'_, ChartState> {
        let mut guard = self.lock();
        if let Err(error) = self.sync(&mut guard) {
            tracing::trace!(error = %error, "Querying a chart without a live session");
        }
        guard
    }

    /// Drops entries whose claims the session lost; fails once the token is
    /// dead.
    fn sync(&self, state: &mut ChartState) -> Result<(), HoldError> {
        let Some(token) = state.token.clone() else {
            return Ok(());
        };
        if self.sessions.is_live(&token) {
            if let Some(claims) = self.sessions.claims(&token) {
                let dropped = state.selection.reconcile(&claims);
                if !dropped.is_empty() {
                    tracing::debug!(token = %token, dropped = dropped.len(), "Selection lost booked holds");
                }
            }
            return Ok(());
        }

        if self.sessions.expire(&token) {
            HoldMetrics::record_expired(1);
        }
        let dropped = state.selection.reconcile(&SessionClaims::default());
        if !dropped.is_empty() {
            tracing::debug!(token = %token, dropped = dropped.len(), "Selection lost expired holds");
        }
        Err(HoldError::TokenExpired(token))
    }

    // ========================================================================
    // Selection commands
    // ========================================================================

    /// Selects objects (or GA places).
    ///
    /// Targets that cannot be selected are reported in
    /// [`SelectionReport::failures`] and leave everything else untouched.
    ///
    /// # Errors
    ///
    /// - [`HoldError::TokenExpired`] if the session is gone
    /// - [`HoldError::ConfirmationFailed`] if the backend rejected the new
    ///   holds; they were rolled back
    #[tracing::instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn select(&self, targets: Vec<SelectTarget>) -> Result<SelectionReport, HoldError> {
        let (token, report) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.sync(state)?;
            let token = state.token.clone();
            let (selection, ctx) = state.split(&self.sessions, &*self.sink);

            let mut report = ReplaceReport::default();
            for target in targets {
                match selection.add(&ctx, &target) {
                    Ok(Some(entry)) => report.added.push(entry),
                    Ok(None) => {}
                    Err(error) => report.failures.push((target, error)),
                }
            }
            (token, report)
        };
        Self::record_claims(&report);
        self.settle(token.as_ref(), report).await
    }

    /// Deselects objects (or GA places).
    ///
    /// # Errors
    ///
    /// - [`HoldError::TokenExpired`] if the session is gone
    /// - [`HoldError::ConfirmationFailed`] if the backend rejected the
    ///   release
    #[tracing::instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn deselect(&self, targets: Vec<SelectTarget>) -> Result<SelectionReport, HoldError> {
        let (token, report) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.sync(state)?;
            let token = state.token.clone();
            let (selection, ctx) = state.split(&self.sessions, &*self.sink);

            let mut report = ReplaceReport::default();
            for target in targets {
                match selection.remove(&ctx, &target) {
                    Ok(mut removed) => report.removed.append(&mut removed),
                    Err(error) => report.failures.push((target, error)),
                }
            }
            (token, report)
        };
        self.settle(token.as_ref(), report).await
    }

    /// Adds every free, selectable seat, table and booth of `categories`
    ///
    /// # Errors
    ///
    /// Same as [`Chart::select`].
    #[tracing::instrument(skip(self))]
    pub async fn select_categories(&self, categories: Vec<CategoryKey>) -> Result<SelectionReport, HoldError> {
        let wanted: BTreeSet<CategoryKey> = categories.into_iter().collect();
        self.replace_with(|state, sessions| {
            let catalog = sessions.catalog();
            let layout = catalog.layout();
            let mut targets = state.current_targets();
            targets.extend(
                layout
                    .objects()
                    .iter()
                    .filter(|object| !object.is_counted())
                    .filter(|object| object.category().is_some_and(|c| wanted.contains(c)))
                    .filter(|object| state.rules.permits(layout, object))
                    .filter(|object| !state.selection.contains_unit(&object.label))
                    .filter(|object| catalog.status(&object.label) == Some(UnitStatus::Free))
                    .map(|object| SelectTarget::object(object.label.clone())),
            );
            targets
        })
        .await
    }

    /// Removes every selected item of `categories`
    ///
    /// # Errors
    ///
    /// Same as [`Chart::deselect`].
    #[tracing::instrument(skip(self))]
    pub async fn deselect_categories(&self, categories: Vec<CategoryKey>) -> Result<SelectionReport, HoldError> {
        let dropped: BTreeSet<CategoryKey> = categories.into_iter().collect();
        self.replace_with(|state, sessions| {
            let layout = sessions.catalog().layout();
            state
                .current_targets()
                .into_iter()
                .filter(|target| {
                    layout
                        .object(&target.object)
                        .and_then(Bookable::category)
                        .is_none_or(|c| !dropped.contains(c))
                })
                .collect()
        })
        .await
    }

    /// Restricts selection to `categories` and deselects what became
    /// unavailable
    ///
    /// # Errors
    ///
    /// Same as [`Chart::deselect`].
    #[tracing::instrument(skip(self))]
    pub async fn set_available_categories(&self, categories: Vec<CategoryKey>) -> Result<SelectionReport, HoldError> {
        {
            let mut state = self.lock();
            state.rules.available_categories = Some(categories.into_iter().collect());
        }
        self.replace_with(Self::still_permitted).await
    }

    /// Excludes `categories` from selection and deselects what became
    /// unavailable
    ///
    /// # Errors
    ///
    /// Same as [`Chart::deselect`].
    #[tracing::instrument(skip(self))]
    pub async fn set_unavailable_categories(&self, categories: Vec<CategoryKey>) -> Result<SelectionReport, HoldError> {
        {
            let mut state = self.lock();
            state.rules.unavailable_categories = categories.into_iter().collect();
        }
        self.replace_with(Self::still_permitted).await
    }

    fn still_permitted(state: &mut ChartState, sessions: &SessionManager) -> Vec<SelectTarget> {
        let layout = sessions.catalog().layout();
        state
            .current_targets()
            .into_iter()
            .filter(|target| {
                layout
                    .object(&target.object)
                    .is_some_and(|object| state.rules.permits(layout, object))
            })
            .collect()
    }

    /// Lets the solver pick and hold objects.
    ///
    /// Emits `BestAvailableSelected` on success and
    /// `BestAvailableSelectionFailed` otherwise; a failed request leaves
    /// nothing claimed. A request for zero places does nothing.
    ///
    /// # Errors
    ///
    /// - [`HoldError::InsufficientAvailability`] if the request cannot be met
    /// - [`HoldError::SelectionLimitReached`] if the result would exceed
    ///   `maxSelectedObjects`
    /// - [`HoldError::TokenExpired`] / [`HoldError::ConfirmationFailed`]
    #[tracing::instrument(skip(self))]
    pub async fn select_best_available(&self, request: BestAvailableRequest) -> Result<Solution, HoldError> {
        if request.quantity() == 0 {
            return Ok(Solution::default());
        }

        let (token, solution, report) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.sync(state)?;

            if let Some(limit) = state.limits.total {
                let kept = if request.clear_selection {
                    0
                } else {
                    state.selection.total_places()
                };
                if kept + request.quantity() > limit {
                    self.best_available_failed();
                    return Err(HoldError::SelectionLimitReached { limit, scope: None });
                }
            }

            let selected: Vec<ObjectLabel> = state.selection.list().iter().map(|e| e.object.clone()).collect();
            let solver = BestAvailableSolver::new(&self.sessions, &state.rules);
            let focus = solver.focus_of(&selected);
            let solution = match solver.allocate(state.token.as_ref(), &request, focus) {
                Ok(solution) => solution,
                Err(error) => {
                    tracing::info!(error = %error, "Best available failed");
                    self.best_available_failed();
                    return Err(error);
                }
            };

            let token = state.token.clone();
            let (selection, ctx) = state.split(&self.sessions, &*self.sink);
            let report = selection.adopt(&ctx, &solution, request.clear_selection);
            self.sink.emit(Notification::BestAvailableSelected {
                objects: solution.objects(),
                next_to_each_other: solution.next_to_each_other,
            });
            (token, solution, report)
        };

        HoldMetrics::record_best_available(true);
        Self::record_claims(&report);
        self.settle(token.as_ref(), report).await?;
        Ok(solution)
    }

    fn best_available_failed(&self) {
        HoldMetrics::record_best_available(false);
        self.sink.emit(Notification::BestAvailableSelectionFailed);
    }

    /// Empties the selection and releases its holds; the session stays.
    ///
    /// # Errors
    ///
    /// Same as [`Chart::deselect`].
    #[tracing::instrument(skip(self))]
    pub async fn clear_selection(&self) -> Result<SelectionReport, HoldError> {
        let (token, report) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.sync(state)?;
            let token = state.token.clone();
            let (selection, ctx) = state.split(&self.sessions, &*self.sink);
            let report = ReplaceReport {
                removed: selection.clear(&ctx),
                ..ReplaceReport::default()
            };
            (token, report)
        };
        self.settle(token.as_ref(), report).await
    }

    /// Ends the current session and starts a fresh one.
    ///
    /// The selection is cleared and every hold of the old token released.
    /// The new token replaces the old one in the token store. Charts without
    /// sessions only clear their selection.
    ///
    /// # Errors
    ///
    /// Returns error if the new session cannot be started.
    #[tracing::instrument(skip(self))]
    pub async fn start_new_session(&self) -> Result<Option<HoldToken>, HoldError> {
        let (old, removed, token) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let live = self.sync(state).is_ok();
            let old = state.token.clone();
            let removed = {
                let (selection, ctx) = state.split(&self.sessions, &*self.sink);
                selection.clear(&ctx)
            };
            if let Some(old) = &old {
                self.sessions.release_session(old);
            }

            let token = if state.mode == SessionMode::None {
                None
            } else {
                self.sessions.start_session(
                    SessionMode::Start,
                    SessionRequest {
                        supplied: None,
                        store: self.store.clone(),
                        sink: Some(Arc::clone(&self.sink)),
                    },
                )?
            };
            state.token = token.clone();
            (old.filter(|_| live), removed, token)
        };
        HoldMetrics::record_active_tokens(self.sessions.active_tokens());

        if let Some(old) = &old {
            let released: Vec<SelectionEntry> = removed.into_iter().filter(|e| e.held).collect();
            if let Err(error) = self.confirm_releases(old, released).await {
                tracing::warn!(token = %old, error = %error, "Old session released locally only");
            }
        }
        Ok(token)
    }

    /// Resets the viewport; selection and holds are not affected
    pub fn reset_view(&self) {
        tracing::debug!("View reset");
    }

    async fn replace_with<F>(&self, desired: F) -> Result<SelectionReport, HoldError>
    where
        F: FnOnce(&mut ChartState, &SessionManager) -> Vec<SelectTarget>,
    {
        let (token, report) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.sync(state)?;
            let targets = desired(state, &self.sessions);
            let token = state.token.clone();
            let (selection, ctx) = state.split(&self.sessions, &*self.sink);
            (token, selection.replace(&ctx, &targets))
        };
        Self::record_claims(&report);
        self.settle(token.as_ref(), report).await
    }

    fn record_claims(report: &ReplaceReport) {
        let granted = report.added.iter().filter(|e| e.held).count();
        if granted > 0 {
            HoldMetrics::record_claims_granted(granted);
        }
        for (_, error) in &report.failures {
            HoldMetrics::record_claim_refused(error);
        }
    }

    // ========================================================================
    // Backend confirmation
    // ========================================================================

    /// Confirms releases, then holds, of a local change
    async fn settle(&self, token: Option<&HoldToken>, report: ReplaceReport) -> Result<SelectionReport, HoldError> {
        if let Some(token) = token {
            let released: Vec<SelectionEntry> = report.removed.iter().filter(|e| e.held).cloned().collect();
            let held: Vec<SelectionEntry> = report.added.iter().filter(|e| e.held).cloned().collect();
            let released = self.confirm_releases(token, released).await;
            self.confirm_holds(token, held).await?;
            released?;
        }
        Ok(SelectionReport::from(report))
    }

    async fn confirm_holds(&self, token: &HoldToken, entries: Vec<SelectionEntry>) -> Result<(), HoldError> {
        if entries.is_empty() {
            return Ok(());
        }
        let items: Vec<HoldItem> = entries.iter().map(SelectionEntry::item).collect();
        let started = Instant::now();
        let result = self.confirmation.confirm_hold(token, &items).await;
        HoldMetrics::record_confirmation(ConfirmationKind::Hold, result.is_ok(), started.elapsed());

        match result {
            Ok(()) => {
                let superseded = {
                    let mut guard = self.lock();
                    let state = &mut *guard;
                    if let Err(error) = self.sync(state) {
                        tracing::debug!(error = %error, "Hold confirmed for a lapsed session");
                    }
                    let (current, superseded): (Vec<SelectionEntry>, Vec<SelectionEntry>) = entries
                        .into_iter()
                        .partition(|e| state.selection.contains_claim(e.claim));
                    if !current.is_empty() {
                        self.sink.emit(Notification::HoldSucceeded {
                            items: current.iter().map(SelectionEntry::item).collect(),
                        });
                    }
                    // A newer claim on the same object has its own confirmation
                    superseded
                        .into_iter()
                        .filter(|e| !state.selection.list().iter().any(|s| s.object == e.object))
                        .collect::<Vec<_>>()
                };
                if !superseded.is_empty() {
                    self.compensate(token, &superseded).await;
                }
                Ok(())
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(token = %token, error = %error, items = items.len(), "Backend rejected hold; rolling back");
                {
                    let mut guard = self.lock();
                    let state = &mut *guard;
                    let claims: Vec<ClaimId> = entries.iter().map(|e| e.claim).collect();
                    let (selection, ctx) = state.split(&self.sessions, &*self.sink);
                    selection.rollback(&ctx, &claims);
                }
                self.sink.emit(Notification::HoldFailed {
                    items,
                    reason: reason.clone(),
                });
                Err(HoldError::ConfirmationFailed(reason))
            }
        }
    }

    /// Releases holds the backend confirmed after the buyer had already
    /// dropped them
    async fn compensate(&self, token: &HoldToken, entries: &[SelectionEntry]) {
        let items: Vec<HoldItem> = entries.iter().map(SelectionEntry::item).collect();
        tracing::info!(token = %token, items = items.len(), "Compensating release for superseded hold");
        let started = Instant::now();
        let result = self.confirmation.confirm_release(token, &items).await;
        HoldMetrics::record_confirmation(ConfirmationKind::Release, result.is_ok(), started.elapsed());
        if let Err(error) = result {
            tracing::warn!(token = %token, error = %error, "Compensating release failed");
        }
    }

    async fn confirm_releases(&self, token: &HoldToken, entries: Vec<SelectionEntry>) -> Result<(), HoldError> {
        if entries.is_empty() {
            return Ok(());
        }
        let items: Vec<HoldItem> = entries.iter().map(SelectionEntry::item).collect();
        let started = Instant::now();
        let result = self.confirmation.confirm_release(token, &items).await;
        HoldMetrics::record_confirmation(ConfirmationKind::Release, result.is_ok(), started.elapsed());

        match result {
            Ok(()) => {
                self.sink.emit(Notification::ReleaseHoldSucceeded { items });
                Ok(())
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!(token = %token, error = %error, "Backend rejected release");
                self.sink.emit(Notification::ReleaseHoldFailed {
                    items,
                    reason: reason.clone(),
                });
                Err(HoldError::ConfirmationFailed(reason))
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Active hold token
    #[must_use]
    pub fn hold_token(&self) -> Option<HoldToken> {
        self.lock().token.clone()
    }

    /// Session mode the chart was opened with
    #[must_use]
    pub fn session_mode(&self) -> SessionMode {
        self.lock().mode
    }

    /// Lifecycle state of the active token
    #[must_use]
    pub fn session_state(&self) -> Option<TokenState> {
        let token = self.hold_token()?;
        self.sessions.state(&token)
    }

    /// Remaining lifetime of the active token
    #[must_use]
    pub fn time_left(&self) -> Option<Duration> {
        let token = self.hold_token()?;
        self.sessions.time_left(&token)
    }

    /// Selected items in selection order
    #[must_use]
    pub fn selected_objects(&self) -> Vec<HoldItem> {
        self.lock_synced()
            .selection
            .list()
            .iter()
            .map(SelectionEntry::item)
            .collect()
    }

    /// Selected places of a GA area per ticket type
    #[must_use]
    pub fn selection_per_ticket_type(&self, pool: &ObjectLabel) -> BTreeMap<TicketType, u32> {
        self.lock_synced().selection.selection_per_ticket_type(pool)
    }

    /// Validity of the current selection
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut guard = self.lock_synced();
        let (selection, ctx) = guard.split(&self.sessions, &*self.sink);
        selection.validate(&ctx, &ActionScope::default())
    }

    /// Current selectability rules
    #[must_use]
    pub fn rules(&self) -> SelectabilityRules {
        self.lock().rules.clone()
    }

    /// Selectable objects and categories of every section
    #[must_use]
    pub fn section_summaries(&self) -> Vec<SectionSummary> {
        let rules = self.rules();
        let catalog = self.sessions.catalog();
        catalog
            .layout()
            .sections()
            .into_iter()
            .map(|section| catalog.section_summary(section, &rules))
            .collect()
    }
}
