//! Hold tokens, their claim sets and their lifetimes.
//!
//! The [`SessionManager`] is the only component that attaches catalog claims
//! to a token. It owns a registry of token records and a deadline queue
//! ordered by monotonic instant; [`SessionManager::sweep`] pops due entries
//! and expires them. Deadlines are also checked lazily: a claim on behalf of
//! a token past its deadline fails with [`HoldError::TokenExpired`], and a
//! claim blocked by a lapsed token expires that token first.
//!
//! # Lock Order
//!
//! record -> deadline queue, record -> catalog entry. A record is never
//! locked while a catalog entry is held, and no two records are ever locked
//! at once.

use crate::catalog::{lock, BookingOutcome, ClaimOutcome, DisplacedHold, ReleaseOutcome, ResourceCatalog};
use crate::config::{ExpiryMode, HoldConfig};
use crate::environment::{Clock, TokenStore};
use crate::error::HoldError;
use crate::notification::{EventSink, HoldItem, Notification};
use crate::selectability::SelectabilityRules;
use crate::types::{HoldToken, ObjectLabel, TicketType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// How a rendering context obtains its hold token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Always create a new token
    Start,
    /// Resume the stored token if it is still live
    Continue,
    /// Use a token issued by the caller
    Manual,
    /// No holds; selections are visual only
    #[default]
    None,
}

/// Lifecycle state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenState {
    /// Live
    Active,
    /// Live, but within the expiring window
    Expiring,
    /// Deadline passed; every claim was released
    Expired,
    /// Ended explicitly (new session, clear, all claims booked)
    Released,
}

/// Claims attached to a token
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionClaims {
    /// Held units
    pub units: BTreeSet<ObjectLabel>,
    /// Held GA places per pool and ticket type
    pub ga: BTreeMap<(ObjectLabel, TicketType), u32>,
}

impl SessionClaims {
    /// Whether nothing is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.ga.is_empty()
    }

    /// Claims as a flat item list
    #[must_use]
    pub fn items(&self) -> Vec<HoldItem> {
        self.units
            .iter()
            .map(|label| HoldItem::unit(label.clone()))
            .chain(self.ga.iter().map(|((pool, tt), n)| HoldItem {
                object: pool.clone(),
                ticket_type: Some(tt.clone()),
                quantity: *n,
            }))
            .collect()
    }
}

/// Everything `start_session` needs besides the mode
#[derive(Clone, Default)]
pub struct SessionRequest {
    /// Externally issued token (manual mode)
    pub supplied: Option<HoldToken>,
    /// Where the token is persisted between reloads
    pub store: Option<Arc<dyn TokenStore>>,
    /// Receiver of expiry and booking notifications for the token
    pub sink: Option<Arc<dyn EventSink>>,
}

impl std::fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRequest")
            .field("supplied", &self.supplied)
            .field("store", &self.store.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Expired,
    Released,
}

struct TokenRecord {
    token: HoldToken,
    created_at: DateTime<Utc>,
    deadline: Instant,
    lifecycle: Lifecycle,
    claims: SessionClaims,
    sink: Option<Arc<dyn EventSink>>,
}

impl TokenRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.lifecycle == Lifecycle::Active && now < self.deadline
    }

    fn emit(&self, notification: Notification) {
        if let Some(sink) = &self.sink {
            sink.emit(notification);
        }
    }
}

type SharedRecord = Arc<Mutex<TokenRecord>>;

/// Owner of hold tokens, their claims and their deadlines
pub struct SessionManager {
    catalog: Arc<ResourceCatalog>,
    config: HoldConfig,
    clock: Arc<dyn Clock>,
    tokens: RwLock<HashMap<HoldToken, SharedRecord>>,
    deadlines: Mutex<BTreeSet<(Instant, HoldToken)>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("active_tokens", &self.active_tokens())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager over `catalog`
    #[must_use]
    pub fn new(catalog: Arc<ResourceCatalog>, config: HoldConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            config,
            clock,
            tokens: RwLock::new(HashMap::new()),
            deadlines: Mutex::new(BTreeSet::new()),
        }
    }

    /// The shared catalog
    #[must_use]
    pub fn catalog(&self) -> &Arc<ResourceCatalog> {
        &self.catalog
    }

    /// Hold settings
    #[must_use]
    pub fn config(&self) -> &HoldConfig {
        &self.config
    }

    /// Injected clock
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn record(&self, token: &HoldToken) -> Option<SharedRecord> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    /// Returns the record if the token is live; expires it on the spot if
    /// its deadline has passed.
    fn live_record(&self, token: &HoldToken) -> Result<SharedRecord, HoldError> {
        let record = self
            .record(token)
            .ok_or_else(|| HoldError::TokenExpired(token.clone()))?;
        let now = self.clock.monotonic();
        let (live, lapsed) = {
            let rec = lock(&record);
            (rec.is_live(now), rec.lifecycle == Lifecycle::Active)
        };
        if live {
            Ok(record)
        } else {
            if lapsed {
                self.expire(token);
            }
            Err(HoldError::TokenExpired(token.clone()))
        }
    }

    fn register(&self, token: HoldToken, sink: Option<Arc<dyn EventSink>>) -> HoldToken {
        let deadline = self.clock.monotonic() + self.config.hold_ttl;
        let record = TokenRecord {
            token: token.clone(),
            created_at: self.clock.now(),
            deadline,
            lifecycle: Lifecycle::Active,
            claims: SessionClaims::default(),
            sink,
        };
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), Arc::new(Mutex::new(record)));
        lock(&self.deadlines).insert((deadline, token.clone()));
        tracing::info!(token = %token, ttl_secs = self.config.hold_ttl.as_secs(), "Hold session started");
        token
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Starts (or resumes) a session.
    ///
    /// Returns `None` in [`SessionMode::None`], where no holds are taken.
    ///
    /// # Errors
    ///
    /// - [`HoldError::NoActiveSession`] in manual mode without a supplied token
    /// - [`HoldError::TokenExpired`] when the supplied token is expired or released
    pub fn start_session(
        &self,
        mode: SessionMode,
        request: SessionRequest,
    ) -> Result<Option<HoldToken>, HoldError> {
        let SessionRequest { supplied, store, sink } = request;
        let token = match mode {
            SessionMode::None => return Ok(None),
            SessionMode::Start => self.register(HoldToken::generate(), sink),
            SessionMode::Continue => {
                let stored = store.as_ref().and_then(|store| {
                    store
                        .load()
                        .map_err(|e| tracing::warn!(error = %e, "Could not load stored hold token"))
                        .ok()
                        .flatten()
                });
                match stored.and_then(|token| self.resume(&token, sink.clone()).then_some(token)) {
                    Some(token) => token,
                    None => self.register(HoldToken::generate(), sink),
                }
            }
            SessionMode::Manual => {
                let token = supplied.ok_or(HoldError::NoActiveSession)?;
                match self.record(&token) {
                    None => self.register(token, sink),
                    Some(_) => {
                        if !self.resume(&token, sink) {
                            return Err(HoldError::TokenExpired(token));
                        }
                        token
                    }
                }
            }
        };

        if let Some(store) = &store {
            if let Err(e) = store.store(&token) {
                tracing::warn!(token = %token, error = %e, "Could not persist hold token");
            }
        }
        Ok(Some(token))
    }

    /// Re-attaches to a live token and drops claims the catalog no longer
    /// attributes to it
    fn resume(&self, token: &HoldToken, sink: Option<Arc<dyn EventSink>>) -> bool {
        let Ok(record) = self.live_record(token) else {
            return false;
        };
        let mut rec = lock(&record);
        rec.claims
            .units
            .retain(|label| self.catalog.holder(label).as_ref() == Some(token));
        let catalog = &self.catalog;
        rec.claims.ga = std::mem::take(&mut rec.claims.ga)
            .into_iter()
            .filter_map(|((pool, tt), n)| {
                let held = catalog.ga_held_by(&pool, token).get(&tt).copied().unwrap_or(0);
                (held > 0).then_some(((pool, tt), n.min(held)))
            })
            .collect();
        if sink.is_some() {
            rec.sink = sink;
        }
        self.refresh_deadline(&mut rec);
        tracing::info!(token = %token, units = rec.claims.units.len(), "Hold session resumed");
        true
    }

    /// Ends a session: releases every claim and retires the token.
    ///
    /// Returns the claims that were released. Idempotent.
    pub fn release_session(&self, token: &HoldToken) -> SessionClaims {
        let Some(record) = self.record(token) else {
            return SessionClaims::default();
        };
        let mut rec = lock(&record);
        if rec.lifecycle != Lifecycle::Active {
            return SessionClaims::default();
        }
        rec.lifecycle = Lifecycle::Released;
        lock(&self.deadlines).remove(&(rec.deadline, token.clone()));
        let claims = std::mem::take(&mut rec.claims);
        self.release_in_catalog(token, &claims);
        tracing::info!(token = %token, units = claims.units.len(), "Hold session released");
        claims
    }

    /// Expires a token: releases all its claims and emits exactly one
    /// [`Notification::HoldTokenExpired`].
    ///
    /// Returns `true` if this call performed the expiry. Idempotent.
    pub fn expire(&self, token: &HoldToken) -> bool {
        let Some(record) = self.record(token) else {
            return false;
        };
        let mut rec = lock(&record);
        self.expire_locked(&mut rec)
    }

    fn expire_locked(&self, rec: &mut TokenRecord) -> bool {
        if rec.lifecycle != Lifecycle::Active {
            return false;
        }
        rec.lifecycle = Lifecycle::Expired;
        lock(&self.deadlines).remove(&(rec.deadline, rec.token.clone()));
        let claims = std::mem::take(&mut rec.claims);
        self.release_in_catalog(&rec.token, &claims);
        tracing::info!(
            token = %rec.token,
            units = claims.units.len(),
            ga_pools = claims.ga.len(),
            "Hold token expired"
        );
        rec.emit(Notification::HoldTokenExpired {
            token: rec.token.clone(),
        });
        true
    }

    fn expire_if_due(&self, token: &HoldToken, now: Instant) -> bool {
        let Some(record) = self.record(token) else {
            return false;
        };
        let mut rec = lock(&record);
        if rec.lifecycle == Lifecycle::Active && rec.deadline <= now {
            self.expire_locked(&mut rec)
        } else {
            false
        }
    }

    /// Expires every token whose deadline has passed.
    ///
    /// Returns the tokens expired by this sweep. Retired records older than
    /// one TTL are dropped from the registry.
    pub fn sweep(&self) -> Vec<HoldToken> {
        let now = self.clock.monotonic();
        let due: Vec<HoldToken> = {
            let mut queue = lock(&self.deadlines);
            let mut due = Vec::new();
            while let Some((deadline, token)) = queue.first().cloned() {
                if deadline > now {
                    break;
                }
                queue.pop_first();
                due.push(token);
            }
            due
        };

        let expired: Vec<HoldToken> = due
            .into_iter()
            .filter(|token| self.expire_if_due(token, now))
            .collect();

        let ttl = self.config.hold_ttl;
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, record| {
                let rec = lock(record);
                rec.lifecycle == Lifecycle::Active || rec.deadline + ttl > now
            });
        expired
    }

    fn release_in_catalog(&self, token: &HoldToken, claims: &SessionClaims) {
        for label in &claims.units {
            self.catalog.release(label, token);
        }
        for ((pool, tt), count) in &claims.ga {
            self.catalog.release_ga(pool, tt, *count, token);
        }
    }

    // ========================================================================
    // Claims
    // ========================================================================

    /// Pushes the deadline out by the TTL (sliding mode only).
    ///
    /// # Errors
    ///
    /// Returns [`HoldError::TokenExpired`] if the token is no longer live.
    pub fn touch(&self, token: &HoldToken) -> Result<(), HoldError> {
        let record = self.live_record(token)?;
        self.refresh_deadline(&mut lock(&record));
        Ok(())
    }

    fn refresh_deadline(&self, rec: &mut TokenRecord) {
        if self.config.expiry_mode == ExpiryMode::Fixed {
            return;
        }
        let deadline = self.clock.monotonic() + self.config.hold_ttl;
        let mut queue = lock(&self.deadlines);
        queue.remove(&(rec.deadline, rec.token.clone()));
        queue.insert((deadline, rec.token.clone()));
        rec.deadline = deadline;
    }

    /// Claims a unit for `token` and attaches it to the token's claim set.
    ///
    /// A different token that blocks the claim but whose deadline has passed
    /// is expired first.
    ///
    /// # Errors
    ///
    /// Returns [`HoldError::TokenExpired`] if `token` is no longer live.
    pub fn claim(
        &self,
        token: &HoldToken,
        label: &ObjectLabel,
        rules: &SelectabilityRules,
    ) -> Result<ClaimOutcome, HoldError> {
        let record = self.live_record(token)?;

        let mut outcome = self.catalog.try_claim(label, token, rules);
        if let ClaimOutcome::AlreadyHeld { by } = &outcome {
            if self.expire_if_due(by, self.clock.monotonic()) {
                outcome = self.catalog.try_claim(label, token, rules);
            }
        }

        if matches!(outcome, ClaimOutcome::Granted { .. }) {
            let mut rec = lock(&record);
            if rec.lifecycle != Lifecycle::Active {
                // Expired between the grant and now
                self.catalog.release(label, token);
                return Err(HoldError::TokenExpired(token.clone()));
            }
            rec.claims.units.insert(label.clone());
            self.refresh_deadline(&mut rec);
        }
        Ok(outcome)
    }

    /// Releases a unit held by `token`.
    ///
    /// Releasing on behalf of a retired token is a no-op: its claims are
    /// already gone.
    pub fn release(&self, token: &HoldToken, label: &ObjectLabel) -> ReleaseOutcome {
        let Ok(record) = self.live_record(token) else {
            return ReleaseOutcome::Noop;
        };
        let mut rec = lock(&record);
        rec.claims.units.remove(label);
        let outcome = self.catalog.release(label, token);
        self.refresh_deadline(&mut rec);
        outcome
    }

    /// Claims `count` GA places for `token`, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`HoldError::TokenExpired`] if `token` is no longer live.
    pub fn claim_ga(
        &self,
        token: &HoldToken,
        pool: &ObjectLabel,
        ticket_type: &TicketType,
        count: u32,
        rules: &SelectabilityRules,
    ) -> Result<u32, HoldError> {
        let record = self.live_record(token)?;

        let mut granted = self.catalog.try_claim_ga(pool, ticket_type, count, token, rules);
        if granted == 0 && count > 0 {
            let now = self.clock.monotonic();
            let mut lapsed = false;
            for holder in self.catalog.ga_holders(pool) {
                if &holder != token {
                    lapsed |= self.expire_if_due(&holder, now);
                }
            }
            if lapsed {
                granted = self.catalog.try_claim_ga(pool, ticket_type, count, token, rules);
            }
        }

        if granted > 0 {
            let mut rec = lock(&record);
            if rec.lifecycle != Lifecycle::Active {
                self.catalog.release_ga(pool, ticket_type, granted, token);
                return Err(HoldError::TokenExpired(token.clone()));
            }
            *rec.claims
                .ga
                .entry((pool.clone(), ticket_type.clone()))
                .or_insert(0) += granted;
            self.refresh_deadline(&mut rec);
        }
        Ok(granted)
    }

    /// Releases up to `count` GA places held by `token`; returns how many
    /// were released
    pub fn release_ga(&self, token: &HoldToken, pool: &ObjectLabel, ticket_type: &TicketType, count: u32) -> u32 {
        let Ok(record) = self.live_record(token) else {
            return 0;
        };
        let mut rec = lock(&record);
        let released = self.catalog.release_ga(pool, ticket_type, count, token);
        let key = (pool.clone(), ticket_type.clone());
        if let Some(held) = rec.claims.ga.get_mut(&key) {
            *held = held.saturating_sub(released);
            if *held == 0 {
                rec.claims.ga.remove(&key);
            }
        }
        self.refresh_deadline(&mut rec);
        released
    }

    // ========================================================================
    // Bookings
    // ========================================================================

    /// Drops holds that a booking moved out of their token's ownership.
    ///
    /// Each affected token is told through [`Notification::HeldObjectBooked`].
    /// A token whose last claim was promoted to a booking is released.
    /// Returns the revoked holds.
    pub fn revoke_booked(&self, outcome: &BookingOutcome) -> Vec<DisplacedHold> {
        let BookingOutcome::Booked { promoted, displaced } = outcome else {
            return Vec::new();
        };
        let mut revoked = Vec::with_capacity(promoted.len() + displaced.len());
        for (hold, was_promoted) in promoted
            .iter()
            .map(|h| (h, true))
            .chain(displaced.iter().map(|h| (h, false)))
        {
            let Some(record) = self.record(&hold.token) else {
                continue;
            };
            let mut rec = lock(&record);
            if rec.lifecycle != Lifecycle::Active {
                continue;
            }
            match &hold.ticket_type {
                None => {
                    rec.claims.units.remove(&hold.object);
                }
                Some(tt) => {
                    let key = (hold.object.clone(), tt.clone());
                    if let Some(held) = rec.claims.ga.get_mut(&key) {
                        *held = held.saturating_sub(hold.quantity);
                        if *held == 0 {
                            rec.claims.ga.remove(&key);
                        }
                    }
                }
            }
            rec.emit(Notification::HeldObjectBooked {
                token: hold.token.clone(),
                item: HoldItem {
                    object: hold.object.clone(),
                    ticket_type: hold.ticket_type.clone(),
                    quantity: hold.quantity,
                },
            });
            if was_promoted && rec.claims.is_empty() {
                rec.lifecycle = Lifecycle::Released;
                lock(&self.deadlines).remove(&(rec.deadline, hold.token.clone()));
                tracing::info!(token = %hold.token, "All holds booked; token released");
            }
            revoked.push(hold.clone());
        }
        revoked
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Lifecycle state of a token
    #[must_use]
    pub fn state(&self, token: &HoldToken) -> Option<TokenState> {
        let record = self.record(token)?;
        let rec = lock(&record);
        let now = self.clock.monotonic();
        Some(match rec.lifecycle {
            Lifecycle::Released => TokenState::Released,
            Lifecycle::Expired => TokenState::Expired,
            Lifecycle::Active if rec.deadline <= now => TokenState::Expired,
            Lifecycle::Active if rec.deadline - now <= self.config.expiring_window => TokenState::Expiring,
            Lifecycle::Active => TokenState::Active,
        })
    }

    /// Whether the token is live
    #[must_use]
    pub fn is_live(&self, token: &HoldToken) -> bool {
        matches!(self.state(token), Some(TokenState::Active | TokenState::Expiring))
    }

    /// Remaining lifetime of a live token
    #[must_use]
    pub fn time_left(&self, token: &HoldToken) -> Option<Duration> {
        let record = self.record(token)?;
        let rec = lock(&record);
        let now = self.clock.monotonic();
        rec.is_live(now).then(|| rec.deadline - now)
    }

    /// Wall-clock creation time of a token
    #[must_use]
    pub fn created_at(&self, token: &HoldToken) -> Option<DateTime<Utc>> {
        self.record(token).map(|record| lock(&record).created_at)
    }

    /// Current claims of a token
    #[must_use]
    pub fn claims(&self, token: &HoldToken) -> Option<SessionClaims> {
        self.record(token).map(|record| lock(&record).claims.clone())
    }

    /// Number of live tokens
    #[must_use]
    pub fn active_tokens(&self) -> usize {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| lock(record).lifecycle == Lifecycle::Active)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{BookingConfirmation, UnitStatus};
    use crate::chart::{Category, ChartBuilder};
    use crate::environment::InMemoryTokenStore;
    use crate::notification::{drain, BroadcastSink};

    struct StepClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl StepClock {
        fn advance(&self, by: Duration) {
            *self.offset.lock().unwrap() += by;
        }
    }

    impl Clock for StepClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }

        fn monotonic(&self) -> Instant {
            self.base + *self.offset.lock().unwrap()
        }
    }

    fn setup(mode: ExpiryMode) -> (SessionManager, Arc<StepClock>) {
        let layout = ChartBuilder::new()
            .category(Category::new("A", "A"))
            .row("A", "A", &["A-1", "A-2", "A-3"])
            .general_admission("Floor", "A", 5)
            .build()
            .unwrap();
        let catalog = Arc::new(ResourceCatalog::new(Arc::new(layout), vec!["e".into()]));
        let clock = Arc::new(StepClock {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        });
        let config = HoldConfig {
            expiring_window: Duration::from_secs(30),
            ..HoldConfig::default()
        }
        .with_hold_ttl(Duration::from_secs(60))
        .with_expiry_mode(mode);
        (SessionManager::new(catalog, config, clock.clone()), clock)
    }

    fn start(sessions: &SessionManager, sink: Option<Arc<dyn EventSink>>) -> HoldToken {
        sessions
            .start_session(SessionMode::Start, SessionRequest { sink, ..SessionRequest::default() })
            .unwrap()
            .unwrap()
    }

    #[test]
    fn none_mode_has_no_token() {
        let (sessions, _) = setup(ExpiryMode::Sliding);
        let token = sessions
            .start_session(SessionMode::None, SessionRequest::default())
            .unwrap();
        assert!(token.is_none());
    }

    #[test]
    fn expiry_releases_everything_and_notifies_once() {
        let (sessions, clock) = setup(ExpiryMode::Sliding);
        let sink = Arc::new(BroadcastSink::default());
        let mut rx = sink.subscribe();
        let token = start(&sessions, Some(sink.clone()));
        let rules = SelectabilityRules::default();

        sessions.claim(&token, &"A-1".into(), &rules).unwrap();
        sessions.claim(&token, &"A-2".into(), &rules).unwrap();
        assert_eq!(sessions.claim_ga(&token, &"Floor".into(), &TicketType::none(), 3, &rules).unwrap(), 3);

        clock.advance(Duration::from_secs(61));
        assert_eq!(sessions.sweep(), vec![token.clone()]);
        assert!(sessions.sweep().is_empty());
        assert!(!sessions.expire(&token));

        let catalog = sessions.catalog();
        assert_eq!(catalog.status(&"A-1".into()), Some(UnitStatus::Free));
        assert_eq!(catalog.status(&"A-2".into()), Some(UnitStatus::Free));
        assert_eq!(catalog.num_free(&"Floor".into()), Some(5));
        assert_eq!(
            drain(&mut rx),
            vec![Notification::HoldTokenExpired { token: token.clone() }]
        );
        assert_eq!(sessions.state(&token), Some(TokenState::Expired));
        assert!(matches!(
            sessions.claim(&token, &"A-3".into(), &rules),
            Err(HoldError::TokenExpired(_))
        ));
    }

    #[test]
    fn sliding_touch_extends_fixed_does_not() {
        for (mode, survives) in [(ExpiryMode::Sliding, true), (ExpiryMode::Fixed, false)] {
            let (sessions, clock) = setup(mode);
            let token = start(&sessions, None);
            clock.advance(Duration::from_secs(40));
            sessions.touch(&token).unwrap();
            clock.advance(Duration::from_secs(40));
            sessions.sweep();
            assert_eq!(sessions.is_live(&token), survives, "{mode:?}");
        }
    }

    #[test]
    fn expiring_window_is_reported() {
        let (sessions, clock) = setup(ExpiryMode::Fixed);
        let token = start(&sessions, None);
        assert_eq!(sessions.state(&token), Some(TokenState::Active));
        clock.advance(Duration::from_secs(30));
        assert_eq!(sessions.state(&token), Some(TokenState::Expiring));
        assert_eq!(sessions.time_left(&token), Some(Duration::from_secs(30)));
    }

    #[test]
    fn lapsed_holder_is_expired_lazily_when_it_blocks_a_claim() {
        let (sessions, clock) = setup(ExpiryMode::Fixed);
        let rules = SelectabilityRules::default();
        let old = start(&sessions, None);
        sessions.claim(&old, &"A-1".into(), &rules).unwrap();

        clock.advance(Duration::from_secs(61));
        let new = start(&sessions, None);
        assert_eq!(
            sessions.claim(&new, &"A-1".into(), &rules).unwrap(),
            ClaimOutcome::Granted { renewed: false }
        );
        assert_eq!(sessions.state(&old), Some(TokenState::Expired));
    }

    #[test]
    fn release_session_returns_units_to_free() {
        let (sessions, _) = setup(ExpiryMode::Sliding);
        let rules = SelectabilityRules::default();
        let token = start(&sessions, None);
        sessions.claim(&token, &"A-1".into(), &rules).unwrap();
        sessions.claim(&token, &"A-2".into(), &rules).unwrap();

        let released = sessions.release_session(&token);
        assert_eq!(released.units.len(), 2);
        assert_eq!(sessions.catalog().status(&"A-1".into()), Some(UnitStatus::Free));
        assert_eq!(sessions.state(&token), Some(TokenState::Released));
        assert!(sessions.release_session(&token).is_empty());
    }

    #[test]
    fn continue_mode_resumes_live_token_and_drops_lost_claims() {
        let (sessions, _) = setup(ExpiryMode::Sliding);
        let rules = SelectabilityRules::default();
        let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
        let request = SessionRequest {
            store: Some(store.clone()),
            ..SessionRequest::default()
        };

        let first = sessions.start_session(SessionMode::Continue, request.clone()).unwrap().unwrap();
        sessions.claim(&first, &"A-1".into(), &rules).unwrap();
        sessions.claim(&first, &"A-2".into(), &rules).unwrap();
        // A-2 gets booked behind the session's back
        sessions.catalog().confirm_booked(&BookingConfirmation {
            id: "x".into(),
            event: "e".into(),
            object: "A-2".into(),
            hold_token: None,
            ticket_type: None,
            quantity: 1,
        });

        let resumed = sessions.start_session(SessionMode::Continue, request.clone()).unwrap().unwrap();
        assert_eq!(resumed, first);
        let claims = sessions.claims(&resumed).unwrap();
        assert_eq!(claims.units, BTreeSet::from(["A-1".into()]));

        sessions.release_session(&resumed);
        let fresh = sessions.start_session(SessionMode::Continue, request).unwrap().unwrap();
        assert_ne!(fresh, first);
        assert_eq!(store.load().unwrap(), Some(fresh));
    }

    #[test]
    fn manual_mode_adopts_supplied_token() {
        let (sessions, _) = setup(ExpiryMode::Sliding);
        let supplied = HoldToken::from_external("issued-by-backend");
        let request = SessionRequest {
            supplied: Some(supplied.clone()),
            ..SessionRequest::default()
        };
        assert_eq!(
            sessions.start_session(SessionMode::Manual, request.clone()).unwrap(),
            Some(supplied.clone())
        );
        sessions.expire(&supplied);
        assert_eq!(
            sessions.start_session(SessionMode::Manual, request),
            Err(HoldError::TokenExpired(supplied))
        );
        assert_eq!(
            sessions.start_session(SessionMode::Manual, SessionRequest::default()),
            Err(HoldError::NoActiveSession)
        );
    }

    #[test]
    fn booking_the_last_claim_releases_the_token() {
        let (sessions, _) = setup(ExpiryMode::Sliding);
        let sink = Arc::new(BroadcastSink::default());
        let mut rx = sink.subscribe();
        let token = start(&sessions, Some(sink.clone()));
        sessions.claim(&token, &"A-1".into(), &SelectabilityRules::default()).unwrap();

        let outcome = sessions.catalog().confirm_booked(&BookingConfirmation {
            id: "order-1".into(),
            event: "e".into(),
            object: "A-1".into(),
            hold_token: Some(token.clone()),
            ticket_type: None,
            quantity: 1,
        });
        let revoked = sessions.revoke_booked(&outcome);
        assert_eq!(revoked.len(), 1);
        assert_eq!(sessions.state(&token), Some(TokenState::Released));
        assert_eq!(
            drain(&mut rx),
            vec![Notification::HeldObjectBooked {
                token,
                item: HoldItem::unit("A-1"),
            }]
        );
    }
}
