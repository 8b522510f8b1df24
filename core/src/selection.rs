//! The buyer's in-progress selection.
//!
//! [`SelectionState`] is owned by one rendering context and needs no
//! synchronisation. Every mutation runs the same pipeline:
//!
//! 1. claim or release in the catalog through the [`SessionManager`]
//!    (which also touches the token)
//! 2. record the change locally
//! 3. emit `ObjectSelected` / `ObjectDeselected`
//! 4. re-evaluate the validators and emit exactly one valid/invalid
//!
//! Without a token (session mode `none`) nothing is claimed; availability is
//! only checked.

use crate::catalog::{ClaimOutcome, UnitStatus};
use crate::chart::{Bookable, BookableObject};
use crate::error::HoldError;
use crate::notification::{EventSink, HoldItem, Notification};
use crate::selectability::SelectabilityRules;
use crate::session::{SessionClaims, SessionManager};
use crate::solver::Solution;
use crate::types::{CategoryKey, HoldToken, ObjectLabel, SelectTarget, TicketType};
use crate::validation::{ActionScope, ValidationInput, ValidationResult, ValidatorEngine};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identifies one selection entry, so a pending confirmation can find the
/// exact claim it was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClaimId(u64);

/// One selected unit, or a number of places of a GA area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEntry {
    /// Entry id
    pub claim: ClaimId,
    /// Object
    pub object: ObjectLabel,
    /// Ticket type chosen by the buyer
    pub ticket_type: Option<TicketType>,
    /// Places (1 for units)
    pub quantity: u32,
    /// Whether the entry holds a catalog claim
    pub held: bool,
    /// Whether the object is a GA area
    pub counted: bool,
}

impl SelectionEntry {
    /// The entry as a notification item
    #[must_use]
    pub fn item(&self) -> HoldItem {
        HoldItem {
            object: self.object.clone(),
            ticket_type: self.ticket_type.clone(),
            quantity: self.quantity,
        }
    }

    fn ga_key(&self) -> TicketType {
        TicketType::or_none(self.ticket_type.as_ref())
    }
}

/// `maxSelectedObjects`: overall, per category and per ticket type limits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectionLimits {
    /// Overall limit on selected places
    pub total: Option<u32>,
    /// Limits per category
    pub per_category: BTreeMap<CategoryKey, u32>,
    /// Limits per ticket type
    pub per_ticket_type: BTreeMap<TicketType, u32>,
}

impl SelectionLimits {
    /// Overall limit only
    #[must_use]
    pub fn total(limit: u32) -> Self {
        Self {
            total: Some(limit),
            ..Self::default()
        }
    }
}

/// Collaborators of one selection mutation
#[derive(Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Sessions (and through them, the catalog)
    pub sessions: &'a SessionManager,
    /// Active token; `None` means selections are visual only
    pub token: Option<&'a HoldToken>,
    /// Selectability rules
    pub rules: &'a SelectabilityRules,
    /// Selection limits
    pub limits: &'a SelectionLimits,
    /// Validators
    pub validators: &'a ValidatorEngine,
    /// Receiver of selection notifications
    pub sink: Option<&'a dyn EventSink>,
    /// Whether GA selections take holds
    pub hold_on_select_for_ga: bool,
}

impl SelectionContext<'_> {
    fn emit(&self, notification: Notification) {
        if let Some(sink) = self.sink {
            sink.emit(notification);
        }
    }

    fn holds(&self, object: &BookableObject) -> Option<&HoldToken> {
        if object.is_counted() && !self.hold_on_select_for_ga {
            None
        } else {
            self.token
        }
    }
}

/// Outcome of a diff-based replace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceReport {
    /// Entries added
    pub added: Vec<SelectionEntry>,
    /// Entries removed
    pub removed: Vec<SelectionEntry>,
    /// Targets that could not be added
    pub failures: Vec<(SelectTarget, HoldError)>,
}

/// Ordered set of selected items
#[derive(Debug, Default)]
pub struct SelectionState {
    entries: Vec<SelectionEntry>,
    next_claim: u64,
}

impl SelectionState {
    /// Empty selection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected items in selection order
    #[must_use]
    pub fn list(&self) -> &[SelectionEntry] {
        &self.entries
    }

    /// Whether nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entry is still part of the selection
    #[must_use]
    pub fn contains_claim(&self, claim: ClaimId) -> bool {
        self.entries.iter().any(|e| e.claim == claim)
    }

    /// Entry by id
    #[must_use]
    pub fn entry(&self, claim: ClaimId) -> Option<&SelectionEntry> {
        self.entries.iter().find(|e| e.claim == claim)
    }

    /// Whether a unit is selected
    #[must_use]
    pub fn contains_unit(&self, label: &ObjectLabel) -> bool {
        self.entries.iter().any(|e| !e.counted && &e.object == label)
    }

    /// Labels of selected units (GA areas excluded)
    #[must_use]
    pub fn selected_units(&self) -> BTreeSet<ObjectLabel> {
        self.entries
            .iter()
            .filter(|e| !e.counted)
            .map(|e| e.object.clone())
            .collect()
    }

    /// Selected places of a GA area per ticket type
    #[must_use]
    pub fn selection_per_ticket_type(&self, pool: &ObjectLabel) -> BTreeMap<TicketType, u32> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.counted && &e.object == pool) {
            *counts.entry(entry.ga_key()).or_insert(0) += entry.quantity;
        }
        counts
    }

    /// Total selected places
    #[must_use]
    pub fn total_places(&self) -> u32 {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    fn next_claim(&mut self) -> ClaimId {
        self.next_claim += 1;
        ClaimId(self.next_claim)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Adds a unit, or places of a GA area.
    ///
    /// Returns `None` when the unit is already selected (or a zero amount
    /// was asked for); nothing is emitted then.
    ///
    /// # Errors
    ///
    /// - [`HoldError::UnknownObject`] / [`HoldError::NotSelectable`]
    /// - [`HoldError::SelectionLimitReached`]
    /// - [`HoldError::AlreadyHeldOrBooked`] / [`HoldError::CapacityExhausted`]
    /// - [`HoldError::TokenExpired`]
    pub fn add(
        &mut self,
        ctx: &SelectionContext<'_>,
        target: &SelectTarget,
    ) -> Result<Option<SelectionEntry>, HoldError> {
        let catalog = ctx.sessions.catalog();
        let layout = catalog.layout();
        let object = layout
            .object(&target.object)
            .ok_or_else(|| HoldError::UnknownObject(target.object.clone()))?;
        if !ctx.rules.permits(layout, object) {
            return Err(HoldError::NotSelectable(target.object.clone()));
        }

        let counted = object.is_counted();
        let quantity = if counted { target.amount } else { 1 };
        if quantity == 0 || (!counted && self.contains_unit(&target.object)) {
            return Ok(None);
        }
        self.check_limits(ctx, object, target.ticket_type.as_ref(), quantity)?;

        let held = match ctx.holds(object) {
            Some(token) => {
                Self::claim(ctx, token, object, target.ticket_type.as_ref(), quantity)?;
                true
            }
            None => {
                Self::check_available(ctx, object, quantity)?;
                false
            }
        };

        let entry = SelectionEntry {
            claim: self.next_claim(),
            object: target.object.clone(),
            ticket_type: target.ticket_type.clone(),
            quantity,
            held,
            counted,
        };
        self.entries.push(entry.clone());
        tracing::debug!(object = %entry.object, quantity, held, "Object selected");

        ctx.emit(Notification::ObjectSelected { item: entry.item() });
        self.settle(ctx, &ActionScope::added(entry.object.clone()));
        Ok(Some(entry))
    }

    fn check_limits(
        &self,
        ctx: &SelectionContext<'_>,
        object: &BookableObject,
        ticket_type: Option<&TicketType>,
        quantity: u32,
    ) -> Result<(), HoldError> {
        let limits = ctx.limits;
        if let Some(limit) = limits.total {
            if self.total_places() + quantity > limit {
                return Err(HoldError::SelectionLimitReached { limit, scope: None });
            }
        }

        if let Some(category) = object.category() {
            if let Some(&limit) = limits.per_category.get(category) {
                let layout = ctx.sessions.catalog().layout();
                let current: u32 = self
                    .entries
                    .iter()
                    .filter(|e| {
                        layout
                            .object(&e.object)
                            .and_then(Bookable::category)
                            .is_some_and(|c| c == category)
                    })
                    .map(|e| e.quantity)
                    .sum();
                if current + quantity > limit {
                    return Err(HoldError::SelectionLimitReached {
                        limit,
                        scope: Some(format!("category {category}")),
                    });
                }
            }
        }

        let key = TicketType::or_none(ticket_type);
        if let Some(&limit) = limits.per_ticket_type.get(&key) {
            let current: u32 = self
                .entries
                .iter()
                .filter(|e| e.ga_key() == key)
                .map(|e| e.quantity)
                .sum();
            if current + quantity > limit {
                return Err(HoldError::SelectionLimitReached {
                    limit,
                    scope: Some(format!("ticket type {key}")),
                });
            }
        }
        Ok(())
    }

    fn claim(
        ctx: &SelectionContext<'_>,
        token: &HoldToken,
        object: &BookableObject,
        ticket_type: Option<&TicketType>,
        quantity: u32,
    ) -> Result<(), HoldError> {
        let label = &object.label;
        if object.is_counted() {
            let tt = TicketType::or_none(ticket_type);
            let granted = ctx.sessions.claim_ga(token, label, &tt, quantity, ctx.rules)?;
            if granted == 0 {
                return Err(HoldError::CapacityExhausted {
                    object: label.clone(),
                    requested: quantity,
                    available: ctx.sessions.catalog().num_free(label).unwrap_or(0),
                });
            }
            return Ok(());
        }

        match ctx.sessions.claim(token, label, ctx.rules)? {
            ClaimOutcome::Granted { .. } => Ok(()),
            ClaimOutcome::AlreadyHeld { .. } | ClaimOutcome::AlreadyBooked => {
                Err(HoldError::AlreadyHeldOrBooked(label.clone()))
            }
            ClaimOutcome::NotSelectable => Err(HoldError::NotSelectable(label.clone())),
        }
    }

    fn check_available(
        ctx: &SelectionContext<'_>,
        object: &BookableObject,
        quantity: u32,
    ) -> Result<(), HoldError> {
        let catalog = ctx.sessions.catalog();
        let label = &object.label;
        if object.is_counted() {
            let available = catalog.num_free(label).unwrap_or(0);
            if available < quantity {
                return Err(HoldError::CapacityExhausted {
                    object: label.clone(),
                    requested: quantity,
                    available,
                });
            }
            return Ok(());
        }
        match catalog.status(label) {
            Some(UnitStatus::Free) => Ok(()),
            Some(UnitStatus::Held(holder)) if Some(&holder) == ctx.token => Ok(()),
            _ => Err(HoldError::AlreadyHeldOrBooked(label.clone())),
        }
    }

    /// Removes a unit, or `amount` places of a GA area (matching the target's
    /// ticket type when given).
    ///
    /// # Errors
    ///
    /// Returns [`HoldError::NotSelected`] if nothing matching is selected.
    pub fn remove(
        &mut self,
        ctx: &SelectionContext<'_>,
        target: &SelectTarget,
    ) -> Result<Vec<SelectionEntry>, HoldError> {
        let mut remaining = target.amount.max(1);
        let mut removed = Vec::new();

        while remaining > 0 {
            let Some(index) = self.entries.iter().rposition(|e| {
                e.object == target.object
                    && (!e.counted
                        || target.ticket_type.as_ref().is_none_or(|tt| &e.ga_key() == tt))
            }) else {
                break;
            };

            let entry = &mut self.entries[index];
            if !entry.counted || entry.quantity <= remaining {
                remaining = if entry.counted { remaining - entry.quantity } else { 0 };
                removed.push(self.entries.remove(index));
            } else {
                entry.quantity -= remaining;
                let mut part = entry.clone();
                part.quantity = remaining;
                remaining = 0;
                removed.push(part);
            }
        }

        if removed.is_empty() {
            return Err(HoldError::NotSelected(target.object.clone()));
        }

        for entry in &removed {
            Self::release(ctx, entry);
            tracing::debug!(object = %entry.object, quantity = entry.quantity, "Object deselected");
            ctx.emit(Notification::ObjectDeselected { item: entry.item() });
        }
        self.settle(ctx, &ActionScope::removed(target.object.clone()));
        Ok(removed)
    }

    /// Removes one entry by id, releasing its hold. Used to roll back a
    /// claim the backend rejected.
    pub fn remove_claim(&mut self, ctx: &SelectionContext<'_>, claim: ClaimId) -> Option<SelectionEntry> {
        let index = self.entries.iter().position(|e| e.claim == claim)?;
        let entry = self.entries.remove(index);
        Self::release(ctx, &entry);
        ctx.emit(Notification::ObjectDeselected { item: entry.item() });
        self.settle(ctx, &ActionScope::removed(entry.object.clone()));
        Some(entry)
    }

    /// Rolls back several entries; each removal is its own mutation
    pub fn rollback(&mut self, ctx: &SelectionContext<'_>, claims: &[ClaimId]) -> Vec<SelectionEntry> {
        claims
            .iter()
            .filter_map(|claim| self.remove_claim(ctx, *claim))
            .collect()
    }

    fn release(ctx: &SelectionContext<'_>, entry: &SelectionEntry) {
        if !entry.held {
            return;
        }
        let Some(token) = ctx.token else {
            return;
        };
        if entry.counted {
            ctx.sessions
                .release_ga(token, &entry.object, &entry.ga_key(), entry.quantity);
        } else {
            ctx.sessions.release(token, &entry.object);
        }
    }

    /// Empties the selection as one mutation: every item is deselected, then
    /// validity is emitted once. The token stays alive.
    pub fn clear(&mut self, ctx: &SelectionContext<'_>) -> Vec<SelectionEntry> {
        let removed = std::mem::take(&mut self.entries);
        if removed.is_empty() {
            return removed;
        }
        let mut scope = ActionScope::default();
        for entry in &removed {
            Self::release(ctx, entry);
            ctx.emit(Notification::ObjectDeselected { item: entry.item() });
            scope.removed.insert(entry.object.clone());
        }
        self.settle(ctx, &scope);
        removed
    }

    /// Replaces the selection with `targets` by diffing.
    ///
    /// Removals run first, then additions, one unit at a time; unaffected
    /// items are left alone and emit nothing. Failed additions are reported,
    /// successful ones stay.
    pub fn replace(&mut self, ctx: &SelectionContext<'_>, targets: &[SelectTarget]) -> ReplaceReport {
        let mut report = ReplaceReport::default();

        let mut desired_units: Vec<&SelectTarget> = Vec::new();
        let mut desired_ga: BTreeMap<(ObjectLabel, TicketType), (u32, &SelectTarget)> = BTreeMap::new();
        let layout = ctx.sessions.catalog().layout();
        for target in targets {
            match layout.object(&target.object) {
                Some(object) if object.is_counted() => {
                    let key = (target.object.clone(), TicketType::or_none(target.ticket_type.as_ref()));
                    desired_ga.entry(key).or_insert((0, target)).0 += target.amount;
                }
                _ => {
                    if !desired_units.iter().any(|t| t.object == target.object) {
                        desired_units.push(target);
                    }
                }
            }
        }

        // Removals
        let stale_units: Vec<ObjectLabel> = self
            .entries
            .iter()
            .filter(|e| !e.counted && !desired_units.iter().any(|t| t.object == e.object))
            .map(|e| e.object.clone())
            .collect();
        for label in stale_units {
            if let Ok(mut removed) = self.remove(ctx, &SelectTarget::object(label)) {
                report.removed.append(&mut removed);
            }
        }

        let mut current_ga: BTreeMap<(ObjectLabel, TicketType), u32> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.counted) {
            *current_ga
                .entry((entry.object.clone(), entry.ga_key()))
                .or_insert(0) += entry.quantity;
        }
        for ((pool, tt), current) in &current_ga {
            let wanted = desired_ga.get(&(pool.clone(), tt.clone())).map_or(0, |(n, _)| *n);
            if wanted < *current {
                let target = SelectTarget::object(pool.clone())
                    .with_ticket_type(tt.clone())
                    .with_amount(current - wanted);
                if let Ok(mut removed) = self.remove(ctx, &target) {
                    report.removed.append(&mut removed);
                }
            }
        }

        // Additions
        for target in desired_units {
            if self.contains_unit(&target.object) {
                continue;
            }
            match self.add(ctx, target) {
                Ok(Some(entry)) => report.added.push(entry),
                Ok(None) => {}
                Err(error) => report.failures.push((target.clone(), error)),
            }
        }
        for ((pool, tt), (wanted, template)) in desired_ga {
            let current = current_ga.get(&(pool.clone(), tt)).copied().unwrap_or(0);
            if wanted > current {
                let target = SelectTarget {
                    object: pool,
                    ticket_type: template.ticket_type.clone(),
                    amount: wanted - current,
                };
                match self.add(ctx, &target) {
                    Ok(Some(entry)) => report.added.push(entry),
                    Ok(None) => {}
                    Err(error) => report.failures.push((target, error)),
                }
            }
        }
        report
    }

    /// Takes over a best-available solution whose picks are already claimed.
    ///
    /// With `clear_selection`, entries that are not part of the solution are
    /// removed first (each as its own mutation). Picked units that are already
    /// selected stay untouched; every other pick is appended and announced
    /// with `ObjectSelected` followed by validity.
    pub fn adopt(
        &mut self,
        ctx: &SelectionContext<'_>,
        solution: &Solution,
        clear_selection: bool,
    ) -> ReplaceReport {
        let mut report = ReplaceReport::default();
        if clear_selection {
            let stale: Vec<ClaimId> = self
                .entries
                .iter()
                .filter(|e| {
                    e.counted || !solution.picks.iter().any(|p| !p.counted && p.object == e.object)
                })
                .map(|e| e.claim)
                .collect();
            report.removed = self.rollback(ctx, &stale);
        }

        for pick in &solution.picks {
            if !pick.counted && self.contains_unit(&pick.object) {
                continue;
            }
            let entry = SelectionEntry {
                claim: self.next_claim(),
                object: pick.object.clone(),
                ticket_type: pick.ticket_type.clone(),
                quantity: pick.quantity,
                held: ctx.token.is_some(),
                counted: pick.counted,
            };
            self.entries.push(entry.clone());
            ctx.emit(Notification::ObjectSelected { item: entry.item() });
            self.settle(ctx, &ActionScope::added(entry.object.clone()));
            report.added.push(entry);
        }
        report
    }

    // ========================================================================
    // Silent bookkeeping
    // ========================================================================

    /// Drops held entries the session no longer owns (expiry, booking).
    ///
    /// Emits nothing; the session already reported why the claims went away.
    pub fn reconcile(&mut self, claims: &SessionClaims) -> Vec<SelectionEntry> {
        let mut budget: BTreeMap<(ObjectLabel, TicketType), u32> = claims.ga.clone();
        let mut dropped = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for mut entry in std::mem::take(&mut self.entries) {
            if !entry.held {
                kept.push(entry);
                continue;
            }
            if !entry.counted {
                if claims.units.contains(&entry.object) {
                    kept.push(entry);
                } else {
                    dropped.push(entry);
                }
                continue;
            }
            let left = budget.entry((entry.object.clone(), entry.ga_key())).or_insert(0);
            if *left >= entry.quantity {
                *left -= entry.quantity;
                kept.push(entry);
            } else {
                let mut lost = entry.clone();
                lost.quantity = entry.quantity - *left;
                entry.quantity = *left;
                *left = 0;
                dropped.push(lost);
                if entry.quantity > 0 {
                    kept.push(entry);
                }
            }
        }
        self.entries = kept;
        dropped
    }

    /// Rebuilds the selection from a resumed session's claims
    pub fn restore(&mut self, claims: &SessionClaims) {
        self.entries.clear();
        for label in &claims.units {
            let claim = self.next_claim();
            self.entries.push(SelectionEntry {
                claim,
                object: label.clone(),
                ticket_type: None,
                quantity: 1,
                held: true,
                counted: false,
            });
        }
        for ((pool, tt), quantity) in &claims.ga {
            let claim = self.next_claim();
            self.entries.push(SelectionEntry {
                claim,
                object: pool.clone(),
                ticket_type: (tt != &TicketType::none()).then(|| tt.clone()),
                quantity: *quantity,
                held: true,
                counted: true,
            });
        }
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Evaluates the validators for `action` without emitting anything
    #[must_use]
    pub fn validate(&self, ctx: &SelectionContext<'_>, action: &ActionScope) -> ValidationResult {
        let catalog = ctx.sessions.catalog();
        let selected = self.selected_units();
        ctx.validators.evaluate(&ValidationInput {
            layout: catalog.layout(),
            catalog,
            selected: &selected,
            action,
        })
    }

    /// Evaluates the validators and emits the one valid/invalid notification
    pub fn settle(&self, ctx: &SelectionContext<'_>, action: &ActionScope) -> ValidationResult {
        let result = self.validate(ctx, action);
        ctx.emit(result.to_notification());
        result
    }
}
