//! Resource catalog: the authoritative state of every bookable unit and GA
//! pool of one chart rendering (one or more events).
//!
//! **Concurrency Strategy**: one mutex per unit and one per GA pool. The map
//! structure is fixed when the catalog is built, so lookups never lock and
//! unrelated units never contend. Every mutating operation is a single
//! check-and-set under the entry's lock, which makes it linearizable: two
//! concurrent claims for the same unit resolve to exactly one winner.
//! Multi-unit operations are deliberately not atomic as a group.

use crate::chart::{Bookable, ChartLayout};
use crate::selectability::SelectabilityRules;
use crate::types::{CategoryKey, EventKey, HoldToken, ObjectLabel, SectionKey, TicketType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ============================================================================
// Outcomes
// ============================================================================

/// Status of a unit as seen by the combined rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Nobody holds or booked it
    Free,
    /// Held by the given token
    Held(HoldToken),
    /// Booked (terminal)
    Booked,
}

/// Result of [`ResourceCatalog::try_claim`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The unit is now held by the caller; `renewed` when it already was
    Granted {
        /// The caller already held the unit
        renewed: bool,
    },
    /// Another token holds the unit
    AlreadyHeld {
        /// Current holder
        by: HoldToken,
    },
    /// The unit is booked
    AlreadyBooked,
    /// Selectability rules exclude the unit, or it is not an addressable unit
    NotSelectable,
}

/// Result of [`ResourceCatalog::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The caller's hold was removed
    Released,
    /// Another token holds the unit
    NotOwner,
    /// Nothing to release
    Noop,
}

/// Booking pushed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    /// Idempotency id; a repeated id is ignored
    pub id: String,
    /// Event the booking is for
    pub event: EventKey,
    /// Booked object
    pub object: ObjectLabel,
    /// Token the booking was made with, if any
    #[serde(default)]
    pub hold_token: Option<HoldToken>,
    /// Ticket type (GA areas)
    #[serde(default)]
    pub ticket_type: Option<TicketType>,
    /// Places booked (GA areas); ignored for units
    #[serde(default = "one")]
    pub quantity: u32,
}

const fn one() -> u32 {
    1
}

/// A hold removed from a token because of a booking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplacedHold {
    /// Token that lost the hold
    pub token: HoldToken,
    /// Object
    pub object: ObjectLabel,
    /// Ticket type (GA areas)
    pub ticket_type: Option<TicketType>,
    /// Places (1 for units)
    pub quantity: u32,
}

/// Result of [`ResourceCatalog::confirm_booked`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    /// Booking applied
    Booked {
        /// Holds of the booking's own token that became the booking
        promoted: Vec<DisplacedHold>,
        /// Holds of other tokens force-released to keep the catalog consistent
        displaced: Vec<DisplacedHold>,
    },
    /// Same confirmation id seen before, or unit already booked for the event
    Duplicate,
    /// The object is not on this chart, or the event is not rendered by it
    Unknown,
}

/// Capacity counters of a GA pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GaAvailability {
    /// Total places
    pub capacity: u32,
    /// Booked places (maximum over the catalog's events)
    pub booked: u32,
    /// Places held by live tokens
    pub held: u32,
    /// `capacity - booked - held`
    pub free: u32,
}

/// Aggregate counts of one section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionSummary {
    /// Section
    pub section: SectionKey,
    /// Objects in the section that can currently be selected
    pub selectable_objects: u32,
    /// Distinct categories of those objects, in chart order
    pub selectable_categories: Vec<CategoryKey>,
}

/// Snapshot of what is claimable, used by the best-available solver
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Availability {
    units: HashSet<ObjectLabel>,
    ga_free: HashMap<ObjectLabel, u32>,
}

impl Availability {
    /// Builds a snapshot from explicit sets
    #[must_use]
    pub fn new(units: HashSet<ObjectLabel>, ga_free: HashMap<ObjectLabel, u32>) -> Self {
        Self { units, ga_free }
    }

    /// Whether the unit can be claimed
    #[must_use]
    pub fn is_free(&self, label: &ObjectLabel) -> bool {
        self.units.contains(label)
    }

    /// Free places of a GA pool
    #[must_use]
    pub fn ga_free(&self, label: &ObjectLabel) -> u32 {
        self.ga_free.get(label).copied().unwrap_or(0)
    }

    /// Marks a unit as taken (lost race, or granted earlier in the same pick)
    pub fn exclude(&mut self, label: &ObjectLabel) {
        self.units.remove(label);
        self.ga_free.remove(label);
    }

    /// Number of claimable units plus free GA places
    #[must_use]
    pub fn total(&self) -> u32 {
        let units = u32::try_from(self.units.len()).unwrap_or(u32::MAX);
        self.ga_free.values().fold(units, |acc, n| acc.saturating_add(*n))
    }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug, Default)]
struct UnitSlot {
    holder: Option<HoldToken>,
    booked_for: BTreeSet<EventKey>,
}

impl UnitSlot {
    fn status(&self) -> UnitStatus {
        if !self.booked_for.is_empty() {
            UnitStatus::Booked
        } else if let Some(holder) = &self.holder {
            UnitStatus::Held(holder.clone())
        } else {
            UnitStatus::Free
        }
    }
}

#[derive(Debug)]
struct PoolSlot {
    capacity: u32,
    booked: BTreeMap<EventKey, u32>,
    holds: BTreeMap<HoldToken, BTreeMap<TicketType, u32>>,
}

impl PoolSlot {
    fn booked_count(&self) -> u32 {
        self.booked.values().copied().max().unwrap_or(0)
    }

    fn held_count(&self) -> u32 {
        self.holds
            .values()
            .flat_map(BTreeMap::values)
            .fold(0_u32, |acc, n| acc.saturating_add(*n))
    }

    fn num_free(&self) -> u32 {
        self.capacity
            .saturating_sub(self.booked_count())
            .saturating_sub(self.held_count())
    }

    fn availability(&self) -> GaAvailability {
        GaAvailability {
            capacity: self.capacity,
            booked: self.booked_count(),
            held: self.held_count(),
            free: self.num_free(),
        }
    }

    /// Removes up to `count` places of `ticket_type` held by `token`
    fn take(&mut self, token: &HoldToken, ticket_type: &TicketType, count: u32) -> u32 {
        let Some(per_type) = self.holds.get_mut(token) else {
            return 0;
        };
        let Some(held) = per_type.get_mut(ticket_type) else {
            return 0;
        };
        let taken = (*held).min(count);
        *held -= taken;
        if *held == 0 {
            per_type.remove(ticket_type);
        }
        if per_type.is_empty() {
            self.holds.remove(token);
        }
        taken
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Catalog
// ============================================================================

/// Shared source of truth for unit and GA pool state
#[derive(Debug)]
pub struct ResourceCatalog {
    layout: Arc<ChartLayout>,
    events: Vec<EventKey>,
    units: HashMap<ObjectLabel, Mutex<UnitSlot>>,
    pools: HashMap<ObjectLabel, Mutex<PoolSlot>>,
    applied_bookings: Mutex<HashSet<String>>,
}

impl ResourceCatalog {
    /// Builds an all-free catalog for `layout`, rendered against `events`
    #[must_use]
    pub fn new(layout: Arc<ChartLayout>, events: Vec<EventKey>) -> Self {
        let mut units = HashMap::new();
        let mut pools = HashMap::new();
        for object in layout.objects() {
            if object.is_counted() {
                pools.insert(
                    object.label.clone(),
                    Mutex::new(PoolSlot {
                        capacity: object.capacity(),
                        booked: BTreeMap::new(),
                        holds: BTreeMap::new(),
                    }),
                );
            } else {
                units.insert(object.label.clone(), Mutex::new(UnitSlot::default()));
            }
        }
        Self {
            layout,
            events,
            units,
            pools,
            applied_bookings: Mutex::new(HashSet::new()),
        }
    }

    /// Chart layout the catalog was built from
    #[must_use]
    pub fn layout(&self) -> &Arc<ChartLayout> {
        &self.layout
    }

    /// Events the catalog tracks
    #[must_use]
    pub fn events(&self) -> &[EventKey] {
        &self.events
    }

    fn permitted(&self, label: &ObjectLabel, rules: &SelectabilityRules) -> bool {
        self.layout
            .object(label)
            .is_some_and(|object| rules.permits(&self.layout, object))
    }

    // ---------------------------------------------------------------- units

    /// Atomically claims a free unit for `token`
    pub fn try_claim(
        &self,
        label: &ObjectLabel,
        token: &HoldToken,
        rules: &SelectabilityRules,
    ) -> ClaimOutcome {
        let Some(slot) = self.units.get(label) else {
            return ClaimOutcome::NotSelectable;
        };
        if !self.permitted(label, rules) {
            return ClaimOutcome::NotSelectable;
        }

        let mut slot = lock(slot);
        match slot.status() {
            UnitStatus::Booked => ClaimOutcome::AlreadyBooked,
            UnitStatus::Held(holder) if &holder == token => ClaimOutcome::Granted { renewed: true },
            UnitStatus::Held(holder) => ClaimOutcome::AlreadyHeld { by: holder },
            UnitStatus::Free => {
                slot.holder = Some(token.clone());
                tracing::debug!(object = %label, token = %token, "Unit claimed");
                ClaimOutcome::Granted { renewed: false }
            }
        }
    }

    /// Releases the unit if `token` holds it
    pub fn release(&self, label: &ObjectLabel, token: &HoldToken) -> ReleaseOutcome {
        let Some(slot) = self.units.get(label) else {
            return ReleaseOutcome::Noop;
        };
        let mut slot = lock(slot);
        match &slot.holder {
            None => ReleaseOutcome::Noop,
            Some(holder) if holder == token => {
                slot.holder = None;
                tracing::debug!(object = %label, token = %token, "Unit released");
                ReleaseOutcome::Released
            }
            Some(_) => ReleaseOutcome::NotOwner,
        }
    }

    /// Status of a unit across all events
    #[must_use]
    pub fn status(&self, label: &ObjectLabel) -> Option<UnitStatus> {
        self.units.get(label).map(|slot| lock(slot).status())
    }

    /// Status of a unit for one event
    #[must_use]
    pub fn status_for_event(&self, label: &ObjectLabel, event: &EventKey) -> Option<UnitStatus> {
        self.units.get(label).map(|slot| {
            let slot = lock(slot);
            if slot.booked_for.contains(event) {
                UnitStatus::Booked
            } else {
                slot.holder
                    .as_ref()
                    .map_or(UnitStatus::Free, |h| UnitStatus::Held(h.clone()))
            }
        })
    }

    /// Current holder of a unit
    #[must_use]
    pub fn holder(&self, label: &ObjectLabel) -> Option<HoldToken> {
        self.units.get(label).and_then(|slot| lock(slot).holder.clone())
    }

    /// Whether the unit is held or booked by anyone
    #[must_use]
    pub fn is_occupied(&self, label: &ObjectLabel) -> bool {
        self.status(label)
            .is_some_and(|status| status != UnitStatus::Free)
    }

    // ------------------------------------------------------------- GA pools

    /// Reserves `count` places of `pool` for `token`, all or nothing.
    ///
    /// Returns the number of places granted: `count` or `0`.
    pub fn try_claim_ga(
        &self,
        pool: &ObjectLabel,
        ticket_type: &TicketType,
        count: u32,
        token: &HoldToken,
        rules: &SelectabilityRules,
    ) -> u32 {
        if count == 0 {
            return 0;
        }
        let Some(slot) = self.pools.get(pool) else {
            return 0;
        };
        if !self.permitted(pool, rules) {
            return 0;
        }

        let mut slot = lock(slot);
        if slot.num_free() < count {
            return 0;
        }
        *slot
            .holds
            .entry(token.clone())
            .or_default()
            .entry(ticket_type.clone())
            .or_insert(0) += count;
        tracing::debug!(pool = %pool, token = %token, count, "GA places claimed");
        count
    }

    /// Releases up to `count` places of `ticket_type` held by `token`.
    ///
    /// Returns the number actually released, so duplicate releases never free
    /// capacity twice.
    pub fn release_ga(
        &self,
        pool: &ObjectLabel,
        ticket_type: &TicketType,
        count: u32,
        token: &HoldToken,
    ) -> u32 {
        let Some(slot) = self.pools.get(pool) else {
            return 0;
        };
        let released = lock(slot).take(token, ticket_type, count);
        if released > 0 {
            tracing::debug!(pool = %pool, token = %token, released, "GA places released");
        }
        released
    }

    /// Capacity counters of a GA pool
    #[must_use]
    pub fn ga_availability(&self, pool: &ObjectLabel) -> Option<GaAvailability> {
        self.pools.get(pool).map(|slot| lock(slot).availability())
    }

    /// Free places of a GA pool
    #[must_use]
    pub fn num_free(&self, pool: &ObjectLabel) -> Option<u32> {
        self.pools.get(pool).map(|slot| lock(slot).num_free())
    }

    /// Tokens holding places in a GA pool
    #[must_use]
    pub fn ga_holders(&self, pool: &ObjectLabel) -> Vec<HoldToken> {
        self.pools
            .get(pool)
            .map(|slot| lock(slot).holds.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Places of a GA pool held by `token`, per ticket type
    #[must_use]
    pub fn ga_held_by(&self, pool: &ObjectLabel, token: &HoldToken) -> BTreeMap<TicketType, u32> {
        self.pools
            .get(pool)
            .and_then(|slot| lock(slot).holds.get(token).cloned())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------- bookings

    /// Applies a server-confirmed booking.
    ///
    /// Booking is terminal for the event. Any hold on the booked unit (or, for
    /// GA pools, any hold that no longer fits next to the booked count) is
    /// force-released and reported so the owning session can drop it.
    pub fn confirm_booked(&self, confirmation: &BookingConfirmation) -> BookingOutcome {
        if !self.events.contains(&confirmation.event) {
            tracing::warn!(
                event = %confirmation.event,
                object = %confirmation.object,
                "Booking for an event this chart does not render; ignoring"
            );
            return BookingOutcome::Unknown;
        }
        if !lock(&self.applied_bookings).insert(confirmation.id.clone()) {
            return BookingOutcome::Duplicate;
        }

        if let Some(slot) = self.units.get(&confirmation.object) {
            let mut slot = lock(slot);
            if !slot.booked_for.insert(confirmation.event.clone()) {
                return BookingOutcome::Duplicate;
            }
            let mut promoted = Vec::new();
            let mut displaced = Vec::new();
            if let Some(holder) = slot.holder.take() {
                let hold = DisplacedHold {
                    token: holder.clone(),
                    object: confirmation.object.clone(),
                    ticket_type: None,
                    quantity: 1,
                };
                if confirmation.hold_token.as_ref() == Some(&holder) {
                    promoted.push(hold);
                } else {
                    tracing::warn!(
                        object = %confirmation.object,
                        token = %holder,
                        "Booking arrived for a unit held by another token; forcing release"
                    );
                    displaced.push(hold);
                }
            }
            return BookingOutcome::Booked { promoted, displaced };
        }

        if let Some(slot) = self.pools.get(&confirmation.object) {
            let mut slot = lock(slot);
            let ticket_type = TicketType::or_none(confirmation.ticket_type.as_ref());
            let mut promoted = Vec::new();

            if let Some(token) = &confirmation.hold_token {
                // Matching ticket type first, then the token's other holds
                let mut order = vec![ticket_type.clone()];
                if let Some(per_type) = slot.holds.get(token) {
                    order.extend(per_type.keys().filter(|tt| **tt != ticket_type).cloned());
                }
                let mut remaining = confirmation.quantity;
                for tt in order {
                    if remaining == 0 {
                        break;
                    }
                    let converted = slot.take(token, &tt, remaining);
                    if converted > 0 {
                        remaining -= converted;
                        promoted.push(DisplacedHold {
                            token: token.clone(),
                            object: confirmation.object.clone(),
                            ticket_type: Some(tt),
                            quantity: converted,
                        });
                    }
                }
            }

            let capacity = slot.capacity;
            let booked = slot.booked.entry(confirmation.event.clone()).or_insert(0);
            *booked = booked.saturating_add(confirmation.quantity);
            if *booked > capacity {
                tracing::warn!(
                    pool = %confirmation.object,
                    booked = *booked,
                    capacity,
                    "Bookings exceed GA capacity; clamping"
                );
                *booked = capacity;
            }

            let displaced =
                Self::shed_excess_holds(&mut slot, &confirmation.object, confirmation.hold_token.as_ref());
            return BookingOutcome::Booked { promoted, displaced };
        }

        BookingOutcome::Unknown
    }

    /// Releases holds until `booked + held <= capacity`: the booking token's
    /// own leftovers first, then other tokens in token order
    fn shed_excess_holds(
        slot: &mut PoolSlot,
        pool: &ObjectLabel,
        booking_token: Option<&HoldToken>,
    ) -> Vec<DisplacedHold> {
        let first_hold = |token: &HoldToken, per_type: &BTreeMap<TicketType, u32>| {
            per_type
                .iter()
                .next()
                .map(|(tt, n)| (token.clone(), tt.clone(), *n))
        };
        let mut displaced = Vec::new();
        let mut excess = (slot.booked_count() + slot.held_count()).saturating_sub(slot.capacity);
        while excess > 0 {
            let own = booking_token
                .and_then(|token| slot.holds.get(token).and_then(|per_type| first_hold(token, per_type)));
            let Some((token, ticket_type, held)) =
                own.or_else(|| slot.holds.iter().find_map(|(token, per_type)| first_hold(token, per_type)))
            else {
                break;
            };
            let quantity = slot.take(&token, &ticket_type, held.min(excess));
            tracing::warn!(pool = %pool, token = %token, quantity, "Force-releasing GA hold after booking");
            excess -= quantity;
            displaced.push(DisplacedHold {
                token,
                object: pool.clone(),
                ticket_type: Some(ticket_type),
                quantity,
            });
        }
        displaced
    }

    // -------------------------------------------------------------- queries

    /// Claimable units and free GA places under `rules`.
    ///
    /// Units held by `reusable` count as claimable, so a request that replaces
    /// the caller's own selection may reuse them. GA places held by
    /// `reusable` do not; they are released separately.
    #[must_use]
    pub fn availability(&self, rules: &SelectabilityRules, reusable: Option<&HoldToken>) -> Availability {
        let mut units = HashSet::new();
        let mut ga_free = HashMap::new();
        for object in self.layout.objects() {
            if !rules.permits(&self.layout, object) {
                continue;
            }
            if let Some(slot) = self.units.get(&object.label) {
                let free = match lock(slot).status() {
                    UnitStatus::Free => true,
                    UnitStatus::Held(holder) => Some(&holder) == reusable,
                    UnitStatus::Booked => false,
                };
                if free {
                    units.insert(object.label.clone());
                }
            } else if let Some(slot) = self.pools.get(&object.label) {
                let free = lock(slot).num_free();
                if free > 0 {
                    ga_free.insert(object.label.clone(), free);
                }
            }
        }
        Availability { units, ga_free }
    }

    /// Selectable object count and categories of a section
    #[must_use]
    pub fn section_summary(&self, section: &SectionKey, rules: &SelectabilityRules) -> SectionSummary {
        let mut selectable_objects = 0;
        let mut categories = BTreeSet::new();
        for object in self.layout.objects() {
            if object.section.as_ref() != Some(section) || !rules.permits(&self.layout, object) {
                continue;
            }
            let selectable = if object.is_counted() {
                self.num_free(&object.label).unwrap_or(0) > 0
            } else {
                self.status(&object.label) == Some(UnitStatus::Free)
            };
            if selectable {
                selectable_objects += 1;
                if let Some(category) = &object.category {
                    categories.insert(category.clone());
                }
            }
        }
        let selectable_categories = self
            .layout
            .categories()
            .iter()
            .filter(|c| categories.contains(&c.key))
            .map(|c| c.key.clone())
            .collect();
        SectionSummary {
            section: section.clone(),
            selectable_objects,
            selectable_categories,
        }
    }
}
