//! Best-available assignment.
//!
//! [`solve`] is a pure function over an [`Availability`] snapshot:
//!
//! 1. With adjacency preferred, every row (and every standalone unit) is cut
//!    into maximal runs of free, allowed units. The run with the least
//!    left-over seats that still fits the request wins; ties go to category
//!    priority, then declaration order. Seats are taken from the run start.
//! 2. Otherwise, or when no run fits, units and GA places are picked greedily
//!    by category priority, proximity to the focus point and declaration
//!    order.
//!
//! [`BestAvailableSolver::allocate`] turns a solution into claims. A lost race
//! excludes the contested unit and solves again; on failure every claim made
//! during the call is released, so the catalog is left as it was.

use crate::catalog::{Availability, ClaimOutcome};
use crate::chart::{centroid, Bookable, BookableObject, ChartLayout, Placement};
use crate::error::HoldError;
use crate::selectability::SelectabilityRules;
use crate::session::SessionManager;
use crate::types::{CategoryKey, HoldToken, ObjectLabel, TicketType};
use serde::{Deserialize, Serialize};

/// Quantity requested for one ticket type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypeQuantity {
    /// Ticket type
    pub ticket_type: TicketType,
    /// Places
    pub quantity: u32,
}

const fn yes() -> bool {
    true
}

/// A best-available request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BestAvailableRequest {
    /// Number of places; ignored when `ticket_types` is non-empty
    #[serde(default)]
    pub number: Option<u32>,
    /// Allowed categories, in priority order; empty allows all
    #[serde(default)]
    pub categories: Vec<CategoryKey>,
    /// Places per ticket type, assigned to picks in this order
    #[serde(default)]
    pub ticket_types: Vec<TicketTypeQuantity>,
    /// Replace the current selection instead of adding to it
    #[serde(default = "yes")]
    pub clear_selection: bool,
    /// Try contiguous runs before scattering
    #[serde(default = "yes")]
    pub adjacent_preferred: bool,
}

impl BestAvailableRequest {
    /// Request for `number` places in any category
    #[must_use]
    pub const fn number(number: u32) -> Self {
        Self {
            number: Some(number),
            categories: Vec::new(),
            ticket_types: Vec::new(),
            clear_selection: true,
            adjacent_preferred: true,
        }
    }

    /// Restricts the request to categories, in priority order
    #[must_use]
    pub fn in_categories(mut self, categories: impl IntoIterator<Item = CategoryKey>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    /// Total places requested
    #[must_use]
    pub fn quantity(&self) -> u32 {
        if self.ticket_types.is_empty() {
            self.number.unwrap_or(0)
        } else {
            self.ticket_types.iter().map(|t| t.quantity).sum()
        }
    }

    fn allows(&self, object: &BookableObject) -> bool {
        self.categories.is_empty()
            || object
                .category()
                .is_some_and(|c| self.categories.contains(c))
    }

    fn rank(&self, layout: &ChartLayout, object: &BookableObject) -> usize {
        let Some(category) = object.category() else {
            return usize::MAX;
        };
        if self.categories.is_empty() {
            layout
                .categories()
                .iter()
                .position(|c| &c.key == category)
                .unwrap_or(usize::MAX)
        } else {
            self.categories
                .iter()
                .position(|c| c == category)
                .unwrap_or(usize::MAX)
        }
    }
}

/// One picked unit, or places of a GA area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pick {
    /// Object
    pub object: ObjectLabel,
    /// Ticket type assigned from the request
    pub ticket_type: Option<TicketType>,
    /// Places (1 for units)
    pub quantity: u32,
    /// Whether the object is a GA area
    pub counted: bool,
}

/// Result of a successful solve
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    /// Picks in pick order
    pub picks: Vec<Pick>,
    /// Whether every pick is a unit and all are adjacent in one row
    pub next_to_each_other: bool,
}

impl Solution {
    /// Labels of the picked objects, in pick order
    #[must_use]
    pub fn objects(&self) -> Vec<ObjectLabel> {
        let mut out: Vec<ObjectLabel> = Vec::with_capacity(self.picks.len());
        for pick in &self.picks {
            if !out.contains(&pick.object) {
                out.push(pick.object.clone());
            }
        }
        out
    }
}

/// Finds `request.quantity()` places in `availability`.
///
/// `focus` is the point greedy picks gravitate to; the chart center is used
/// when it is absent.
///
/// # Errors
///
/// Returns [`HoldError::InsufficientAvailability`] when the allowed, free
/// capacity is smaller than the request.
pub fn solve(
    layout: &ChartLayout,
    availability: &Availability,
    request: &BestAvailableRequest,
    focus: Option<Placement>,
) -> Result<Solution, HoldError> {
    let quantity = request.quantity();
    if quantity == 0 {
        return Ok(Solution::default());
    }

    if request.adjacent_preferred {
        if let Some(run) = tightest_run(layout, availability, request, quantity) {
            let picks = run
                .into_iter()
                .map(|label| Pick {
                    object: label,
                    ticket_type: None,
                    quantity: 1,
                    counted: false,
                })
                .collect();
            return Ok(Solution {
                picks: assign_ticket_types(picks, &request.ticket_types),
                next_to_each_other: true,
            });
        }
    }

    let picks = greedy(layout, availability, request, quantity, focus.or_else(|| layout.center()))?;
    let next_to_each_other = adjacent_in_one_row(layout, &picks);
    Ok(Solution {
        picks: assign_ticket_types(picks, &request.ticket_types),
        next_to_each_other,
    })
}

fn is_candidate(availability: &Availability, request: &BestAvailableRequest, object: &BookableObject) -> bool {
    !object.is_counted() && request.allows(object) && availability.is_free(&object.label)
}

/// Best contiguous run: least leftover, then category rank, then declaration order
fn tightest_run(
    layout: &ChartLayout,
    availability: &Availability,
    request: &BestAvailableRequest,
    quantity: u32,
) -> Option<Vec<ObjectLabel>> {
    let needed = usize::try_from(quantity).ok()?;
    let mut best: Option<((usize, usize, usize), Vec<ObjectLabel>)> = None;
    let mut consider = |run: &[&BookableObject]| {
        if run.len() < needed {
            return;
        }
        let first = run[0];
        let key = (
            run.len() - needed,
            request.rank(layout, first),
            layout.declaration_index(&first.label).unwrap_or(usize::MAX),
        );
        if best.as_ref().is_none_or(|(current, _)| key < *current) {
            best = Some((key, run[..needed].iter().map(|o| o.label.clone()).collect()));
        }
    };

    for row in layout.rows() {
        let mut run: Vec<&BookableObject> = Vec::new();
        for label in &row.seats {
            match layout.object(label) {
                Some(object) if is_candidate(availability, request, object) => run.push(object),
                _ => {
                    consider(&run);
                    run.clear();
                }
            }
        }
        consider(&run);
    }

    // Tables and booths are runs of one
    for object in layout.objects() {
        if object.row().is_none() && is_candidate(availability, request, object) {
            consider(&[object]);
        }
    }

    best.map(|(_, labels)| labels)
}

fn greedy(
    layout: &ChartLayout,
    availability: &Availability,
    request: &BestAvailableRequest,
    quantity: u32,
    focus: Option<Placement>,
) -> Result<Vec<Pick>, HoldError> {
    let distance = |object: &BookableObject| match (focus, object.placement) {
        (Some(focus), Some(at)) => focus.distance(&at),
        _ => f64::MAX,
    };

    let mut candidates: Vec<(usize, f64, usize, &BookableObject)> = layout
        .objects()
        .iter()
        .enumerate()
        .filter(|(_, object)| request.allows(object))
        .filter(|(_, object)| {
            if object.is_counted() {
                availability.ga_free(&object.label) > 0
            } else {
                availability.is_free(&object.label)
            }
        })
        .map(|(index, object)| (request.rank(layout, object), distance(object), index, object))
        .collect();
    candidates.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.total_cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });

    let available = candidates.iter().fold(0_u32, |acc, (_, _, _, object)| {
        let places = if object.is_counted() {
            availability.ga_free(&object.label)
        } else {
            1
        };
        acc.saturating_add(places)
    });
    if available < quantity {
        return Err(HoldError::InsufficientAvailability {
            requested: quantity,
            available,
        });
    }

    let mut remaining = quantity;
    let mut picks = Vec::new();
    for (_, _, _, object) in candidates {
        if remaining == 0 {
            break;
        }
        let take = if object.is_counted() {
            availability.ga_free(&object.label).min(remaining)
        } else {
            1
        };
        picks.push(Pick {
            object: object.label.clone(),
            ticket_type: None,
            quantity: take,
            counted: object.is_counted(),
        });
        remaining -= take;
    }
    Ok(picks)
}

fn adjacent_in_one_row(layout: &ChartLayout, picks: &[Pick]) -> bool {
    let mut positions = Vec::with_capacity(picks.len());
    let mut row_key = None;
    for pick in picks {
        if pick.counted {
            return false;
        }
        let Some((row, position)) = layout.row_position(&pick.object) else {
            return picks.len() == 1;
        };
        match row_key {
            None => row_key = Some(&row.key),
            Some(key) if key != &row.key => return false,
            Some(_) => {}
        }
        positions.push(position);
    }
    positions.sort_unstable();
    positions.windows(2).all(|w| w[1] == w[0] + 1)
}

/// Spreads the requested ticket types over the picks, splitting GA picks
fn assign_ticket_types(picks: Vec<Pick>, ticket_types: &[TicketTypeQuantity]) -> Vec<Pick> {
    if ticket_types.is_empty() {
        return picks;
    }
    let mut pending = ticket_types
        .iter()
        .filter(|t| t.quantity > 0)
        .map(|t| (t.ticket_type.clone(), t.quantity))
        .collect::<std::collections::VecDeque<_>>();

    let mut out = Vec::with_capacity(picks.len());
    for pick in picks {
        let mut left = pick.quantity;
        while left > 0 {
            let Some((ticket_type, count)) = pending.front_mut() else {
                out.push(Pick { quantity: left, ..pick.clone() });
                break;
            };
            let take = (*count).min(left);
            out.push(Pick {
                ticket_type: Some(ticket_type.clone()),
                quantity: take,
                ..pick.clone()
            });
            *count -= take;
            left -= take;
            if *count == 0 {
                pending.pop_front();
            }
        }
    }
    out
}

// ============================================================================
// Allocation
// ============================================================================

/// Claims a best-available solution on behalf of a token
#[derive(Debug, Clone, Copy)]
pub struct BestAvailableSolver<'a> {
    sessions: &'a SessionManager,
    rules: &'a SelectabilityRules,
    max_attempts: u32,
}

#[derive(Default)]
struct Provisional {
    units: Vec<ObjectLabel>,
    ga: Vec<(ObjectLabel, TicketType, u32)>,
}

impl<'a> BestAvailableSolver<'a> {
    /// Creates a solver over the session manager's catalog
    #[must_use]
    pub fn new(sessions: &'a SessionManager, rules: &'a SelectabilityRules) -> Self {
        Self {
            sessions,
            rules,
            max_attempts: sessions.config().solver_max_attempts.max(1),
        }
    }

    /// Focus point for greedy picks: the centroid of `selected`, if placed
    #[must_use]
    pub fn focus_of(&self, selected: &[ObjectLabel]) -> Option<Placement> {
        let layout = self.sessions.catalog().layout();
        centroid(
            selected
                .iter()
                .filter_map(|label| layout.object(label))
                .filter_map(|object| object.placement),
        )
    }

    /// Solves and claims the request.
    ///
    /// Without a token the solution is only computed. Units the token
    /// already holds may be reused when the request clears the selection.
    ///
    /// # Errors
    ///
    /// - [`HoldError::InsufficientAvailability`] when no solution could be
    ///   claimed; nothing stays claimed
    /// - [`HoldError::TokenExpired`] when the token lapses mid-way
    pub fn allocate(
        &self,
        token: Option<&HoldToken>,
        request: &BestAvailableRequest,
        focus: Option<Placement>,
    ) -> Result<Solution, HoldError> {
        let catalog = self.sessions.catalog();
        let layout = catalog.layout();
        let reusable = if request.clear_selection { token } else { None };
        let mut availability = catalog.availability(self.rules, reusable);

        for attempt in 1..=self.max_attempts {
            let solution = solve(layout, &availability, request, focus)?;
            let Some(token) = token else {
                return Ok(solution);
            };

            let mut provisional = Provisional::default();
            match self.claim_all(token, &solution, &mut provisional) {
                Ok(None) => return Ok(solution),
                Ok(Some(lost)) => {
                    tracing::debug!(object = %lost, attempt, "Best available lost a race; retrying");
                    self.release(token, &provisional);
                    availability.exclude(&lost);
                }
                Err(error) => {
                    self.release(token, &provisional);
                    return Err(error);
                }
            }
        }

        Err(HoldError::InsufficientAvailability {
            requested: request.quantity(),
            available: availability.total(),
        })
    }

    /// Claims every pick; returns the first object lost to another token
    fn claim_all(
        &self,
        token: &HoldToken,
        solution: &Solution,
        provisional: &mut Provisional,
    ) -> Result<Option<ObjectLabel>, HoldError> {
        for pick in &solution.picks {
            if pick.counted {
                let tt = TicketType::or_none(pick.ticket_type.as_ref());
                let granted = self
                    .sessions
                    .claim_ga(token, &pick.object, &tt, pick.quantity, self.rules)?;
                if granted == 0 {
                    return Ok(Some(pick.object.clone()));
                }
                provisional.ga.push((pick.object.clone(), tt, granted));
            } else {
                match self.sessions.claim(token, &pick.object, self.rules)? {
                    ClaimOutcome::Granted { renewed: false } => provisional.units.push(pick.object.clone()),
                    ClaimOutcome::Granted { renewed: true } => {}
                    ClaimOutcome::AlreadyHeld { .. } | ClaimOutcome::AlreadyBooked | ClaimOutcome::NotSelectable => {
                        return Ok(Some(pick.object.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    fn release(&self, token: &HoldToken, provisional: &Provisional) {
        for label in &provisional.units {
            self.sessions.release(token, label);
        }
        for (pool, tt, count) in &provisional.ga {
            self.sessions.release_ga(token, pool, tt, *count);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chart::{Category, ChartBuilder};
    use std::collections::{HashMap, HashSet};

    fn layout() -> ChartLayout {
        ChartBuilder::new()
            .category(Category::new("A", "A"))
            .category(Category::new("B", "B"))
            .row("A", "A", &["A1", "A2", "A3", "A4", "A5", "A6"])
            .row("B", "B", &["B1", "B2", "B3"])
            .general_admission("Floor", "B", 10)
            .build()
            .unwrap()
    }

    fn availability(free: &[&str], ga: &[(&str, u32)]) -> Availability {
        Availability::new(
            free.iter().map(|l| ObjectLabel::from(*l)).collect::<HashSet<_>>(),
            ga.iter().map(|(l, n)| (ObjectLabel::from(*l), *n)).collect::<HashMap<_, _>>(),
        )
    }

    fn labels(solution: &Solution) -> Vec<&str> {
        solution.picks.iter().map(|p| p.object.as_str()).collect()
    }

    #[test]
    fn prefers_the_tightest_contiguous_run() {
        // Row A: run of 2 (A1-A2) and run of 3 (A4-A6); row B: run of 3
        let free = availability(&["A1", "A2", "A4", "A5", "A6", "B1", "B2", "B3"], &[]);
        let solution = solve(&layout(), &free, &BestAvailableRequest::number(3), None).unwrap();
        assert_eq!(labels(&solution), vec!["A4", "A5", "A6"]);
        assert!(solution.next_to_each_other);

        let solution = solve(&layout(), &free, &BestAvailableRequest::number(2), None).unwrap();
        assert_eq!(labels(&solution), vec!["A1", "A2"]);
    }

    #[test]
    fn scatters_when_no_run_fits() {
        let free = availability(&["A1", "A3", "A5"], &[]);
        let solution = solve(&layout(), &free, &BestAvailableRequest::number(3), None).unwrap();
        assert_eq!(labels(&solution), vec!["A1", "A3", "A5"]);
        assert!(!solution.next_to_each_other);
    }

    #[test]
    fn insufficient_capacity_fails() {
        let free = availability(&["A1", "A2", "B1"], &[]);
        let err = solve(&layout(), &free, &BestAvailableRequest::number(5), None).unwrap_err();
        assert_eq!(
            err,
            HoldError::InsufficientAvailability {
                requested: 5,
                available: 3
            }
        );
    }

    #[test]
    fn zero_quantity_is_a_no_op() {
        let solution = solve(&layout(), &availability(&[], &[]), &BestAvailableRequest::number(0), None).unwrap();
        assert!(solution.picks.is_empty());
    }

    #[test]
    fn category_filter_and_ga_fallback() {
        let free = availability(&["A1", "A2", "B1"], &[("Floor", 3)]);
        let request = BestAvailableRequest::number(4).in_categories(["B".into()]);
        let solution = solve(&layout(), &free, &request, None).unwrap();
        assert_eq!(labels(&solution), vec!["B1", "Floor"]);
        assert_eq!(solution.picks[1].quantity, 3);
        assert!(!solution.next_to_each_other);
    }

    #[test]
    fn ticket_types_are_assigned_in_request_order() {
        let free = availability(&["A1", "A2", "A3"], &[]);
        let request = BestAvailableRequest {
            number: None,
            ticket_types: vec![
                TicketTypeQuantity {
                    ticket_type: "adult".into(),
                    quantity: 2,
                },
                TicketTypeQuantity {
                    ticket_type: "child".into(),
                    quantity: 1,
                },
            ],
            ..BestAvailableRequest::number(0)
        };
        let solution = solve(&layout(), &free, &request, None).unwrap();
        let types: Vec<_> = solution
            .picks
            .iter()
            .map(|p| p.ticket_type.as_ref().unwrap().as_str())
            .collect();
        assert_eq!(types, vec!["adult", "adult", "child"]);
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let free = availability(&["A1", "A2", "B1", "B2"], &[]);
        // Both rows offer an exact run of 2 but A is declared (and ranked) first
        let solution = solve(&layout(), &free, &BestAvailableRequest::number(2), None).unwrap();
        assert_eq!(labels(&solution), vec!["A1", "A2"]);
    }
}
