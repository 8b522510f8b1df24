//! Selection, best available and bookings working together on one catalog.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use seathold_core::catalog::{BookingConfirmation, BookingOutcome, UnitStatus};
use seathold_core::config::HoldConfig;
use seathold_core::environment::Clock;
use seathold_core::error::HoldError;
use seathold_core::notification::{EventSink, HoldItem, Notification};
use seathold_core::selectability::SelectabilityRules;
use seathold_core::selection::{SelectionContext, SelectionLimits, SelectionState};
use seathold_core::session::{SessionManager, SessionMode, SessionRequest};
use seathold_core::solver::{BestAvailableRequest, BestAvailableSolver};
use seathold_core::types::{EventKey, HoldToken, ObjectLabel, SelectTarget};
use seathold_core::validation::{SelectionValidator, ValidatorEngine, Violation};
use seathold_testing::fixtures::{EVENT, HOLD_TTL, row_catalog};
use seathold_testing::{RecordingSink, test_clock};
use std::sync::Arc;

struct Buyer {
    token: HoldToken,
    sink: Arc<RecordingSink>,
    selection: SelectionState,
}

struct World {
    sessions: SessionManager,
    rules: SelectabilityRules,
    limits: SelectionLimits,
    validators: ValidatorEngine,
}

impl World {
    fn new(validators: &[SelectionValidator]) -> Self {
        Self {
            sessions: SessionManager::new(
                row_catalog(),
                HoldConfig::default().with_hold_ttl(HOLD_TTL),
                Arc::new(test_clock()) as Arc<dyn Clock>,
            ),
            rules: SelectabilityRules::default(),
            limits: SelectionLimits::default(),
            validators: ValidatorEngine::from_config(validators),
        }
    }

    fn buyer(&self) -> Buyer {
        let sink = Arc::new(RecordingSink::new());
        let token = self
            .sessions
            .start_session(
                SessionMode::Start,
                SessionRequest {
                    sink: Some(Arc::clone(&sink) as Arc<dyn EventSink>),
                    ..SessionRequest::default()
                },
            )
            .unwrap()
            .unwrap();
        Buyer {
            token,
            sink,
            selection: SelectionState::new(),
        }
    }

    fn ctx<'a>(&'a self, buyer: &'a Buyer) -> SelectionContext<'a> {
        SelectionContext {
            sessions: &self.sessions,
            token: Some(&buyer.token),
            rules: &self.rules,
            limits: &self.limits,
            validators: &self.validators,
            sink: Some(&*buyer.sink),
            hold_on_select_for_ga: true,
        }
    }

    fn select(&self, buyer: &mut Buyer, labels: &[&str]) {
        let mut selection = std::mem::take(&mut buyer.selection);
        let ctx = self.ctx(buyer);
        for label in labels {
            selection.add(&ctx, &SelectTarget::object(*label)).unwrap();
        }
        buyer.selection = selection;
    }

    fn status(&self, label: &str) -> Option<UnitStatus> {
        self.sessions.catalog().status(&ObjectLabel::from(label))
    }
}

fn labels(objects: &[ObjectLabel]) -> Vec<&str> {
    objects.iter().map(ObjectLabel::as_str).collect()
}

#[test]
fn best_available_prefers_a_contiguous_run_in_another_row() {
    let world = World::new(&[]);
    let mut rival = world.buyer();
    world.select(&mut rival, &["A-2", "A-4"]);

    let buyer = world.buyer();
    let solver = BestAvailableSolver::new(&world.sessions, &world.rules);
    let solution = solver
        .allocate(Some(&buyer.token), &BestAvailableRequest::number(3), None)
        .unwrap();

    assert_eq!(labels(&solution.objects()), ["B-1", "B-2", "B-3"]);
    assert!(solution.next_to_each_other);
    for seat in ["B-1", "B-2", "B-3"] {
        assert_eq!(world.status(seat), Some(UnitStatus::Held(buyer.token.clone())));
    }
}

#[test]
fn best_available_scatters_when_the_category_has_no_run() {
    let world = World::new(&[]);
    let mut rival = world.buyer();
    world.select(&mut rival, &["A-2", "A-4"]);

    let buyer = world.buyer();
    let solver = BestAvailableSolver::new(&world.sessions, &world.rules);
    let request = BestAvailableRequest::number(3).in_categories(["1".into()]);
    let solution = solver.allocate(Some(&buyer.token), &request, None).unwrap();

    let mut picked = labels(&solution.objects())
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    picked.sort();
    assert_eq!(picked, ["A-1", "A-3", "A-5"]);
    assert!(!solution.next_to_each_other);
}

#[test]
fn failed_best_available_leaves_the_catalog_untouched() {
    let world = World::new(&[]);
    let mut rival = world.buyer();
    world.select(&mut rival, &["A-2", "A-4"]);

    let buyer = world.buyer();
    let solver = BestAvailableSolver::new(&world.sessions, &world.rules);
    let request = BestAvailableRequest::number(5).in_categories(["1".into()]);

    assert_eq!(
        solver.allocate(Some(&buyer.token), &request, None),
        Err(HoldError::InsufficientAvailability {
            requested: 5,
            available: 3
        })
    );
    for seat in ["A-1", "A-3", "A-5"] {
        assert_eq!(world.status(seat), Some(UnitStatus::Free));
    }
    assert!(world.sessions.claims(&buyer.token).unwrap().is_empty());
}

#[test]
fn adopting_a_solution_announces_each_pick() {
    let world = World::new(&[SelectionValidator::ConsecutiveSeats]);
    let mut buyer = world.buyer();
    world.select(&mut buyer, &["B-5"]);
    let _ = buyer.sink.take();

    let solution = BestAvailableSolver::new(&world.sessions, &world.rules)
        .allocate(Some(&buyer.token), &BestAvailableRequest::number(2), None)
        .unwrap();
    let mut selection = std::mem::take(&mut buyer.selection);
    let ctx = world.ctx(&buyer);
    let report = selection.adopt(&ctx, &solution, true);

    assert_eq!(report.removed.len(), 1);
    assert_eq!(report.added.len(), 2);
    assert_eq!(
        buyer.sink.take(),
        vec![
            Notification::ObjectDeselected { item: HoldItem::unit("B-5") },
            Notification::SelectionValid,
            Notification::ObjectSelected { item: HoldItem::unit("A-1") },
            Notification::SelectionValid,
            Notification::ObjectSelected { item: HoldItem::unit("A-2") },
            Notification::SelectionValid,
        ]
    );
    assert_eq!(world.status("B-5"), Some(UnitStatus::Free));
}

#[test]
fn gaps_are_reported_until_filled() {
    let world = World::new(&[SelectionValidator::ConsecutiveSeats]);
    let mut buyer = world.buyer();
    world.select(&mut buyer, &["A-1", "A-3"]);
    assert_eq!(
        buyer.sink.snapshot().last(),
        Some(&Notification::SelectionInvalid {
            violations: vec![Violation::ConsecutiveSeats]
        })
    );

    world.select(&mut buyer, &["A-2"]);
    assert_eq!(buyer.sink.snapshot().last(), Some(&Notification::SelectionValid));
}

#[test]
fn booking_for_another_token_revokes_the_hold() {
    let world = World::new(&[]);
    let mut buyer = world.buyer();
    world.select(&mut buyer, &["A-1", "A-2"]);

    let outcome = world.sessions.catalog().confirm_booked(&BookingConfirmation {
        id: "order-7".to_string(),
        event: EventKey::new(EVENT),
        object: "A-1".into(),
        hold_token: None,
        ticket_type: None,
        quantity: 1,
    });
    assert!(matches!(&outcome, BookingOutcome::Booked { displaced, .. } if displaced.len() == 1));
    let revoked = world.sessions.revoke_booked(&outcome);
    assert_eq!(revoked.len(), 1);

    assert_eq!(
        buyer
            .sink
            .count(|n| matches!(n, Notification::HeldObjectBooked { item, .. } if item.object.as_str() == "A-1")),
        1
    );
    let claims = world.sessions.claims(&buyer.token).unwrap();
    let dropped = buyer.selection.reconcile(&claims);
    assert_eq!(dropped.len(), 1);
    assert_eq!(buyer.selection.selected_units().len(), 1);
    assert_eq!(world.status("A-1"), Some(UnitStatus::Booked));

    // Same id again is ignored
    let again = world.sessions.catalog().confirm_booked(&BookingConfirmation {
        id: "order-7".to_string(),
        event: EventKey::new(EVENT),
        object: "A-1".into(),
        hold_token: None,
        ticket_type: None,
        quantity: 1,
    });
    assert_eq!(again, BookingOutcome::Duplicate);
}

#[test]
fn sessionless_selection_checks_availability_only() {
    let world = World::new(&[]);
    let mut rival = world.buyer();
    world.select(&mut rival, &["A-1"]);

    let sink = RecordingSink::new();
    let ctx = SelectionContext {
        sessions: &world.sessions,
        token: None,
        rules: &world.rules,
        limits: &world.limits,
        validators: &world.validators,
        sink: Some(&sink),
        hold_on_select_for_ga: true,
    };
    let mut selection = SelectionState::new();

    assert_eq!(
        selection.add(&ctx, &SelectTarget::object("A-1")),
        Err(HoldError::AlreadyHeldOrBooked("A-1".into()))
    );
    let entry = selection.add(&ctx, &SelectTarget::object("A-2")).unwrap().unwrap();
    assert!(!entry.held);
    assert_eq!(world.status("A-2"), Some(UnitStatus::Free));
}
