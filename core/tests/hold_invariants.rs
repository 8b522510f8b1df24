//! Exclusivity and capacity hold under arbitrary interleavings and real
//! thread races.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use proptest::prelude::*;
use seathold_core::catalog::{ClaimOutcome, UnitStatus};
use seathold_core::config::HoldConfig;
use seathold_core::environment::Clock;
use seathold_core::selectability::SelectabilityRules;
use seathold_core::session::{SessionManager, SessionMode, SessionRequest};
use seathold_core::types::{HoldToken, ObjectLabel, TicketType};
use seathold_testing::fixtures::{FLOOR_CAPACITY, HOLD_TTL, row_catalog};
use seathold_testing::test_clock;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const SEATS: [&str; 4] = ["A-1", "A-2", "B-1", "B-2"];
const BUYERS: usize = 3;

#[derive(Debug, Clone)]
enum Op {
    Claim { buyer: usize, seat: usize },
    Release { buyer: usize, seat: usize },
    ClaimGa { buyer: usize, count: u32 },
    ReleaseGa { buyer: usize, count: u32 },
    Expire { buyer: usize },
    Advance { secs: u64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let buyer = 0..BUYERS;
    let seat = 0..SEATS.len();
    prop_oneof![
        4 => (buyer.clone(), seat.clone()).prop_map(|(buyer, seat)| Op::Claim { buyer, seat }),
        2 => (buyer.clone(), seat).prop_map(|(buyer, seat)| Op::Release { buyer, seat }),
        3 => (buyer.clone(), 1..6_u32).prop_map(|(buyer, count)| Op::ClaimGa { buyer, count }),
        2 => (buyer.clone(), 1..6_u32).prop_map(|(buyer, count)| Op::ReleaseGa { buyer, count }),
        1 => buyer.prop_map(|buyer| Op::Expire { buyer }),
        1 => (1..40_u64).prop_map(|secs| Op::Advance { secs }),
    ]
}

fn start(sessions: &SessionManager) -> HoldToken {
    sessions
        .start_session(SessionMode::Start, SessionRequest::default())
        .unwrap()
        .unwrap()
}

proptest! {
    #[test]
    fn holds_stay_exclusive_and_within_capacity(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let clock = Arc::new(test_clock());
        let sessions = SessionManager::new(
            row_catalog(),
            HoldConfig::default().with_hold_ttl(HOLD_TTL),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let rules = SelectabilityRules::default();
        let floor = ObjectLabel::from("Floor");
        let none = TicketType::none();
        let mut buyers: Vec<HoldToken> = (0..BUYERS).map(|_| start(&sessions)).collect();

        for op in ops {
            match op {
                Op::Claim { buyer, seat } => {
                    if sessions.claim(&buyers[buyer], &SEATS[seat].into(), &rules).is_err() {
                        // The buyer reloads with a fresh session
                        buyers[buyer] = start(&sessions);
                    }
                }
                Op::Release { buyer, seat } => {
                    sessions.release(&buyers[buyer], &SEATS[seat].into());
                }
                Op::ClaimGa { buyer, count } => {
                    if sessions.claim_ga(&buyers[buyer], &floor, &none, count, &rules).is_err() {
                        buyers[buyer] = start(&sessions);
                    }
                }
                Op::ReleaseGa { buyer, count } => {
                    sessions.release_ga(&buyers[buyer], &floor, &none, count);
                }
                Op::Expire { buyer } => {
                    sessions.expire(&buyers[buyer]);
                }
                Op::Advance { secs } => {
                    clock.advance(Duration::from_secs(secs));
                    sessions.sweep();
                }
            }

            let catalog = sessions.catalog();
            let ga = catalog.ga_availability(&floor).unwrap();
            prop_assert!(ga.held + ga.booked <= FLOOR_CAPACITY);
            prop_assert_eq!(ga.free, FLOOR_CAPACITY - ga.held - ga.booked);

            let mut ga_claimed = 0;
            for token in &buyers {
                let Some(claims) = sessions.claims(token) else { continue };
                ga_claimed += claims.ga.values().sum::<u32>();
                for label in &claims.units {
                    prop_assert_eq!(catalog.status(label), Some(UnitStatus::Held(token.clone())));
                }
            }
            prop_assert_eq!(ga_claimed, ga.held);

            for seat in SEATS {
                if let Some(UnitStatus::Held(holder)) = catalog.status(&seat.into()) {
                    prop_assert!(sessions.is_live(&holder));
                    let claims = sessions.claims(&holder).unwrap();
                    prop_assert!(claims.units.contains(&ObjectLabel::from(seat)));
                }
            }
        }
    }
}

#[test]
fn concurrent_claims_have_exactly_one_winner() {
    let sessions = Arc::new(SessionManager::new(
        row_catalog(),
        HoldConfig::default(),
        Arc::new(test_clock()) as Arc<dyn Clock>,
    ));
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));

    let handles: Vec<_> = (0..contenders)
        .map(|_| {
            let sessions = Arc::clone(&sessions);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let token = start(&sessions);
                barrier.wait();
                let outcome = sessions
                    .claim(&token, &"A-3".into(), &SelectabilityRules::default())
                    .unwrap();
                (token, outcome)
            })
        })
        .collect();

    let results: Vec<(HoldToken, ClaimOutcome)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<&HoldToken> = results
        .iter()
        .filter(|(_, outcome)| matches!(outcome, ClaimOutcome::Granted { .. }))
        .map(|(token, _)| token)
        .collect();
    assert_eq!(winners.len(), 1);
    for (_, outcome) in &results {
        if let ClaimOutcome::AlreadyHeld { by } = outcome {
            assert_eq!(by, winners[0]);
        }
    }
    assert_eq!(
        sessions.catalog().status(&"A-3".into()),
        Some(UnitStatus::Held(winners[0].clone()))
    );
}

#[test]
fn concurrent_ga_claims_never_oversell() {
    let sessions = Arc::new(SessionManager::new(
        row_catalog(),
        HoldConfig::default(),
        Arc::new(test_clock()) as Arc<dyn Clock>,
    ));
    let contenders = 6;
    let barrier = Arc::new(Barrier::new(contenders));

    // 6 buyers x 3 places against a capacity of 10
    let granted: u32 = (0..contenders)
        .map(|_| {
            let sessions = Arc::clone(&sessions);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let token = start(&sessions);
                barrier.wait();
                sessions
                    .claim_ga(&token, &"Floor".into(), &TicketType::none(), 3, &SelectabilityRules::default())
                    .unwrap()
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .sum();

    assert_eq!(granted, 9);
    let ga = sessions.catalog().ga_availability(&"Floor".into()).unwrap();
    assert_eq!(ga.held, 9);
    assert_eq!(ga.free, 1);
}
