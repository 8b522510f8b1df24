//! Session lifecycle against a manual clock: expiry, sweeping, resuming.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use seathold_core::catalog::UnitStatus;
use seathold_core::config::{ExpiryMode, HoldConfig};
use seathold_core::environment::{Clock, InMemoryTokenStore, TokenStore};
use seathold_core::error::HoldError;
use seathold_core::notification::{EventSink, Notification};
use seathold_core::selectability::SelectabilityRules;
use seathold_core::session::{SessionManager, SessionMode, SessionRequest, TokenState};
use seathold_core::types::{HoldToken, ObjectLabel, TicketType};
use seathold_testing::fixtures::{FLOOR_CAPACITY, HOLD_TTL, row_catalog};
use seathold_testing::{ManualClock, RecordingSink, test_clock};
use std::sync::Arc;
use std::time::Duration;

fn manager(mode: ExpiryMode) -> (SessionManager, Arc<ManualClock>) {
    let clock = Arc::new(test_clock());
    let config = HoldConfig::default()
        .with_hold_ttl(HOLD_TTL)
        .with_expiry_mode(mode);
    let sessions = SessionManager::new(row_catalog(), config, Arc::clone(&clock) as Arc<dyn Clock>);
    (sessions, clock)
}

fn start(sessions: &SessionManager, sink: &Arc<RecordingSink>) -> HoldToken {
    sessions
        .start_session(
            SessionMode::Start,
            SessionRequest {
                sink: Some(Arc::clone(sink) as Arc<dyn EventSink>),
                ..SessionRequest::default()
            },
        )
        .unwrap()
        .unwrap()
}

fn label(s: &str) -> ObjectLabel {
    ObjectLabel::from(s)
}

fn expiries(sink: &RecordingSink) -> usize {
    sink.count(|n| matches!(n, Notification::HoldTokenExpired { .. }))
}

#[test]
fn expiry_emits_one_notification_whatever_the_claim_count() {
    let (sessions, clock) = manager(ExpiryMode::Sliding);
    let rules = SelectabilityRules::default();

    let empty_sink = Arc::new(RecordingSink::new());
    let one_sink = Arc::new(RecordingSink::new());
    let many_sink = Arc::new(RecordingSink::new());
    let empty = start(&sessions, &empty_sink);
    let one = start(&sessions, &one_sink);
    let many = start(&sessions, &many_sink);

    sessions.claim(&one, &label("A-1"), &rules).unwrap();
    for seat in ["B-1", "B-2", "B-3"] {
        sessions.claim(&many, &label(seat), &rules).unwrap();
    }
    sessions
        .claim_ga(&many, &label("Floor"), &TicketType::none(), 4, &rules)
        .unwrap();

    clock.advance(HOLD_TTL + Duration::from_secs(1));
    let mut expired = sessions.sweep();
    expired.sort();
    let mut expected = vec![empty, one, many];
    expected.sort();
    assert_eq!(expired, expected);

    assert_eq!(expiries(&empty_sink), 1);
    assert_eq!(expiries(&one_sink), 1);
    assert_eq!(expiries(&many_sink), 1);

    let catalog = sessions.catalog();
    for seat in ["A-1", "B-1", "B-2", "B-3"] {
        assert_eq!(catalog.status(&label(seat)), Some(UnitStatus::Free));
    }
    assert_eq!(catalog.num_free(&label("Floor")), Some(FLOOR_CAPACITY));

    // A second sweep finds nothing
    assert!(sessions.sweep().is_empty());
    assert_eq!(expiries(&many_sink), 1);
}

#[test]
fn lazy_expiry_and_sweep_do_not_double_report() {
    let (sessions, clock) = manager(ExpiryMode::Sliding);
    let sink = Arc::new(RecordingSink::new());
    let token = start(&sessions, &sink);
    sessions
        .claim(&token, &label("A-1"), &SelectabilityRules::default())
        .unwrap();

    clock.advance(HOLD_TTL);
    assert_eq!(
        sessions.touch(&token),
        Err(HoldError::TokenExpired(token.clone()))
    );
    assert!(sessions.sweep().is_empty());
    assert!(!sessions.expire(&token));
    assert_eq!(expiries(&sink), 1);
    assert_eq!(sessions.state(&token), Some(TokenState::Expired));
}

#[test]
fn sliding_deadline_follows_activity() {
    let (sessions, clock) = manager(ExpiryMode::Sliding);
    let sink = Arc::new(RecordingSink::new());
    let token = start(&sessions, &sink);
    let rules = SelectabilityRules::default();

    clock.advance(Duration::from_secs(40));
    sessions.claim(&token, &label("A-1"), &rules).unwrap();
    clock.advance(Duration::from_secs(40));

    assert!(sessions.sweep().is_empty());
    assert_eq!(sessions.time_left(&token), Some(Duration::from_secs(20)));
    assert_eq!(sessions.state(&token), Some(TokenState::Expiring));
}

#[test]
fn fixed_deadline_ignores_activity() {
    let (sessions, clock) = manager(ExpiryMode::Fixed);
    let sink = Arc::new(RecordingSink::new());
    let token = start(&sessions, &sink);
    let rules = SelectabilityRules::default();

    clock.advance(Duration::from_secs(40));
    sessions.claim(&token, &label("A-1"), &rules).unwrap();
    clock.advance(Duration::from_secs(20));

    assert_eq!(sessions.sweep(), vec![token]);
    assert_eq!(expiries(&sink), 1);
}

#[test]
fn lapsed_holder_is_expired_when_someone_else_claims() {
    let (sessions, clock) = manager(ExpiryMode::Sliding);
    let rules = SelectabilityRules::default();
    let first_sink = Arc::new(RecordingSink::new());
    let first = start(&sessions, &first_sink);
    sessions.claim(&first, &label("A-1"), &rules).unwrap();

    clock.advance(HOLD_TTL);
    let second = start(&sessions, &Arc::new(RecordingSink::new()));
    assert!(matches!(
        sessions.claim(&second, &label("A-1"), &rules),
        Ok(seathold_core::catalog::ClaimOutcome::Granted { renewed: false })
    ));
    assert_eq!(expiries(&first_sink), 1);
    assert_eq!(sessions.catalog().holder(&label("A-1")), Some(second));
}

#[test]
fn continue_mode_resumes_stored_token_with_its_claims() {
    let (sessions, _clock) = manager(ExpiryMode::Sliding);
    let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
    let request = || SessionRequest {
        store: Some(Arc::clone(&store)),
        ..SessionRequest::default()
    };

    let token = sessions
        .start_session(SessionMode::Continue, request())
        .unwrap()
        .unwrap();
    assert_eq!(store.load().unwrap(), Some(token.clone()));
    sessions
        .claim(&token, &label("A-2"), &SelectabilityRules::default())
        .unwrap();

    let resumed = sessions
        .start_session(SessionMode::Continue, request())
        .unwrap()
        .unwrap();
    assert_eq!(resumed, token);
    assert!(sessions.claims(&resumed).unwrap().units.contains(&label("A-2")));
}

#[test]
fn continue_mode_starts_fresh_after_expiry() {
    let (sessions, clock) = manager(ExpiryMode::Sliding);
    let store: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());
    let request = || SessionRequest {
        store: Some(Arc::clone(&store)),
        ..SessionRequest::default()
    };

    let first = sessions
        .start_session(SessionMode::Continue, request())
        .unwrap()
        .unwrap();
    clock.advance(HOLD_TTL);

    let second = sessions
        .start_session(SessionMode::Continue, request())
        .unwrap()
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(store.load().unwrap(), Some(second));
}

#[test]
fn manual_mode_requires_a_live_token() {
    let (sessions, _clock) = manager(ExpiryMode::Sliding);
    assert_eq!(
        sessions.start_session(SessionMode::Manual, SessionRequest::default()),
        Err(HoldError::NoActiveSession)
    );

    let external = HoldToken::from_external("issued-by-backend");
    let adopted = sessions
        .start_session(
            SessionMode::Manual,
            SessionRequest {
                supplied: Some(external.clone()),
                ..SessionRequest::default()
            },
        )
        .unwrap();
    assert_eq!(adopted, Some(external.clone()));

    sessions.release_session(&external);
    assert_eq!(
        sessions.start_session(
            SessionMode::Manual,
            SessionRequest {
                supplied: Some(external.clone()),
                ..SessionRequest::default()
            },
        ),
        Err(HoldError::TokenExpired(external))
    );
}

#[test]
fn none_mode_takes_no_token() {
    let (sessions, _clock) = manager(ExpiryMode::Sliding);
    assert_eq!(
        sessions.start_session(SessionMode::None, SessionRequest::default()),
        Ok(None)
    );
    assert_eq!(sessions.active_tokens(), 0);
}

#[test]
fn release_session_frees_everything_once() {
    let (sessions, _clock) = manager(ExpiryMode::Sliding);
    let rules = SelectabilityRules::default();
    let sink = Arc::new(RecordingSink::new());
    let token = start(&sessions, &sink);
    sessions.claim(&token, &label("A-1"), &rules).unwrap();
    sessions
        .claim_ga(&token, &label("Floor"), &TicketType::none(), 2, &rules)
        .unwrap();

    let released = sessions.release_session(&token);
    assert_eq!(released.units.len(), 1);
    assert_eq!(released.ga.values().sum::<u32>(), 2);
    assert!(sessions.release_session(&token).is_empty());

    assert_eq!(sessions.state(&token), Some(TokenState::Released));
    assert_eq!(sessions.catalog().num_free(&label("Floor")), Some(FLOOR_CAPACITY));
    assert_eq!(expiries(&sink), 0);
}
