//! Backend confirmation: success, rejection, release failures and holds
//! confirmed after the buyer changed their mind.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use seathold_core::catalog::UnitStatus;
use seathold_core::error::HoldError;
use seathold_core::notification::{HoldItem, Notification};
use seathold_core::types::{ObjectLabel, SelectTarget};
use seathold_testing::ConfirmationCall;
use seathold_testing::chart_test::{ChartCommand, ChartScenario, assertions};
use seathold_testing::fixtures::row_fixture;
use std::sync::Arc;

fn seat(label: &str) -> SelectTarget {
    SelectTarget::object(label)
}

#[tokio::test]
async fn confirmed_hold_is_reported_after_selection() {
    ChartScenario::new(row_fixture())
        .when_command(ChartCommand::Select(vec![seat("A-1"), seat("A-2")]))
        .then_outcome(|outcome| assert!(outcome.is_ok()))
        .then_notifications(|notifications| {
            assert_eq!(
                notifications.last(),
                Some(&Notification::HoldSucceeded {
                    items: vec![HoldItem::unit("A-1"), HoldItem::unit("A-2")]
                })
            );
        })
        .then_fixture(|fixture, chart| {
            let token = chart.hold_token().unwrap();
            assert_eq!(
                fixture.backend.calls(),
                vec![ConfirmationCall::Hold {
                    token,
                    items: vec![HoldItem::unit("A-1"), HoldItem::unit("A-2")],
                }]
            );
        })
        .run()
        .await;
}

#[tokio::test]
async fn rejected_hold_is_rolled_back() {
    let fixture = row_fixture();
    fixture.backend.reject_next_hold("sold elsewhere");

    ChartScenario::new(fixture)
        .when_command(ChartCommand::Select(vec![seat("A-1"), seat("A-2")]))
        .then_outcome(|outcome| {
            assert_eq!(
                outcome,
                &Err(HoldError::ConfirmationFailed(
                    "Backend rejected the request: sold elsewhere".to_string()
                ))
            );
        })
        .then_selection(|items| assert!(items.is_empty()))
        .then_notifications(|notifications| {
            assertions::assert_count(
                notifications,
                |n| matches!(n, Notification::ObjectDeselected { .. }),
                2,
            );
            assert!(matches!(
                notifications.last(),
                Some(Notification::HoldFailed { items, .. }) if items.len() == 2
            ));
            assertions::assert_count(
                notifications,
                |n| matches!(n, Notification::HoldSucceeded { .. }),
                0,
            );
        })
        .then_fixture(|fixture, _| {
            let catalog = fixture.coordinator.catalog();
            assert_eq!(catalog.status(&"A-1".into()), Some(UnitStatus::Free));
            assert_eq!(catalog.status(&"A-2".into()), Some(UnitStatus::Free));
        })
        .run()
        .await;
}

#[tokio::test]
async fn rejected_release_stays_released_locally() {
    let fixture = row_fixture();
    fixture.backend.reject_next_release("backend busy");

    ChartScenario::new(fixture)
        .given_selected(vec![seat("A-1")])
        .when_command(ChartCommand::Deselect(vec![seat("A-1")]))
        .then_outcome(|outcome| {
            assert!(matches!(outcome, Err(HoldError::ConfirmationFailed(_))));
        })
        .then_selection(|items| assert!(items.is_empty()))
        .then_notifications(|notifications| {
            assert_eq!(
                notifications,
                [
                    Notification::ObjectDeselected {
                        item: HoldItem::unit("A-1")
                    },
                    Notification::SelectionValid,
                    Notification::ReleaseHoldFailed {
                        items: vec![HoldItem::unit("A-1")],
                        reason: "Backend rejected the request: backend busy".to_string(),
                    },
                ]
            );
        })
        .then_fixture(|fixture, _| {
            assert_eq!(
                fixture.coordinator.catalog().status(&"A-1".into()),
                Some(UnitStatus::Free)
            );
        })
        .run()
        .await;
}

#[tokio::test]
async fn hold_confirmed_after_deselect_is_compensated() {
    let fixture = row_fixture();
    let chart = Arc::new(fixture.open_chart().await.unwrap());
    let token = chart.hold_token().unwrap();
    let gate = fixture.backend.park_next_hold();

    let pending = {
        let chart = Arc::clone(&chart);
        tokio::spawn(async move { chart.select(vec![seat("A-1")]).await })
    };
    fixture.backend.wait_until_parked().await;

    chart.deselect(vec![seat("A-1")]).await.unwrap();
    gate.send(()).unwrap();
    pending.await.unwrap().unwrap();

    assert!(chart.selected_objects().is_empty());
    assert_eq!(
        fixture.coordinator.catalog().status(&"A-1".into()),
        Some(UnitStatus::Free)
    );
    assert_eq!(
        fixture.backend.calls(),
        vec![
            ConfirmationCall::Hold {
                token: token.clone(),
                items: vec![HoldItem::unit("A-1")],
            },
            ConfirmationCall::Release {
                token: token.clone(),
                items: vec![HoldItem::unit("A-1")],
            },
            ConfirmationCall::Release {
                token,
                items: vec![HoldItem::unit("A-1")],
            },
        ]
    );
    assert_eq!(
        fixture
            .sink
            .count(|n| matches!(n, Notification::HoldSucceeded { .. })),
        0
    );
}

#[tokio::test]
async fn reselected_object_is_not_compensated() {
    let fixture = row_fixture();
    let chart = Arc::new(fixture.open_chart().await.unwrap());
    let gate = fixture.backend.park_next_hold();

    let pending = {
        let chart = Arc::clone(&chart);
        tokio::spawn(async move { chart.select(vec![seat("A-1")]).await })
    };
    fixture.backend.wait_until_parked().await;

    chart.deselect(vec![seat("A-1")]).await.unwrap();
    chart.select(vec![seat("A-1")]).await.unwrap();
    gate.send(()).unwrap();
    pending.await.unwrap().unwrap();

    assert_eq!(chart.selected_objects(), vec![HoldItem::unit("A-1")]);
    assert_eq!(
        fixture.coordinator.catalog().holder(&ObjectLabel::from("A-1")),
        chart.hold_token()
    );
    // One release for the deselect, none for the stale confirmation
    assert_eq!(fixture.backend.released_items(), vec![HoldItem::unit("A-1")]);
    assert_eq!(
        fixture
            .sink
            .count(|n| matches!(n, Notification::HoldSucceeded { .. })),
        1
    );
}
