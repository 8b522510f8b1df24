//! Two buyers issuing random chart commands: selections always match the
//! catalog.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use proptest::prelude::*;
use seathold_core::catalog::UnitStatus;
use seathold_core::solver::BestAvailableRequest;
use seathold_core::types::{ObjectLabel, SelectTarget};
use seathold_runtime::Chart;
use seathold_testing::fixtures::{FLOOR_CAPACITY, row_fixture};
use std::collections::HashSet;

const SEATS: [&str; 6] = ["A-1", "A-2", "A-3", "B-1", "B-2", "B-3"];

#[derive(Debug, Clone)]
enum Command {
    Select(usize),
    Deselect(usize),
    SelectFloor(u32),
    DeselectFloor(u32),
    BestAvailable(u32),
    Clear,
}

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        4 => (0..SEATS.len()).prop_map(Command::Select),
        2 => (0..SEATS.len()).prop_map(Command::Deselect),
        2 => (1..5_u32).prop_map(Command::SelectFloor),
        1 => (1..5_u32).prop_map(Command::DeselectFloor),
        1 => (1..4_u32).prop_map(Command::BestAvailable),
        1 => Just(Command::Clear),
    ]
}

async fn apply(chart: &Chart, command: Command) {
    let floor = |amount| SelectTarget::object("Floor").with_amount(amount);
    // Refusals are part of the game; only the resulting state matters
    let _ = match command {
        Command::Select(seat) => chart.select(vec![SEATS[seat].into()]).await.map(drop),
        Command::Deselect(seat) => chart.deselect(vec![SEATS[seat].into()]).await.map(drop),
        Command::SelectFloor(amount) => chart.select(vec![floor(amount)]).await.map(drop),
        Command::DeselectFloor(amount) => chart.deselect(vec![floor(amount)]).await.map(drop),
        Command::BestAvailable(n) => chart
            .select_best_available(BestAvailableRequest::number(n))
            .await
            .map(drop),
        Command::Clear => chart.clear_selection().await.map(drop),
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn selections_mirror_the_catalog(
        commands in prop::collection::vec((any::<bool>(), command_strategy()), 1..40)
    ) {
        tokio_test::block_on(async {
            let fixture = row_fixture();
            let first = fixture.open_chart().await.unwrap();
            let (second, _) = fixture.open_other_chart().await.unwrap();
            let floor = ObjectLabel::from("Floor");

            for (by_first, command) in commands {
                let chart = if by_first { &first } else { &second };
                apply(chart, command).await;

                let catalog = fixture.coordinator.catalog();
                let mut units = HashSet::new();
                let mut floor_places = 0;
                for chart in [&first, &second] {
                    let token = chart.hold_token().unwrap();
                    for item in chart.selected_objects() {
                        if item.object == floor {
                            floor_places += item.quantity;
                        } else {
                            assert!(units.insert(item.object.clone()), "{} selected twice", item.object);
                            assert_eq!(catalog.status(&item.object), Some(UnitStatus::Held(token.clone())));
                        }
                    }
                }

                let ga = catalog.ga_availability(&floor).unwrap();
                assert_eq!(ga.held, floor_places);
                assert!(ga.held <= FLOOR_CAPACITY);
                for label in catalog.layout().objects().iter().map(|o| &o.label) {
                    if matches!(catalog.status(label), Some(UnitStatus::Held(_))) {
                        assert!(units.contains(label), "{label} held but not selected");
                    }
                }
            }
        });
    }
}
