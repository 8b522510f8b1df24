//! Small charts and ready-wired coordinators.
//!
//! The standard chart has two rows of five seats and one GA area:
//!
//! | object        | category      |
//! |---------------|---------------|
//! | `A-1`..`A-5`  | `1` (Stalls)  |
//! | `B-1`..`B-5`  | `2` (Balcony) |
//! | `Floor` (10)  | `2` (Balcony) |

use crate::confirmation::ScriptedConfirmationService;
use crate::mocks::{ManualClock, RecordingSink, test_clock};
use seathold_core::catalog::ResourceCatalog;
use seathold_core::chart::{Category, ChartBuilder, ChartLayout};
use seathold_core::config::{ChartConfig, HoldConfig};
use seathold_core::error::HoldError;
use seathold_core::notification::EventSink;
use seathold_core::session::SessionMode;
use seathold_core::types::EventKey;
use seathold_runtime::{Chart, HoldCoordinator};
use std::sync::Arc;
use std::time::Duration;

/// Event every fixture renders
pub const EVENT: &str = "concert";

/// Capacity of the `Floor` GA area
pub const FLOOR_CAPACITY: u32 = 10;

/// TTL of fixture sessions
pub const HOLD_TTL: Duration = Duration::from_secs(60);

/// The standard two-row chart with a GA area
///
/// # Panics
///
/// Never in practice; the layout is static.
#[must_use]
#[allow(clippy::expect_used)]
pub fn row_chart() -> ChartLayout {
    ChartBuilder::new()
        .category(Category::new("1", "Stalls"))
        .category(Category::new("2", "Balcony"))
        .section("Main")
        .row("A", "1", &["A-1", "A-2", "A-3", "A-4", "A-5"])
        .row("B", "2", &["B-1", "B-2", "B-3", "B-4", "B-5"])
        .general_admission("Floor", "2", FLOOR_CAPACITY)
        .build()
        .expect("fixture chart is valid")
}

/// Catalog of [`row_chart`] rendered for [`EVENT`]
#[must_use]
pub fn row_catalog() -> Arc<ResourceCatalog> {
    Arc::new(ResourceCatalog::new(Arc::new(row_chart()), vec![EventKey::new(EVENT)]))
}

/// Chart configuration starting a fresh session for [`EVENT`]
#[must_use]
pub fn start_config() -> ChartConfig {
    ChartConfig::new([EventKey::new(EVENT)], SessionMode::Start)
}

/// A coordinator with a manual clock, a scripted backend and one buyer's sink
#[derive(Debug)]
pub struct Fixture {
    /// Coordinator under test
    pub coordinator: Arc<HoldCoordinator>,
    /// Backend answers
    pub backend: Arc<ScriptedConfirmationService>,
    /// Time source of every session
    pub clock: Arc<ManualClock>,
    /// Sink used by [`Fixture::open_chart`]
    pub sink: Arc<RecordingSink>,
}

impl Fixture {
    /// Wires a fixture around `catalog`
    #[must_use]
    pub fn new(catalog: Arc<ResourceCatalog>, config: HoldConfig) -> Self {
        let backend = Arc::new(ScriptedConfirmationService::new());
        let clock = Arc::new(test_clock());
        let coordinator = Arc::new(HoldCoordinator::new(
            catalog,
            config,
            Arc::clone(&clock) as Arc<dyn seathold_core::environment::Clock>,
            Arc::clone(&backend) as Arc<dyn seathold_runtime::ConfirmationService>,
        ));
        Self {
            coordinator,
            backend,
            clock,
            sink: Arc::new(RecordingSink::new()),
        }
    }

    /// Opens a `start` chart reporting to [`Fixture::sink`]
    ///
    /// # Errors
    ///
    /// See [`HoldCoordinator::open_chart`].
    pub async fn open_chart(&self) -> Result<Chart, HoldError> {
        self.open_chart_with(start_config()).await
    }

    /// Opens a chart with `config`, reporting to [`Fixture::sink`]
    ///
    /// # Errors
    ///
    /// See [`HoldCoordinator::open_chart`].
    pub async fn open_chart_with(&self, config: ChartConfig) -> Result<Chart, HoldError> {
        let sink: Arc<dyn EventSink> = Arc::clone(&self.sink) as Arc<dyn EventSink>;
        self.coordinator.open_chart(config, sink, None).await
    }

    /// Opens a `start` chart for another buyer, with its own sink
    ///
    /// # Errors
    ///
    /// See [`HoldCoordinator::open_chart`].
    pub async fn open_other_chart(&self) -> Result<(Chart, Arc<RecordingSink>), HoldError> {
        let sink = Arc::new(RecordingSink::new());
        let chart = self
            .coordinator
            .open_chart(start_config(), Arc::clone(&sink) as Arc<dyn EventSink>, None)
            .await?;
        Ok((chart, sink))
    }
}

/// Fixture over [`row_chart`] with a 60 second sliding TTL
#[must_use]
pub fn row_fixture() -> Fixture {
    Fixture::new(row_catalog(), HoldConfig::default().with_hold_ttl(HOLD_TTL))
}
