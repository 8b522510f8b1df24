//! # Seathold Testing
//!
//! Testing utilities for seathold.
//!
//! This crate provides:
//! - [`ManualClock`]: deterministic time that only moves when told to
//! - [`RecordingSink`]: an [`EventSink`](seathold_core::notification::EventSink)
//!   that keeps every notification for later assertions
//! - [`ScriptedConfirmationService`]: a backend whose answers (and timing)
//!   the test controls
//! - [`fixtures`]: small charts and coordinators
//! - [`ChartScenario`]: Given-When-Then tests against a [`Chart`](seathold_runtime::Chart)
//!
//! ## Example
//!
//! ```
//! use seathold_core::types::{ObjectLabel, SelectTarget};
//! use seathold_testing::fixtures;
//!
//! # tokio_test::block_on(async {
//! let fixture = fixtures::row_fixture();
//! let chart = fixture.open_chart().await.unwrap();
//! chart.select(vec![SelectTarget::object("A-1")]).await.unwrap();
//!
//! assert_eq!(fixture.sink.selected_objects(), vec![ObjectLabel::from("A-1")]);
//! # });
//! ```

pub mod confirmation;
pub mod fixtures;

pub use chart_test::ChartScenario;
pub use confirmation::{ConfirmationCall, ScriptedConfirmationService};
pub use mocks::{ManualClock, RecordingSink, test_clock};

/// Mock implementations of the environment traits
pub mod mocks {
    use chrono::{DateTime, Utc};
    use seathold_core::environment::Clock;
    use seathold_core::notification::{EventSink, Notification};
    use seathold_core::types::ObjectLabel;
    use std::sync::{Mutex, PoisonError};
    use std::time::{Duration, Instant};

    /// Clock that stands still until [`ManualClock::advance`] is called
    ///
    /// Wall-clock and monotonic readings move together, so deadlines and
    /// creation timestamps stay consistent.
    ///
    /// # Example
    ///
    /// ```
    /// use seathold_core::environment::Clock;
    /// use seathold_testing::test_clock;
    /// use std::time::Duration;
    ///
    /// let clock = test_clock();
    /// let before = clock.monotonic();
    /// assert_eq!(clock.monotonic(), before);
    ///
    /// clock.advance(Duration::from_secs(5));
    /// assert_eq!(clock.monotonic() - before, Duration::from_secs(5));
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        wall: DateTime<Utc>,
        start: Instant,
        elapsed: Mutex<Duration>,
    }

    impl ManualClock {
        /// Create a clock reading `wall` until advanced
        #[must_use]
        pub fn new(wall: DateTime<Utc>) -> Self {
            Self {
                wall,
                start: Instant::now(),
                elapsed: Mutex::new(Duration::ZERO),
            }
        }

        /// Moves time forward by `by`
        pub fn advance(&self, by: Duration) {
            *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner) += by;
        }

        fn elapsed(&self) -> Duration {
            *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            chrono::Duration::from_std(self.elapsed())
                .map_or(self.wall, |elapsed| self.wall + elapsed)
        }

        fn monotonic(&self) -> Instant {
            self.start + self.elapsed()
        }
    }

    /// Create a manual clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> ManualClock {
        ManualClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Sink that records every notification in emission order
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        notifications: Mutex<Vec<Notification>>,
    }

    impl RecordingSink {
        /// Create an empty sink
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn recorded(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
            self.notifications.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Copy of everything recorded so far
        #[must_use]
        pub fn snapshot(&self) -> Vec<Notification> {
            self.recorded().clone()
        }

        /// Removes and returns everything recorded so far
        #[must_use]
        pub fn take(&self) -> Vec<Notification> {
            std::mem::take(&mut *self.recorded())
        }

        /// Number of recorded notifications matching `predicate`
        #[must_use]
        pub fn count(&self, predicate: impl Fn(&Notification) -> bool) -> usize {
            self.recorded().iter().filter(|n| predicate(n)).count()
        }

        /// Objects reported selected and not deselected since, in order
        #[must_use]
        pub fn selected_objects(&self) -> Vec<ObjectLabel> {
            let mut selected: Vec<ObjectLabel> = Vec::new();
            for notification in self.recorded().iter() {
                match notification {
                    Notification::ObjectSelected { item } => selected.push(item.object.clone()),
                    Notification::ObjectDeselected { item } => {
                        if let Some(position) = selected.iter().position(|o| o == &item.object) {
                            selected.remove(position);
                        }
                    }
                    _ => {}
                }
            }
            selected
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, notification: Notification) {
            self.recorded().push(notification);
        }
    }
}

/// Installs a test tracing subscriber once; later calls are no-ops
///
/// Honours `RUST_LOG` and writes through the test harness capture.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}
