//! # Seathold Runtime
//!
//! Async shell around `seathold-core`.
//!
//! The core applies every local transition synchronously. This crate adds
//! the parts that wait: confirming holds and releases with the backend,
//! expiring idle tokens in the background, and recording metrics.
//!
//! ## Core Components
//!
//! - **[`HoldCoordinator`]**: shared per catalog; opens charts, applies
//!   bookings pushed by the backend, sweeps expired tokens
//! - **[`Chart`]**: one buyer's rendering context and its command surface
//!   (`select`, `deselect`, `select_best_available`, `start_new_session`, ...)
//! - **[`ConfirmationService`]**: the backend boundary
//! - **[`Sweeper`]**: background expiry task
//!
//! ## Example
//!
//! ```no_run
//! use seathold_core::chart::{Category, ChartBuilder};
//! use seathold_core::config::{ChartConfig, HoldConfig};
//! use seathold_core::notification::BroadcastSink;
//! use seathold_core::session::SessionMode;
//! use seathold_core::types::EventKey;
//! use seathold_runtime::{HoldCoordinator, NoopConfirmationService};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layout = ChartBuilder::new()
//!     .category(Category::new("A", "Stalls"))
//!     .row("A", "A", &["A-1", "A-2", "A-3"])
//!     .build()?;
//! let coordinator = HoldCoordinator::for_layout(
//!     layout,
//!     vec![EventKey::new("concert")],
//!     HoldConfig::from_env(),
//!     Arc::new(NoopConfirmationService),
//! );
//!
//! let sink = Arc::new(BroadcastSink::default());
//! let chart = coordinator
//!     .open_chart(ChartConfig::new([EventKey::new("concert")], SessionMode::Start), sink, None)
//!     .await?;
//! chart.select(vec!["A-1".into()]).await?;
//! # Ok(())
//! # }
//! ```

pub mod chart;
pub mod confirmation;
pub mod coordinator;
pub mod metrics;
pub mod sweeper;

pub use chart::{Chart, SelectionReport};
pub use confirmation::{ConfirmationError, ConfirmationService, NoopConfirmationService};
pub use coordinator::HoldCoordinator;
pub use sweeper::Sweeper;
