//! # Seathold Core
//!
//! Hold-and-selection engine for seated and general admission events.
//!
//! Many buyers tentatively claim bookable objects (seats, tables, booths and
//! places of GA areas) for the duration of a session. The engine guarantees
//! that a unit is never granted to two buyers at once, releases holds when a
//! session ends or expires, and re-validates each buyer's selection after
//! every change.
//!
//! ## Components
//!
//! Leaves first:
//!
//! - [`catalog::ResourceCatalog`]: shared free/held/booked state, one lock per
//!   unit or GA pool
//! - [`session::SessionManager`]: hold tokens, their claim sets and deadlines
//! - [`selection::SelectionState`]: one buyer's ordered selection
//! - [`validation::ValidatorEngine`]: `noOrphanSeats` / `consecutiveSeats`
//! - [`solver`]: best-available assignment
//! - [`notification`]: the observer contract towards the rendering client
//!
//! ## Architecture Principles
//!
//! - Explicit context objects instead of ambient singletons
//! - Dependency injection of clock and token storage via traits
//! - Every local transition is synchronous; only backend confirmation
//!   (in `seathold-runtime`) awaits
//!
//! ## Example
//!
//! ```
//! use seathold_core::catalog::{ClaimOutcome, ResourceCatalog};
//! use seathold_core::chart::{Category, ChartBuilder};
//! use seathold_core::selectability::SelectabilityRules;
//! use seathold_core::types::HoldToken;
//! use std::sync::Arc;
//!
//! let chart = ChartBuilder::new()
//!     .category(Category::new("A", "Stalls"))
//!     .row("A", "A", &["A-1", "A-2"])
//!     .build()
//!     .unwrap();
//! let catalog = ResourceCatalog::new(Arc::new(chart), vec!["concert".into()]);
//!
//! let rules = SelectabilityRules::default();
//! let alice = HoldToken::generate();
//! let bob = HoldToken::generate();
//! assert_eq!(
//!     catalog.try_claim(&"A-1".into(), &alice, &rules),
//!     ClaimOutcome::Granted { renewed: false }
//! );
//! assert!(matches!(
//!     catalog.try_claim(&"A-1".into(), &bob, &rules),
//!     ClaimOutcome::AlreadyHeld { .. }
//! ));
//! ```

pub mod catalog;
pub mod chart;
pub mod config;
pub mod environment;
pub mod error;
pub mod notification;
pub mod selectability;
pub mod selection;
pub mod session;
pub mod solver;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub use catalog::{BookingConfirmation, BookingOutcome, ClaimOutcome, ReleaseOutcome, ResourceCatalog, UnitStatus};
pub use chart::{Bookable, BookableObject, Category, ChartBuilder, ChartDefinition, ChartLayout};
pub use config::{ChartConfig, ExpiryMode, HoldConfig};
pub use environment::{Clock, SystemClock, TokenStore};
pub use error::{ChartDefinitionError, HoldError};
pub use notification::{BroadcastSink, EventSink, HoldItem, Notification};
pub use selectability::SelectabilityRules;
pub use selection::{SelectionContext, SelectionLimits, SelectionState};
pub use session::{SessionManager, SessionMode, SessionRequest, TokenState};
pub use solver::{BestAvailableRequest, BestAvailableSolver, Solution};
pub use types::{HoldToken, ObjectLabel, SelectTarget, TicketType};
pub use validation::{SelectionValidator, ValidatorEngine, Violation};
