//! Notifications emitted to the rendering client.
//!
//! The engine never talks to a UI directly. Every observable state change is
//! pushed through an [`EventSink`]; [`BroadcastSink`] fans the stream out to
//! any number of subscribers (renderer, analytics, test probes).
//!
//! # Ordering
//!
//! For one sink, notifications are emitted in causal order:
//!
//! 1. `ObjectSelected` / `ObjectDeselected` for the unit that changed
//! 2. exactly one of `SelectionValid` / `SelectionInvalid`
//! 3. later, once the backend settles, `HoldSucceeded` / `HoldFailed` (or the
//!    release equivalents)

use crate::types::{HoldToken, ObjectLabel, TicketType};
use crate::validation::Violation;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One held or selected item, as reported to observers and confirmation
/// services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldItem {
    /// Object
    pub object: ObjectLabel,
    /// Ticket type, if the buyer chose one
    #[serde(default)]
    pub ticket_type: Option<TicketType>,
    /// Places (GA areas), 1 otherwise
    pub quantity: u32,
}

impl HoldItem {
    /// A single unit without ticket type
    #[must_use]
    pub fn unit(object: impl Into<ObjectLabel>) -> Self {
        Self {
            object: object.into(),
            ticket_type: None,
            quantity: 1,
        }
    }
}

/// Everything a client can observe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// An item joined the selection
    ObjectSelected {
        /// Item
        item: HoldItem,
    },
    /// An item left the selection
    ObjectDeselected {
        /// Item
        item: HoldItem,
    },
    /// Best available picked and claimed these objects
    BestAvailableSelected {
        /// Picked objects, in pick order
        objects: Vec<ObjectLabel>,
        /// Whether all picks are adjacent in one row
        next_to_each_other: bool,
    },
    /// Best available could not satisfy the request
    BestAvailableSelectionFailed,
    /// The backend confirmed the holds
    HoldSucceeded {
        /// Confirmed items
        items: Vec<HoldItem>,
    },
    /// The backend rejected the holds; they were rolled back
    HoldFailed {
        /// Rolled back items
        items: Vec<HoldItem>,
        /// Reason reported by the backend
        reason: String,
    },
    /// The backend confirmed a release
    ReleaseHoldSucceeded {
        /// Released items
        items: Vec<HoldItem>,
    },
    /// The backend rejected a release; the items stay deselected
    ReleaseHoldFailed {
        /// Items
        items: Vec<HoldItem>,
        /// Reason reported by the backend
        reason: String,
    },
    /// The hold token expired; all its holds are gone
    HoldTokenExpired {
        /// Expired token
        token: HoldToken,
    },
    /// A held object was booked and left the token's ownership
    HeldObjectBooked {
        /// Token that held it
        token: HoldToken,
        /// Item that was booked
        item: HoldItem,
    },
    /// The selection satisfies every active validator
    SelectionValid,
    /// The selection breaks at least one active validator
    SelectionInvalid {
        /// Violated validators
        violations: Vec<Violation>,
    },
}

/// Observer receiving notifications
pub trait EventSink: Send + Sync {
    /// Delivers a notification; must not block
    fn emit(&self, notification: Notification);
}

/// Sink fanning notifications out over a `tokio::sync::broadcast` channel
///
/// Slow subscribers lag and miss notifications rather than blocking the
/// engine.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    /// Creates a sink buffering up to `capacity` notifications per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to notifications emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.sender.send(notification);
    }
}

/// Drains every notification currently buffered in `receiver`
#[must_use]
pub fn drain(receiver: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(notification) => out.push(notification),
            Err(broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return out,
        }
    }
}
