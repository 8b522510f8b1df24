//! Error taxonomy of the hold engine.
//!
//! Most of these are recoverable from the buyer's point of view: a lost race
//! or a non-selectable object is reported to the caller as a failed command
//! while the session carries on. Only [`HoldError::TokenExpired`] is terminal
//! for the token it names.

use crate::types::{CategoryKey, EventKey, HoldToken, ObjectLabel, RowKey, TicketType};
use crate::validation::Violation;
use thiserror::Error;

/// Errors surfaced by selection, session and best-available operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HoldError {
    /// Another token won the claim, or the object is already booked
    #[error("Object '{0}' is already held or booked")]
    AlreadyHeldOrBooked(ObjectLabel),

    /// Category, channel or pricing rules exclude the object
    #[error("Object '{0}' is not selectable")]
    NotSelectable(ObjectLabel),

    /// A GA area does not have enough free places left
    #[error("Not enough free places in '{object}': requested {requested}, free {available}")]
    CapacityExhausted {
        /// GA area
        object: ObjectLabel,
        /// Places requested
        requested: u32,
        /// Places free at the time of the request
        available: u32,
    },

    /// The selection breaks one or more selection validators
    #[error("Selection violates {0:?}")]
    ValidationViolation(Vec<Violation>),

    /// The backend rejected or failed to confirm a hold or release
    #[error("Confirmation failed: {0}")]
    ConfirmationFailed(String),

    /// The hold token is expired or was released
    #[error("Hold token {0} is expired")]
    TokenExpired(HoldToken),

    /// Best available cannot satisfy the request
    #[error("Insufficient availability: requested {requested}, available {available}")]
    InsufficientAvailability {
        /// Units requested
        requested: u32,
        /// Selectable free units found
        available: u32,
    },

    /// No object with that label exists on the chart
    #[error("Unknown object '{0}'")]
    UnknownObject(ObjectLabel),

    /// Deselect of something that is not part of the selection
    #[error("Object '{0}' is not selected")]
    NotSelected(ObjectLabel),

    /// `maxSelectedObjects` would be exceeded
    #[error("Selection limit of {limit} reached{}", scope_suffix(.scope.as_deref()))]
    SelectionLimitReached {
        /// The configured limit
        limit: u32,
        /// Category or ticket type the limit applies to, if not overall
        scope: Option<String>,
    },

    /// An operation needing a hold token ran in a session-less context
    #[error("No active hold session")]
    NoActiveSession,

    /// A chart configuration names an event the catalog does not render
    #[error("Unknown event '{0}'")]
    UnknownEvent(EventKey),
}

fn scope_suffix(scope: Option<&str>) -> String {
    scope.map(|s| format!(" for {s}")).unwrap_or_default()
}

/// Errors raised while turning a chart definition into a layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChartDefinitionError {
    /// Two objects share a label
    #[error("Duplicate object label '{0}'")]
    DuplicateLabel(ObjectLabel),

    /// An object references a category that is not declared
    #[error("Object '{object}' references unknown category '{category}'")]
    UnknownCategory {
        /// Offending object
        object: ObjectLabel,
        /// Missing category
        category: CategoryKey,
    },

    /// A row lists a seat twice or a seat claims an undeclared row
    #[error("Row '{row}' is inconsistent: {reason}")]
    InvalidRow {
        /// Offending row
        row: RowKey,
        /// What is wrong with it
        reason: String,
    },

    /// A GA area was declared without capacity
    #[error("General admission area '{0}' has zero capacity")]
    ZeroCapacity(ObjectLabel),

    /// A ticket type price was declared twice for one category
    #[error("Category '{category}' prices ticket type '{ticket_type}' twice")]
    DuplicateTicketType {
        /// Category
        category: CategoryKey,
        /// Ticket type
        ticket_type: TicketType,
    },

    /// The JSON document could not be parsed
    #[error("Chart definition is not valid JSON: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ChartDefinitionError {
    fn from(error: serde_json::Error) -> Self {
        Self::Parse(error.to_string())
    }
}
