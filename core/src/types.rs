//! Identifiers and value objects shared by every part of the hold engine.
//!
//! Labels and keys are string newtypes: charts are authored by humans and
//! objects are addressed by their printed label (`"A-12"`, `"Floor"`), not by
//! generated ids. Hold tokens are the exception; they are generated as UUIDs
//! but may also be issued externally (manual session mode), so they are kept
//! as opaque strings too.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the key from any string-like value
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the key as a string slice
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_key!(
    /// Stable label of a bookable object (seat, table, booth or GA area)
    ObjectLabel
);

string_key!(
    /// Key of a pricing/accessibility category
    CategoryKey
);

string_key!(
    /// Key of a sales channel
    ChannelKey
);

string_key!(
    /// Key of an event the chart is rendered against
    EventKey
);

string_key!(
    /// Ticket type (e.g. "adult", "child") used for multi-level pricing
    TicketType
);

string_key!(
    /// Key of a row or table grouping seats
    RowKey
);

string_key!(
    /// Key of a section grouping rows and objects
    SectionKey
);

/// Identity under which holds are claimed and released.
///
/// Generated tokens are UUID v4 strings; externally issued tokens (manual
/// session mode) are accepted verbatim.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldToken(String);

impl HoldToken {
    /// Generates a fresh random token
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an externally issued token
    #[must_use]
    pub fn from_external(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HoldToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ticket type used for GA counts when no explicit ticket type is given
pub const NO_TICKET_TYPE: &str = "NO_TICKET_TYPE";

impl TicketType {
    /// The implicit ticket type of a selection made without one
    #[must_use]
    pub fn none() -> Self {
        Self(NO_TICKET_TYPE.to_string())
    }

    /// Resolves an optional ticket type to the key used for GA bookkeeping
    #[must_use]
    pub fn or_none(ticket_type: Option<&Self>) -> Self {
        ticket_type.cloned().unwrap_or_else(Self::none)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Selection Targets
// ============================================================================

/// What a buyer asks to select or deselect: an object, optionally with a
/// ticket type, and an amount (only meaningful for GA areas).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectTarget {
    /// Object to select
    pub object: ObjectLabel,
    /// Ticket type chosen by the buyer
    #[serde(default)]
    pub ticket_type: Option<TicketType>,
    /// Number of places (GA areas); ignored for seats, tables and booths
    #[serde(default = "default_amount")]
    pub amount: u32,
}

const fn default_amount() -> u32 {
    1
}

impl SelectTarget {
    /// Targets a single object without ticket type
    #[must_use]
    pub fn object(label: impl Into<ObjectLabel>) -> Self {
        Self {
            object: label.into(),
            ticket_type: None,
            amount: 1,
        }
    }

    /// Sets the ticket type
    #[must_use]
    pub fn with_ticket_type(mut self, ticket_type: impl Into<TicketType>) -> Self {
        self.ticket_type = Some(ticket_type.into());
        self
    }

    /// Sets the amount of places (GA areas)
    #[must_use]
    pub const fn with_amount(mut self, amount: u32) -> Self {
        self.amount = amount;
        self
    }
}

impl From<&str> for SelectTarget {
    fn from(label: &str) -> Self {
        Self::object(label)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn money_formats_with_two_decimals() {
        assert_eq!(Money::from_cents(4_205).to_string(), "42.05");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }

    #[test]
    fn generated_tokens_are_unique() {
        assert_ne!(HoldToken::generate(), HoldToken::generate());
    }

    #[test]
    fn select_target_deserializes_with_defaults() {
        let target: SelectTarget = serde_json::from_str(r#"{"object":"A-1"}"#).unwrap();
        assert_eq!(target.object.as_str(), "A-1");
        assert_eq!(target.amount, 1);
        assert!(target.ticket_type.is_none());
    }
}
