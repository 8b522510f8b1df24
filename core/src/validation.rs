//! Selection validators.
//!
//! Validators look at the selection together with the catalog and answer
//! "valid" or name a [`Violation`]. They never reject a mutation; the
//! aggregate result only drives the valid/invalid notification that follows
//! every selection change.
//!
//! Adjacency comes from chart rows only. Objects outside rows (tables, booths,
//! GA areas) never produce violations.

use crate::catalog::ResourceCatalog;
use crate::chart::{ChartLayout, Row};
use crate::error::HoldError;
use crate::notification::Notification;
use crate::types::ObjectLabel;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Violation tags, a closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Violation {
    /// A free seat would be stranded between occupied seats
    NoOrphanSeats,
    /// Selected seats in a row have gaps
    ConsecutiveSeats,
}

/// How `noOrphanSeats` treats orphans that existed before the current action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanMode {
    /// Only orphans created by the current action count
    #[default]
    Lenient,
    /// Any orphan next to a selected seat counts
    Strict,
}

const fn enabled_by_default() -> bool {
    true
}

/// Validator configuration, as supplied with the chart configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SelectionValidator {
    /// Forbid leaving single free seats between occupied ones
    NoOrphanSeats {
        /// Lenient or strict
        #[serde(default)]
        mode: OrphanMode,
        /// Disabled validators are ignored
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
    /// Require selected seats in a row to be contiguous
    ConsecutiveSeats,
}

/// Units touched by the mutation being validated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionScope {
    /// Units that just joined the selection
    pub added: BTreeSet<ObjectLabel>,
    /// Units that just left the selection
    pub removed: BTreeSet<ObjectLabel>,
}

impl ActionScope {
    /// Scope of a single added unit
    #[must_use]
    pub fn added(label: ObjectLabel) -> Self {
        Self {
            added: BTreeSet::from([label]),
            removed: BTreeSet::new(),
        }
    }

    /// Scope of a single removed unit
    #[must_use]
    pub fn removed(label: ObjectLabel) -> Self {
        Self {
            added: BTreeSet::new(),
            removed: BTreeSet::from([label]),
        }
    }
}

/// Everything a validator may look at
#[derive(Debug, Clone, Copy)]
pub struct ValidationInput<'a> {
    /// Chart layout
    pub layout: &'a ChartLayout,
    /// Shared catalog
    pub catalog: &'a ResourceCatalog,
    /// Labels currently in the selection
    pub selected: &'a BTreeSet<ObjectLabel>,
    /// What the current action changed
    pub action: &'a ActionScope,
}

impl<'a> ValidationInput<'a> {
    fn occupied_now(&self, label: &ObjectLabel) -> bool {
        self.selected.contains(label) || self.catalog.is_occupied(label)
    }

    fn occupied_before(&self, label: &ObjectLabel) -> bool {
        if self.action.added.contains(label) {
            false
        } else if self.action.removed.contains(label) {
            true
        } else {
            self.occupied_now(label)
        }
    }

    /// Rows containing a selected or touched seat, in declaration order
    fn affected_rows(&self) -> Vec<&'a Row> {
        let mut rows: BTreeMap<usize, &'a Row> = BTreeMap::new();
        let layout = self.layout;
        for label in self
            .selected
            .iter()
            .chain(&self.action.added)
            .chain(&self.action.removed)
        {
            if let Some((row, _)) = layout.row_position(label) {
                if let Some(index) = layout.rows().iter().position(|r| r.key == row.key) {
                    rows.insert(index, row);
                }
            }
        }
        rows.into_values().collect()
    }
}

/// Free seats of `row` with an occupied seat on both sides
fn orphans(row: &Row, occupied: impl Fn(&ObjectLabel) -> bool) -> BTreeSet<usize> {
    let seats = &row.seats;
    (1..seats.len().saturating_sub(1))
        .filter(|&i| !occupied(&seats[i]) && occupied(&seats[i - 1]) && occupied(&seats[i + 1]))
        .collect()
}

// ============================================================================
// Rules
// ============================================================================

/// A validator over the selection and the catalog
pub trait SelectionRule: Send + Sync {
    /// Tag reported when the rule fails
    fn violation(&self) -> Violation;

    /// Whether the selection satisfies the rule
    fn is_satisfied(&self, input: &ValidationInput<'_>) -> bool;
}

/// `noOrphanSeats` rule
#[derive(Debug, Clone, Copy)]
pub struct NoOrphanSeats {
    mode: OrphanMode,
}

impl NoOrphanSeats {
    /// Creates the rule in the given mode
    #[must_use]
    pub const fn new(mode: OrphanMode) -> Self {
        Self { mode }
    }
}

impl SelectionRule for NoOrphanSeats {
    fn violation(&self) -> Violation {
        Violation::NoOrphanSeats
    }

    fn is_satisfied(&self, input: &ValidationInput<'_>) -> bool {
        input.affected_rows().into_iter().all(|row| {
            let now = orphans(row, |l| input.occupied_now(l));
            match self.mode {
                OrphanMode::Strict => now.iter().all(|&i| {
                    !input.selected.contains(&row.seats[i - 1])
                        && !input.selected.contains(&row.seats[i + 1])
                }),
                OrphanMode::Lenient => {
                    let before = orphans(row, |l| input.occupied_before(l));
                    now.is_subset(&before)
                }
            }
        })
    }
}

/// `consecutiveSeats` rule
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsecutiveSeats;

impl SelectionRule for ConsecutiveSeats {
    fn violation(&self) -> Violation {
        Violation::ConsecutiveSeats
    }

    fn is_satisfied(&self, input: &ValidationInput<'_>) -> bool {
        let mut per_row: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for label in input.selected {
            if let Some((row, position)) = input.layout.row_position(label) {
                per_row.entry(row.key.as_str()).or_default().push(position);
            }
        }
        per_row.values().all(|positions| {
            let min = positions.iter().min().copied().unwrap_or(0);
            let max = positions.iter().max().copied().unwrap_or(0);
            max - min + 1 == positions.len()
        })
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Aggregate result of all active validators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Violated rules, in configuration order
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    /// Valid iff nothing is violated
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// The valid/invalid notification for this result
    #[must_use]
    pub fn to_notification(&self) -> Notification {
        if self.is_valid() {
            Notification::SelectionValid
        } else {
            Notification::SelectionInvalid {
                violations: self.violations.clone(),
            }
        }
    }

    /// Turns an invalid result into [`HoldError::ValidationViolation`]
    ///
    /// # Errors
    ///
    /// Returns the violated rules when the selection is not valid.
    pub fn into_result(self) -> Result<(), HoldError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(HoldError::ValidationViolation(self.violations))
        }
    }
}

/// Ordered set of active rules
#[derive(Default)]
pub struct ValidatorEngine {
    rules: Vec<Box<dyn SelectionRule>>,
}

impl std::fmt::Debug for ValidatorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorEngine")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.violation()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ValidatorEngine {
    /// Builds the engine from configuration, skipping disabled validators
    #[must_use]
    pub fn from_config(validators: &[SelectionValidator]) -> Self {
        let rules = validators
            .iter()
            .filter_map(|validator| -> Option<Box<dyn SelectionRule>> {
                match validator {
                    SelectionValidator::NoOrphanSeats { mode, enabled: true } => {
                        Some(Box::new(NoOrphanSeats::new(*mode)))
                    }
                    SelectionValidator::NoOrphanSeats { enabled: false, .. } => None,
                    SelectionValidator::ConsecutiveSeats => Some(Box::new(ConsecutiveSeats)),
                }
            })
            .collect();
        Self { rules }
    }

    /// Adds a custom rule
    #[must_use]
    pub fn with_rule(mut self, rule: impl SelectionRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Whether no rule is active
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule
    #[must_use]
    pub fn evaluate(&self, input: &ValidationInput<'_>) -> ValidationResult {
        let violations = self
            .rules
            .iter()
            .filter(|rule| !rule.is_satisfied(input))
            .map(|rule| rule.violation())
            .collect();
        ValidationResult { violations }
    }
}
