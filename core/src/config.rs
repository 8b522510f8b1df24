//! Configuration: engine-wide hold settings and per-rendering chart settings.
//!
//! [`HoldConfig`] is loaded from environment variables with sensible
//! defaults. [`ChartConfig`] arrives with each rendering context and is
//! deserialised from JSON.

use crate::selectability::SelectabilityRules;
use crate::selection::SelectionLimits;
use crate::session::SessionMode;
use crate::types::{EventKey, HoldToken, SelectTarget};
use crate::validation::SelectionValidator;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How the token deadline reacts to activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryMode {
    /// Every claim or touch pushes the deadline out by the TTL
    #[default]
    Sliding,
    /// The deadline is fixed when the token is created
    Fixed,
}

impl FromStr for ExpiryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding" => Ok(Self::Sliding),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!("unknown expiry mode '{other}'")),
        }
    }
}

/// Engine-wide hold settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldConfig {
    /// Lifetime of a hold token without activity
    pub hold_ttl: Duration,
    /// Sliding or fixed deadlines
    pub expiry_mode: ExpiryMode,
    /// How often the background sweeper looks for due tokens
    pub sweep_interval: Duration,
    /// Remaining lifetime below which a token is reported as expiring
    pub expiring_window: Duration,
    /// Claim rounds best available may spend on lost races
    pub solver_max_attempts: u32,
}

impl Default for HoldConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(15 * 60),
            expiry_mode: ExpiryMode::Sliding,
            sweep_interval: Duration::from_millis(1000),
            expiring_window: Duration::from_secs(60),
            solver_max_attempts: 3,
        }
    }
}

impl HoldConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            hold_ttl: parse_u64("SEATHOLD_HOLD_TTL_SECS")
                .map_or(defaults.hold_ttl, Duration::from_secs),
            expiry_mode: lookup("SEATHOLD_EXPIRY_MODE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.expiry_mode),
            sweep_interval: parse_u64("SEATHOLD_SWEEP_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map_or(defaults.sweep_interval, Duration::from_millis),
            expiring_window: parse_u64("SEATHOLD_EXPIRING_WINDOW_SECS")
                .map_or(defaults.expiring_window, Duration::from_secs),
            solver_max_attempts: lookup("SEATHOLD_SOLVER_MAX_ATTEMPTS")
                .and_then(|s| s.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.solver_max_attempts),
        }
    }

    /// Same configuration with another TTL
    #[must_use]
    pub const fn with_hold_ttl(mut self, ttl: Duration) -> Self {
        self.hold_ttl = ttl;
        self
    }

    /// Same configuration with another expiry mode
    #[must_use]
    pub const fn with_expiry_mode(mut self, mode: ExpiryMode) -> Self {
        self.expiry_mode = mode;
        self
    }
}

const fn yes() -> bool {
    true
}

/// Settings of one rendering context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartConfig {
    /// Events rendered together
    pub events: Vec<EventKey>,
    /// Session mode
    #[serde(default)]
    pub session: SessionMode,
    /// Externally issued token (manual mode)
    #[serde(default)]
    pub hold_token: Option<HoldToken>,
    /// Selection validators
    #[serde(default)]
    pub selection_validators: Vec<SelectionValidator>,
    /// `maxSelectedObjects`
    #[serde(default)]
    pub max_selected_objects: SelectionLimits,
    /// Category, channel and pricing restrictions
    #[serde(default, flatten)]
    pub selectability: SelectabilityRules,
    /// Whether GA selections take holds when a session is active
    #[serde(default = "yes")]
    pub hold_on_select_for_ga: bool,
    /// Objects selected when the chart opens
    #[serde(default)]
    pub selected_objects: Vec<SelectTarget>,
}

impl ChartConfig {
    /// Minimal configuration for the given events and session mode
    #[must_use]
    pub fn new(events: impl IntoIterator<Item = EventKey>, session: SessionMode) -> Self {
        Self {
            events: events.into_iter().collect(),
            session,
            hold_token: None,
            selection_validators: Vec::new(),
            max_selected_objects: SelectionLimits::default(),
            selectability: SelectabilityRules::default(),
            hold_on_select_for_ga: true,
            selected_objects: Vec::new(),
        }
    }

    /// Parses a configuration document
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe a chart configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::validation::OrphanMode;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset_or_invalid() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SEATHOLD_HOLD_TTL_SECS", "120"),
            ("SEATHOLD_EXPIRY_MODE", "Fixed"),
            ("SEATHOLD_SWEEP_INTERVAL_MS", "not-a-number"),
            ("SEATHOLD_SOLVER_MAX_ATTEMPTS", "0"),
        ]);
        let config = HoldConfig::from_lookup(|k| vars.get(k).map(ToString::to_string));

        assert_eq!(config.hold_ttl, Duration::from_secs(120));
        assert_eq!(config.expiry_mode, ExpiryMode::Fixed);
        assert_eq!(config.sweep_interval, Duration::from_millis(1000));
        assert_eq!(config.expiring_window, Duration::from_secs(60));
        assert_eq!(config.solver_max_attempts, 3);
    }

    #[test]
    fn chart_config_parses_with_defaults() {
        let config = ChartConfig::from_json(
            r#"{
                "events": ["concert-1", "concert-2"],
                "session": "continue",
                "selectionValidators": [{ "type": "noOrphanSeats", "mode": "strict" }],
                "maxSelectedObjects": { "total": 4 },
                "availableCategories": ["1"],
                "selectedObjects": [{ "object": "A-1" }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.events.len(), 2);
        assert_eq!(config.session, SessionMode::Continue);
        assert!(config.hold_on_select_for_ga);
        assert_eq!(config.max_selected_objects.total, Some(4));
        assert_eq!(
            config.selection_validators,
            vec![SelectionValidator::NoOrphanSeats {
                mode: OrphanMode::Strict,
                enabled: true
            }]
        );
        assert!(config.selectability.available_categories.is_some());
        assert!(config.selectability.object_without_pricing_selectable);
        assert_eq!(config.selected_objects[0].amount, 1);
    }
}
