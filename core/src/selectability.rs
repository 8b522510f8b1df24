//! Rules deciding whether an object may be selected at all, independent of
//! its hold/booking status.

use crate::chart::{Bookable, BookableObject, ChartLayout};
use crate::types::{CategoryKey, ChannelKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Category, channel and pricing restrictions of one rendering context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SelectabilityRules {
    /// When set, only objects in one of these channels are selectable
    pub channels: Option<BTreeSet<ChannelKey>>,
    /// When set, only objects in these categories are selectable
    pub available_categories: Option<BTreeSet<CategoryKey>>,
    /// Objects in these categories are never selectable
    pub unavailable_categories: BTreeSet<CategoryKey>,
    /// Whether objects without a category can be selected
    pub object_without_category_selectable: bool,
    /// Whether objects whose category has no pricing can be selected
    pub object_without_pricing_selectable: bool,
}

impl Default for SelectabilityRules {
    fn default() -> Self {
        Self {
            channels: None,
            available_categories: None,
            unavailable_categories: BTreeSet::new(),
            object_without_category_selectable: true,
            object_without_pricing_selectable: true,
        }
    }
}

impl SelectabilityRules {
    /// Whether the rules allow selecting `object`
    #[must_use]
    pub fn permits(&self, layout: &ChartLayout, object: &BookableObject) -> bool {
        if let Some(channels) = &self.channels {
            match object.channel() {
                Some(channel) if channels.contains(channel) => {}
                _ => return false,
            }
        }

        let Some(category_key) = object.category() else {
            return self.object_without_category_selectable;
        };

        if self.unavailable_categories.contains(category_key) {
            return false;
        }
        if let Some(available) = &self.available_categories {
            if !available.contains(category_key) {
                return false;
            }
        }
        if !self.object_without_pricing_selectable {
            let priced = layout
                .category(category_key)
                .and_then(|c| c.pricing.as_ref())
                .is_some_and(|p| p.price.is_some() || !p.ticket_types.is_empty());
            if !priced {
                return false;
            }
        }
        true
    }

    /// Rules restricted to the given categories
    #[must_use]
    pub fn with_available_categories(mut self, keys: impl IntoIterator<Item = CategoryKey>) -> Self {
        self.available_categories = Some(keys.into_iter().collect());
        self
    }

    /// Rules restricted to the given channels
    #[must_use]
    pub fn with_channels(mut self, keys: impl IntoIterator<Item = ChannelKey>) -> Self {
        self.channels = Some(keys.into_iter().collect());
        self
    }
}
