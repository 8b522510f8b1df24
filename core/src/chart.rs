//! Chart layout: categories, bookable objects and the rows that give seats
//! their neighbours.
//!
//! The layout is immutable once built. It is shared by the catalog, the
//! validators and the solver; none of them own it.
//!
//! Bookable objects are one tagged type ([`BookableObject`] with an
//! [`ObjectKind`]) exposing a shared capability set through [`Bookable`].
//! Code that needs adjacency asks the layout for the object's row instead
//! of branching on the kind.

use crate::error::ChartDefinitionError;
use crate::types::{
    CategoryKey, ChannelKey, Money, ObjectLabel, RowKey, SectionKey, TicketType,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ============================================================================
// Categories and Pricing
// ============================================================================

/// Price of one ticket type within a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTypePrice {
    /// Ticket type
    pub ticket_type: TicketType,
    /// Price for that ticket type
    pub price: Money,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
}

/// Simple (single price) or multi-level (per ticket type) pricing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pricing {
    /// Single price when the category has no ticket types
    #[serde(default)]
    pub price: Option<Money>,
    /// Prices per ticket type
    #[serde(default)]
    pub ticket_types: Vec<TicketTypePrice>,
}

impl Pricing {
    /// Single-price pricing
    #[must_use]
    pub const fn simple(price: Money) -> Self {
        Self {
            price: Some(price),
            ticket_types: Vec::new(),
        }
    }

    /// Price for the given ticket type, falling back to the single price
    #[must_use]
    pub fn price_for(&self, ticket_type: Option<&TicketType>) -> Option<Money> {
        ticket_type
            .and_then(|tt| {
                self.ticket_types
                    .iter()
                    .find(|p| &p.ticket_type == tt)
                    .map(|p| p.price)
            })
            .or(self.price)
    }
}

/// Grouping with accessibility flag, colour and pricing.
///
/// Immutable once loaded; objects reference categories by key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Category key
    pub key: CategoryKey,
    /// Human readable label
    pub label: String,
    /// Display colour
    #[serde(default)]
    pub color: Option<String>,
    /// Wheelchair / accessibility category
    #[serde(default)]
    pub accessible: bool,
    /// Pricing, if the chart is priced
    #[serde(default)]
    pub pricing: Option<Pricing>,
}

impl Category {
    /// Creates an unpriced category
    #[must_use]
    pub fn new(key: impl Into<CategoryKey>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            color: None,
            accessible: false,
            pricing: None,
        }
    }

    /// Attaches pricing
    #[must_use]
    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Marks the category as accessible
    #[must_use]
    pub const fn accessible(mut self) -> Self {
        self.accessible = true;
        self
    }
}

// ============================================================================
// Bookable Objects
// ============================================================================

/// Variant-specific part of a bookable object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectKind {
    /// Individual seat, usually part of a row
    Seat {
        /// Row the seat belongs to
        row: Option<RowKey>,
    },
    /// Table booked as a whole
    Table {
        /// Number of seats around the table
        seats: u32,
    },
    /// Booth booked as a whole
    Booth,
    /// General admission area, counted rather than enumerated
    GeneralAdmission {
        /// Total number of places
        capacity: u32,
    },
}

/// Optional position of an object on the chart, in chart units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Horizontal coordinate
    pub x: f64,
    /// Vertical coordinate
    pub y: f64,
}

impl Placement {
    /// Euclidean distance to another placement
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A seat, table, booth or GA area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookableObject {
    /// Stable label
    pub label: ObjectLabel,
    /// Variant
    #[serde(flatten)]
    pub kind: ObjectKind,
    /// Category reference
    #[serde(default)]
    pub category: Option<CategoryKey>,
    /// Sales channel
    #[serde(default)]
    pub channel: Option<ChannelKey>,
    /// Enclosing section
    #[serde(default)]
    pub section: Option<SectionKey>,
    /// Position on the chart
    #[serde(default)]
    pub placement: Option<Placement>,
}

/// Capability set shared by every bookable object variant
pub trait Bookable {
    /// Stable label
    fn label(&self) -> &ObjectLabel;

    /// Category reference
    fn category(&self) -> Option<&CategoryKey>;

    /// Sales channel
    fn channel(&self) -> Option<&ChannelKey>;

    /// Number of places the object represents
    fn capacity(&self) -> u32;

    /// Whether places are counted (GA) instead of the object being claimed
    /// as a whole
    fn is_counted(&self) -> bool;
}

impl Bookable for BookableObject {
    fn label(&self) -> &ObjectLabel {
        &self.label
    }

    fn category(&self) -> Option<&CategoryKey> {
        self.category.as_ref()
    }

    fn channel(&self) -> Option<&ChannelKey> {
        self.channel.as_ref()
    }

    fn capacity(&self) -> u32 {
        match self.kind {
            ObjectKind::GeneralAdmission { capacity } => capacity,
            ObjectKind::Seat { .. } | ObjectKind::Table { .. } | ObjectKind::Booth => 1,
        }
    }

    fn is_counted(&self) -> bool {
        matches!(self.kind, ObjectKind::GeneralAdmission { .. })
    }
}

impl BookableObject {
    fn new(label: ObjectLabel, kind: ObjectKind, category: Option<CategoryKey>) -> Self {
        Self {
            label,
            kind,
            category,
            channel: None,
            section: None,
            placement: None,
        }
    }

    /// Row the object belongs to, for seats
    #[must_use]
    pub const fn row(&self) -> Option<&RowKey> {
        match &self.kind {
            ObjectKind::Seat { row } => row.as_ref(),
            _ => None,
        }
    }
}

/// Ordered seats forming a line; neighbours in `seats` are adjacent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Row key
    pub key: RowKey,
    /// Enclosing section
    #[serde(default)]
    pub section: Option<SectionKey>,
    /// Seat labels in physical order
    pub seats: Vec<ObjectLabel>,
}

// ============================================================================
// Chart Definition (serde) and Layout
// ============================================================================

/// Seat entry inside a row definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatDefinition {
    /// Seat label
    pub label: ObjectLabel,
    /// Overrides the row category
    #[serde(default)]
    pub category: Option<CategoryKey>,
    /// Sales channel
    #[serde(default)]
    pub channel: Option<ChannelKey>,
    /// Position on the chart
    #[serde(default)]
    pub placement: Option<Placement>,
}

/// Row entry of a chart definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowDefinition {
    /// Row key
    pub key: RowKey,
    /// Enclosing section
    #[serde(default)]
    pub section: Option<SectionKey>,
    /// Category applied to every seat without its own
    #[serde(default)]
    pub category: Option<CategoryKey>,
    /// Seats in physical order
    pub seats: Vec<SeatDefinition>,
}

/// Serialisable description of a chart
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartDefinition {
    /// Categories in declaration (priority) order
    #[serde(default)]
    pub categories: Vec<Category>,
    /// Rows of seats
    #[serde(default)]
    pub rows: Vec<RowDefinition>,
    /// Tables, booths and GA areas
    #[serde(default)]
    pub objects: Vec<BookableObject>,
}

/// Immutable, indexed chart layout
#[derive(Debug, Clone)]
pub struct ChartLayout {
    categories: Vec<Category>,
    objects: Vec<BookableObject>,
    rows: Vec<Row>,
    index: HashMap<ObjectLabel, usize>,
    category_index: HashMap<CategoryKey, usize>,
    seat_positions: HashMap<ObjectLabel, (usize, usize)>,
}

impl ChartLayout {
    /// Parses and validates a JSON chart definition
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the chart is inconsistent.
    pub fn from_json(json: &str) -> Result<Self, ChartDefinitionError> {
        let definition: ChartDefinition = serde_json::from_str(json)?;
        Self::from_definition(definition)
    }

    /// Validates and indexes a chart definition
    ///
    /// # Errors
    ///
    /// Returns error on duplicate labels, unknown categories, zero-capacity GA
    /// areas, duplicate ticket type prices or seats declared outside rows.
    pub fn from_definition(definition: ChartDefinition) -> Result<Self, ChartDefinitionError> {
        let ChartDefinition {
            categories,
            rows: row_definitions,
            objects: standalone,
        } = definition;

        let mut category_index = HashMap::new();
        for (i, category) in categories.iter().enumerate() {
            category_index.insert(category.key.clone(), i);
            if let Some(pricing) = &category.pricing {
                let mut seen = HashSet::new();
                for price in &pricing.ticket_types {
                    if !seen.insert(&price.ticket_type) {
                        return Err(ChartDefinitionError::DuplicateTicketType {
                            category: category.key.clone(),
                            ticket_type: price.ticket_type.clone(),
                        });
                    }
                }
            }
        }

        let mut objects = Vec::new();
        let mut rows = Vec::with_capacity(row_definitions.len());
        let mut seat_positions = HashMap::new();

        for (row_idx, row_def) in row_definitions.into_iter().enumerate() {
            let mut labels = Vec::with_capacity(row_def.seats.len());
            for (position, seat) in row_def.seats.into_iter().enumerate() {
                let mut object = BookableObject::new(
                    seat.label.clone(),
                    ObjectKind::Seat {
                        row: Some(row_def.key.clone()),
                    },
                    seat.category.or_else(|| row_def.category.clone()),
                );
                object.channel = seat.channel;
                object.section.clone_from(&row_def.section);
                object.placement = seat.placement;
                seat_positions.insert(seat.label.clone(), (row_idx, position));
                labels.push(seat.label);
                objects.push(object);
            }
            rows.push(Row {
                key: row_def.key,
                section: row_def.section,
                seats: labels,
            });
        }

        for object in standalone {
            match &object.kind {
                ObjectKind::Seat { row: Some(row) } => {
                    return Err(ChartDefinitionError::InvalidRow {
                        row: row.clone(),
                        reason: format!("seat '{}' must be declared inside its row", object.label),
                    });
                }
                ObjectKind::GeneralAdmission { capacity: 0 } => {
                    return Err(ChartDefinitionError::ZeroCapacity(object.label.clone()));
                }
                _ => objects.push(object),
            }
        }

        let mut index = HashMap::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            if index.insert(object.label.clone(), i).is_some() {
                return Err(ChartDefinitionError::DuplicateLabel(object.label.clone()));
            }
            if let Some(category) = &object.category {
                if !category_index.contains_key(category) {
                    return Err(ChartDefinitionError::UnknownCategory {
                        object: object.label.clone(),
                        category: category.clone(),
                    });
                }
            }
        }

        Ok(Self {
            categories,
            objects,
            rows,
            index,
            category_index,
            seat_positions,
        })
    }

    /// Looks up an object by label
    #[must_use]
    pub fn object(&self, label: &ObjectLabel) -> Option<&BookableObject> {
        self.index.get(label).map(|&i| &self.objects[i])
    }

    /// All objects in declaration order
    #[must_use]
    pub fn objects(&self) -> &[BookableObject] {
        &self.objects
    }

    /// Declaration index of an object, used for deterministic tie breaks
    #[must_use]
    pub fn declaration_index(&self, label: &ObjectLabel) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// All categories in declaration order
    #[must_use]
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Looks up a category by key
    #[must_use]
    pub fn category(&self, key: &CategoryKey) -> Option<&Category> {
        self.category_index.get(key).map(|&i| &self.categories[i])
    }

    /// Category of an object, resolved
    #[must_use]
    pub fn category_of(&self, object: &BookableObject) -> Option<&Category> {
        object.category.as_ref().and_then(|key| self.category(key))
    }

    /// All rows in declaration order
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Row of a seat and the seat's position within it
    #[must_use]
    pub fn row_position(&self, label: &ObjectLabel) -> Option<(&Row, usize)> {
        self.seat_positions
            .get(label)
            .map(|&(row, position)| (&self.rows[row], position))
    }

    /// Price of an object for the given ticket type
    #[must_use]
    pub fn price_of(&self, object: &BookableObject, ticket_type: Option<&TicketType>) -> Option<Money> {
        self.category_of(object)
            .and_then(|c| c.pricing.as_ref())
            .and_then(|p| p.price_for(ticket_type))
    }

    /// Distinct sections, in first-seen order
    #[must_use]
    pub fn sections(&self) -> Vec<&SectionKey> {
        let mut seen = HashSet::new();
        self.objects
            .iter()
            .filter_map(|o| o.section.as_ref())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Centroid of all placed objects, if any object has a placement
    #[must_use]
    pub fn center(&self) -> Option<Placement> {
        centroid(self.objects.iter().filter_map(|o| o.placement))
    }
}

/// Centroid of a set of placements
#[must_use]
pub fn centroid(placements: impl Iterator<Item = Placement>) -> Option<Placement> {
    let (mut x, mut y, mut n) = (0.0, 0.0, 0_u32);
    for p in placements {
        x += p.x;
        y += p.y;
        n += 1;
    }
    (n > 0).then(|| Placement {
        x: x / f64::from(n),
        y: y / f64::from(n),
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Fluent builder for charts assembled in code
///
/// # Example
///
/// ```
/// use seathold_core::chart::{Category, ChartBuilder};
///
/// let chart = ChartBuilder::new()
///     .category(Category::new("A", "Stalls"))
///     .row("A", "A", &["A-1", "A-2", "A-3"])
///     .general_admission("Floor", "A", 200)
///     .build()
///     .unwrap();
/// assert_eq!(chart.objects().len(), 4);
/// ```
#[derive(Debug, Default)]
pub struct ChartBuilder {
    definition: ChartDefinition,
    section: Option<SectionKey>,
}

impl ChartBuilder {
    /// Starts an empty chart
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a category
    #[must_use]
    pub fn category(mut self, category: Category) -> Self {
        self.definition.categories.push(category);
        self
    }

    /// Puts subsequently added rows and objects in a section
    #[must_use]
    pub fn section(mut self, key: impl Into<SectionKey>) -> Self {
        self.section = Some(key.into());
        self
    }

    /// Adds a row of seats sharing one category
    #[must_use]
    pub fn row(mut self, key: impl Into<RowKey>, category: impl Into<CategoryKey>, seats: &[&str]) -> Self {
        let category = category.into();
        self.definition.rows.push(RowDefinition {
            key: key.into(),
            section: self.section.clone(),
            category: Some(category),
            seats: seats
                .iter()
                .map(|label| SeatDefinition {
                    label: ObjectLabel::from(*label),
                    category: None,
                    channel: None,
                    placement: None,
                })
                .collect(),
        });
        self
    }

    /// Adds a row from a full definition (per-seat categories, channels, placements)
    #[must_use]
    pub fn row_definition(mut self, mut row: RowDefinition) -> Self {
        if row.section.is_none() {
            row.section.clone_from(&self.section);
        }
        self.definition.rows.push(row);
        self
    }

    /// Adds a table booked as a whole
    #[must_use]
    pub fn table(self, label: &str, category: impl Into<CategoryKey>, seats: u32) -> Self {
        self.standalone(label, ObjectKind::Table { seats }, Some(category.into()))
    }

    /// Adds a booth
    #[must_use]
    pub fn booth(self, label: &str, category: impl Into<CategoryKey>) -> Self {
        self.standalone(label, ObjectKind::Booth, Some(category.into()))
    }

    /// Adds a general admission area
    #[must_use]
    pub fn general_admission(self, label: &str, category: impl Into<CategoryKey>, capacity: u32) -> Self {
        self.standalone(
            label,
            ObjectKind::GeneralAdmission { capacity },
            Some(category.into()),
        )
    }

    /// Adds an object that has no category
    #[must_use]
    pub fn uncategorized(self, label: &str, kind: ObjectKind) -> Self {
        self.standalone(label, kind, None)
    }

    /// Assigns a sales channel to an already declared object
    #[must_use]
    pub fn channel(mut self, label: &str, channel: impl Into<ChannelKey>) -> Self {
        let channel = channel.into();
        for row in &mut self.definition.rows {
            for seat in &mut row.seats {
                if seat.label.as_str() == label {
                    seat.channel = Some(channel.clone());
                }
            }
        }
        for object in &mut self.definition.objects {
            if object.label.as_str() == label {
                object.channel = Some(channel.clone());
            }
        }
        self
    }

    fn standalone(mut self, label: &str, kind: ObjectKind, category: Option<CategoryKey>) -> Self {
        let mut object = BookableObject::new(ObjectLabel::from(label), kind, category);
        object.section.clone_from(&self.section);
        self.definition.objects.push(object);
        self
    }

    /// Returns the definition built so far
    #[must_use]
    pub fn into_definition(self) -> ChartDefinition {
        self.definition
    }

    /// Validates and builds the layout
    ///
    /// # Errors
    ///
    /// See [`ChartLayout::from_definition`].
    pub fn build(self) -> Result<ChartLayout, ChartDefinitionError> {
        ChartLayout::from_definition(self.definition)
    }
}
