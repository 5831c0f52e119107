//! Entity types - the typed mentions extracted from text

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The type/classification of an entity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A person
    Person,
    /// An organization or company
    Organization,
    /// A location or place
    Location,
    /// An event
    Event,
    /// A product
    Product,
    /// A concept or idea
    Concept,
    /// A date or time period
    Date,
    /// A monetary amount
    Money,
    /// Anything the model labels that we don't recognize
    Custom,
}

impl Default for EntityType {
    fn default() -> Self {
        Self::Custom
    }
}

impl EntityType {
    /// Map a free-form model label onto a variant.
    ///
    /// Unrecognized labels become `Custom` - never an error.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "PERSON" | "PER" | "PEOPLE" => Self::Person,
            "ORGANIZATION" | "ORG" | "COMPANY" => Self::Organization,
            "LOCATION" | "LOC" | "GPE" | "PLACE" => Self::Location,
            "EVENT" => Self::Event,
            "PRODUCT" => Self::Product,
            "CONCEPT" | "IDEA" | "TOPIC" => Self::Concept,
            "DATE" | "TIME" => Self::Date,
            "MONEY" | "CURRENCY" => Self::Money,
            _ => Self::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Location => "location",
            Self::Event => "event",
            Self::Product => "product",
            Self::Concept => "concept",
            Self::Date => "date",
            Self::Money => "money",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Character offsets of a mention in its source text
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Whether two spans share any character offset
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An entity extracted from text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Surface form as it appeared in the text
    pub text: String,

    /// The type of entity
    #[serde(default)]
    pub entity_type: EntityType,

    /// Character offsets in the source text
    #[serde(default)]
    pub span: Span,

    /// Confidence score (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f32,

    /// Canonical/normalized name - the merge key for deduplication
    #[serde(default)]
    pub canonical_form: String,

    /// Alternate surface forms collected during merging
    #[serde(default)]
    pub aliases: BTreeSet<String>,
}

impl Entity {
    /// Create a new entity
    pub fn new(text: impl Into<String>, entity_type: EntityType) -> Self {
        let text = text.into();
        let canonical = Self::canonicalize(&text);
        Self {
            text,
            entity_type,
            span: Span::default(),
            confidence: 0.5,
            canonical_form: canonical,
            aliases: BTreeSet::new(),
        }
    }

    /// Canonicalize a surface form: collapse whitespace, keep casing
    pub fn canonicalize(name: &str) -> String {
        name.trim()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Case-insensitive merge key
    pub fn merge_key(&self) -> String {
        self.canonical_form.to_lowercase()
    }

    /// Builder: set span
    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Span::new(start, end);
        self
    }

    /// Builder: set confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Builder: override the canonical form
    pub fn with_canonical(mut self, canonical: impl Into<String>) -> Self {
        self.canonical_form = canonical.into();
        self
    }

    /// Builder: add an alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }
}
