//! Relation types - directed connections between two entities

use crate::Entity;
use serde::{Deserialize, Serialize};

/// Types of relationships between entities
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// Subject is a kind of object
    IsA,
    /// Subject is a part of object
    PartOf,
    /// Subject is located in object
    LocatedIn,
    /// Subject works for object
    WorksFor,
    /// Subject owns object
    Owns,
    /// Subject was created by object
    CreatedBy,
    /// Subject happened at object
    HappenedAt,
    /// Subject was caused by object
    CausedBy,
    /// Subject is similar to object
    SimilarTo,
    /// Generic relatedness
    RelatesTo,
    /// Subject depends on object
    DependsOn,
    /// Anything the model labels that we don't recognize
    Custom,
}

impl Default for RelationType {
    fn default() -> Self {
        Self::RelatesTo
    }
}

impl RelationType {
    /// Map a free-form predicate label onto a variant.
    ///
    /// Unrecognized labels become `RelatesTo` - never an error.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .trim()
            .to_ascii_uppercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "ISA" | "TYPEOF" | "INSTANCEOF" => Self::IsA,
            "PARTOF" | "MEMBEROF" | "BELONGSTO" => Self::PartOf,
            "LOCATEDIN" | "LOCATEDAT" | "BASEDIN" => Self::LocatedIn,
            "WORKSFOR" | "WORKSAT" | "EMPLOYEDBY" => Self::WorksFor,
            "OWNS" | "OWNEDBY" => Self::Owns,
            "CREATEDBY" | "FOUNDEDBY" | "MADEBY" => Self::CreatedBy,
            "HAPPENEDAT" | "OCCURREDAT" => Self::HappenedAt,
            "CAUSEDBY" | "CAUSES" => Self::CausedBy,
            "SIMILARTO" | "LIKE" => Self::SimilarTo,
            "RELATESTO" | "RELATEDTO" | "ASSOCIATEDWITH" => Self::RelatesTo,
            "DEPENDSON" | "REQUIRES" | "USES" => Self::DependsOn,
            "" => Self::RelatesTo,
            _ => Self::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsA => "is_a",
            Self::PartOf => "part_of",
            Self::LocatedIn => "located_in",
            Self::WorksFor => "works_for",
            Self::Owns => "owns",
            Self::CreatedBy => "created_by",
            Self::HappenedAt => "happened_at",
            Self::CausedBy => "caused_by",
            Self::SimilarTo => "similar_to",
            Self::RelatesTo => "relates_to",
            Self::DependsOn => "depends_on",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed relation between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// The "from" entity
    pub subject: Entity,

    /// The "to" entity
    pub object: Entity,

    /// Free-text predicate as the model produced it
    pub predicate: String,

    /// Normalized relation type
    #[serde(default)]
    pub relation_type: RelationType,

    /// Confidence score (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f32,

    /// Supporting text snippet
    #[serde(default)]
    pub context: String,

    /// Open key/value properties
    #[serde(default)]
    pub properties: serde_json::Value,

    /// Temporal qualifiers (e.g. since/until)
    #[serde(default)]
    pub temporal_info: serde_json::Value,
}

impl Relation {
    /// Create a new relation; the type is derived from the predicate
    pub fn new(subject: Entity, object: Entity, predicate: impl Into<String>) -> Self {
        let predicate = predicate.into();
        let relation_type = RelationType::from_label(&predicate);
        Self {
            subject,
            object,
            predicate,
            relation_type,
            confidence: 0.5,
            context: String::new(),
            properties: serde_json::Value::Null,
            temporal_info: serde_json::Value::Null,
        }
    }

    /// Whether subject and object resolve to the same node
    pub fn is_self_relation(&self) -> bool {
        self.subject.merge_key() == self.object.merge_key()
    }

    /// Deduplication key: (subject, object, type)
    pub fn dedup_key(&self) -> (String, String, RelationType) {
        (
            self.subject.merge_key(),
            self.object.merge_key(),
            self.relation_type,
        )
    }

    /// Builder: override the relation type
    pub fn with_type(mut self, relation_type: RelationType) -> Self {
        self.relation_type = relation_type;
        self
    }

    /// Builder: set confidence
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Builder: set supporting context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Builder: set properties
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityType;

    #[test]
    fn test_relation_creation() {
        let subject = Entity::new("Alice", EntityType::Person);
        let object = Entity::new("Acme Corp", EntityType::Organization);
        let relation = Relation::new(subject, object, "works_for").with_confidence(0.85);

        assert_eq!(relation.relation_type, RelationType::WorksFor);
        assert_eq!(relation.confidence, 0.85);
        assert!(!relation.is_self_relation());
    }

    #[test]
    fn test_self_relation_detected() {
        let a = Entity::new("OpenAI", EntityType::Organization);
        let b = Entity::new("openai", EntityType::Organization);
        let relation = Relation::new(a, b, "similar_to");

        assert!(relation.is_self_relation());
    }

    #[test]
    fn test_type_from_label() {
        assert_eq!(RelationType::from_label("works for"), RelationType::WorksFor);
        assert_eq!(RelationType::from_label("IS-A"), RelationType::IsA);
        assert_eq!(RelationType::from_label("frobnicates"), RelationType::Custom);
        assert_eq!(RelationType::from_label(""), RelationType::RelatesTo);
    }

    #[test]
    fn test_relation_type_display() {
        assert_eq!(RelationType::WorksFor.to_string(), "works_for");
        assert_eq!(RelationType::RelatesTo.to_string(), "relates_to");
    }
}
