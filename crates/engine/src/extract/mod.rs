//! Extraction pipeline: text (+ prior entities) -> typed candidate records.
//!
//! The three extractors share one skeleton: build a prompt, call the
//! text-generation collaborator for a JSON object with a single wrapper
//! key, parse defensively (strict, then repaired), validate and coerce
//! each item, deduplicate. Regex extraction exists only as the fallback
//! path when the model call fails or returns unparsable output.

pub mod attribute;
pub mod entity;
pub mod relation;

pub use attribute::{AttributeExtractor, AttributeMode};
pub use entity::EntityExtractor;
pub use relation::RelationExtractor;

use serde_json::Value;

/// Shared tuning for the extractors, read from the environment with
/// compiled defaults.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Inputs longer than this are treated as "long". The flag selects
    /// the extraction method set; today every branch resolves to the
    /// model-based method.
    pub long_text_threshold: usize,
    pub max_entities: usize,
    pub max_relations: usize,
    pub max_attributes: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            long_text_threshold: 2000,
            max_entities: 30,
            max_relations: 15,
            max_attributes: 20,
            max_tokens: 512,
            temperature: 0.1,
        }
    }
}

impl ExtractorConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = env_usize("EXTRACT_MAX_ENTITIES") {
            config.max_entities = value;
        }
        if let Some(value) = env_usize("EXTRACT_MAX_RELATIONSHIPS") {
            config.max_relations = value;
        }
        if let Some(value) = env_usize("EXTRACT_MAX_ATTRIBUTES") {
            config.max_attributes = value;
        }
        if let Some(value) = env_usize("EXTRACT_LONG_TEXT_THRESHOLD") {
            config.long_text_threshold = value;
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
}

/// Lenient scalar-to-string coercion for model output values
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(arr) => arr.first().and_then(value_to_string),
        Value::Object(obj) => obj
            .get("name")
            .or_else(|| obj.get("value"))
            .and_then(value_to_string),
        _ => None,
    }
}

/// Lenient confidence lookup, clamped; items without one get the default
pub(crate) fn value_confidence(item: &Value, default: f32) -> f32 {
    item.get("confidence")
        .and_then(|v| v.as_f64())
        .map(|c| c as f32)
        .unwrap_or(default)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_string_coercions() {
        assert_eq!(value_to_string(&serde_json::json!("x")), Some("x".into()));
        assert_eq!(value_to_string(&serde_json::json!(3)), Some("3".into()));
        assert_eq!(
            value_to_string(&serde_json::json!(["a", "b"])),
            Some("a".into())
        );
        assert_eq!(
            value_to_string(&serde_json::json!({"name": "n"})),
            Some("n".into())
        );
        assert_eq!(value_to_string(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_value_confidence() {
        assert_eq!(
            value_confidence(&serde_json::json!({"confidence": 0.8}), 0.5),
            0.8
        );
        assert_eq!(value_confidence(&serde_json::json!({}), 0.5), 0.5);
        assert_eq!(
            value_confidence(&serde_json::json!({"confidence": 7.0}), 0.5),
            1.0
        );
    }
}
