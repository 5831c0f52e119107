//! Attribute extraction: text + entities -> per-entity key/value facts
//!
//! Unlike the other extractors, attributes support a pure pattern mode
//! (regex over a window around the entity mention) for well-known
//! attribute names, and a hybrid mode that merges pattern and model
//! results preferring the higher-confidence value per name.

use super::{value_confidence, value_to_string, ExtractorConfig};
use crate::inference::GenerationClient;
use crate::repair::parse_lenient;
use crate::Result;
use kgraph_core::{Attribute, Entity};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{instrument, warn};

const MODEL_CONFIDENCE_DEFAULT: f32 = 0.6;
const PATTERN_CONFIDENCE: f32 = 0.75;

/// Characters of context on each side of the entity mention that the
/// pattern mode scans
const PATTERN_WINDOW: usize = 100;

/// How attributes are extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeMode {
    /// Regex patterns only; no model call
    Pattern,
    /// Model call, with patterns as the failure fallback
    Model,
    /// Both, merged per attribute name by confidence
    Hybrid,
}

/// Extracts attributes for previously found entities
pub struct AttributeExtractor {
    llm: Arc<GenerationClient>,
    config: ExtractorConfig,
    mode: AttributeMode,
}

impl AttributeExtractor {
    pub fn new(llm: Arc<GenerationClient>) -> Self {
        Self {
            llm,
            config: ExtractorConfig::from_env(),
            mode: AttributeMode::Hybrid,
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_mode(mut self, mode: AttributeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Extract attributes, keyed by entity text.
    ///
    /// Never fails across this boundary; a total model failure degrades
    /// to pattern-only output.
    #[instrument(skip(self, text, entities))]
    pub async fn extract(
        &self,
        text: &str,
        entities: &[Entity],
    ) -> HashMap<String, Vec<Attribute>> {
        if text.trim().is_empty() || entities.is_empty() {
            return HashMap::new();
        }

        match self.mode {
            AttributeMode::Pattern => extract_with_patterns(text, entities),
            AttributeMode::Model => match self.extract_with_model(text, entities).await {
                Ok(attributes) => attributes,
                Err(e) => {
                    warn!("Model attribute extraction failed, using pattern fallback: {}", e);
                    extract_with_patterns(text, entities)
                }
            },
            AttributeMode::Hybrid => {
                let pattern_attrs = extract_with_patterns(text, entities);
                match self.extract_with_model(text, entities).await {
                    Ok(model_attrs) => merge_attributes(pattern_attrs, model_attrs),
                    Err(e) => {
                        warn!("Model attribute extraction failed, keeping pattern results: {}", e);
                        pattern_attrs
                    }
                }
            }
        }
    }

    async fn extract_with_model(
        &self,
        text: &str,
        entities: &[Entity],
    ) -> Result<HashMap<String, Vec<Attribute>>> {
        let prompt = self.build_prompt(text, entities);
        let raw = self
            .llm
            .generate(&prompt, self.config.max_tokens, self.config.temperature)
            .await?;

        let value = parse_lenient(&raw).ok_or_else(|| {
            crate::EngineError::Processing(format!("Unparsable attribute payload: {}", raw))
        })?;

        let items = value
            .get("attributes")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let known: HashMap<String, &Entity> = entities
            .iter()
            .map(|e| (e.merge_key(), e))
            .collect();

        let mut result: HashMap<String, Vec<Attribute>> = HashMap::new();
        for item in items.iter().take(self.config.max_attributes) {
            match parse_attribute_item(item, &known) {
                Some((entity_text, attribute)) => {
                    result.entry(entity_text).or_default().push(attribute)
                }
                None => warn!("Dropping malformed attribute candidate: {}", item),
            }
        }

        Ok(result)
    }

    fn build_prompt(&self, text: &str, entities: &[Entity]) -> String {
        let listing = entities
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Return ONLY valid JSON. No markdown, no extra keys.\n\n\
             Schema:\n\
             {{\"attributes\":[{{\"entity\":string,\"name\":string,\"value\":string,\"confidence\":number}}]}}\n\n\
             Rules:\n\
             - entity must be one of: {}\n\
             - name is a short lowercase attribute name (e.g. founded, revenue, location)\n\
             - Max {} attributes\n\
             - If unsure, return an empty array\n\n\
             Text:\n{}",
            listing, self.config.max_attributes, text
        )
    }
}

/// Validate and coerce one model item; None drops it
fn parse_attribute_item(
    item: &Value,
    known: &HashMap<String, &Entity>,
) -> Option<(String, Attribute)> {
    let entity_name = item
        .get("entity")
        .or_else(|| item.get("entity_name"))
        .and_then(value_to_string)?;
    let entity = known.get(&Entity::canonicalize(&entity_name).to_lowercase())?;

    let name = item.get("name").and_then(value_to_string)?;
    let value = item.get("value").and_then(value_to_string)?;
    if name.trim().is_empty() || value.trim().is_empty() {
        return None;
    }

    let confidence = value_confidence(item, MODEL_CONFIDENCE_DEFAULT);
    let attribute = Attribute::new(name, value).with_confidence(confidence);

    Some((entity.text.clone(), attribute))
}

/// The well-known attribute patterns scanned in pattern mode.
///
/// Each captures the value in group 1.
fn known_patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("age", r"(?i)\b(?:aged?\s*:?\s*|is\s+)(\d{1,3})\s+years?\s+old"),
            ("founded", r"(?i)\bfounded\s+(?:in\s+)?(\d{4})"),
            ("location", r"(?i)\b(?:located|based|headquartered)\s+in\s+([A-Z][A-Za-z ]{1,40}?)(?:[,.;]|$)"),
            ("size", r"(?i)\b([\d,]+)\s+(?:employees|people|staff)"),
            ("revenue", r"(?i)\brevenue\s+of\s+(\$?[\d,.]+\s*(?:million|billion|[mb])?)"),
            ("email", r"([A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})"),
            ("phone", r"(\+?\d[\d\s().-]{8,}\d)"),
            ("url", r"(https?://[^\s,;]+)"),
        ]
        .into_iter()
        .map(|(name, pattern)| (name, Regex::new(pattern).expect("Invalid regex pattern")))
        .collect()
    })
}

/// Pattern mode: scan a window around each entity mention for the
/// well-known attribute names.
fn extract_with_patterns(text: &str, entities: &[Entity]) -> HashMap<String, Vec<Attribute>> {
    let mut result: HashMap<String, Vec<Attribute>> = HashMap::new();

    for entity in entities {
        let window = mention_window(text, entity);
        if window.is_empty() {
            continue;
        }

        let mut found: Vec<Attribute> = Vec::new();
        for (name, pattern) in known_patterns() {
            if let Some(caps) = pattern.captures(window) {
                if let Some(value) = caps.get(1) {
                    found.push(
                        Attribute::new(*name, value.as_str().trim())
                            .with_confidence(PATTERN_CONFIDENCE)
                            .with_source(window.trim().to_string()),
                    );
                }
            }
        }

        if !found.is_empty() {
            result.insert(entity.text.clone(), found);
        }
    }

    result
}

/// The 100-character window around the entity's mention; falls back to a
/// text search when the span is unset.
fn mention_window<'a>(text: &'a str, entity: &Entity) -> &'a str {
    let (start, end) = if !entity.span.is_empty() && entity.span.end <= text.len() {
        (entity.span.start, entity.span.end)
    } else {
        match text.find(entity.text.as_str()) {
            Some(pos) => (pos, pos + entity.text.len()),
            None => return "",
        }
    };

    let from = start.saturating_sub(PATTERN_WINDOW);
    let to = (end + PATTERN_WINDOW).min(text.len());
    // Snap to char boundaries; spans come from byte offsets
    let from = (0..=from).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
    let to = (to..=text.len()).find(|i| text.is_char_boundary(*i)).unwrap_or(text.len());
    &text[from..to]
}

/// Merge two attribute maps, preferring the higher-confidence value per
/// attribute name.
fn merge_attributes(
    base: HashMap<String, Vec<Attribute>>,
    other: HashMap<String, Vec<Attribute>>,
) -> HashMap<String, Vec<Attribute>> {
    let mut merged = base;

    for (entity_text, attributes) in other {
        let existing = merged.entry(entity_text).or_default();
        for attribute in attributes {
            match existing.iter_mut().find(|a| a.name == attribute.name) {
                Some(current) => {
                    if attribute.confidence > current.confidence {
                        *current = attribute;
                    }
                }
                None => existing.push(attribute),
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::{AttributeType, EntityType};

    #[test]
    fn test_pattern_extraction_founded_and_location() {
        let text = "Acme Corp was founded in 1999 and is headquartered in Berlin, Germany.";
        let entities = vec![Entity::new("Acme Corp", EntityType::Organization)];

        let attrs = extract_with_patterns(text, &entities);
        let acme = attrs.get("Acme Corp").unwrap();

        let founded = acme.iter().find(|a| a.name == "founded").unwrap();
        assert_eq!(founded.normalized_value, "1999-01-01");
        assert_eq!(founded.attr_type, AttributeType::Date);

        let location = acme.iter().find(|a| a.name == "location").unwrap();
        assert_eq!(location.normalized_value, "Berlin");
    }

    #[test]
    fn test_pattern_extraction_contact_fields() {
        let text = "Reach Acme at info@acme.example or call (555) 123-4567.";
        let entities = vec![Entity::new("Acme", EntityType::Organization)];

        let attrs = extract_with_patterns(text, &entities);
        let acme = attrs.get("Acme").unwrap();

        let email = acme.iter().find(|a| a.name == "email").unwrap();
        assert_eq!(email.normalized_value, "info@acme.example");
        assert_eq!(email.attr_type, AttributeType::Email);

        let phone = acme.iter().find(|a| a.name == "phone").unwrap();
        assert_eq!(phone.normalized_value, "555-123-4567");
        assert_eq!(phone.attr_type, AttributeType::Phone);
    }

    #[test]
    fn test_pattern_window_respects_distance() {
        // The founding year sits far beyond the 100-char window around Acme
        let filler = "x".repeat(300);
        let text = format!("Acme is a company. {} It was founded in 1999.", filler);
        let entities = vec![Entity::new("Acme", EntityType::Organization)];

        let attrs = extract_with_patterns(&text, &entities);
        assert!(attrs.get("Acme").is_none());
    }

    #[test]
    fn test_merge_prefers_higher_confidence() {
        let mut base = HashMap::new();
        base.insert(
            "Acme".to_string(),
            vec![Attribute::new("founded", "1999").with_confidence(0.75)],
        );
        let mut other = HashMap::new();
        other.insert(
            "Acme".to_string(),
            vec![
                Attribute::new("founded", "2001").with_confidence(0.5),
                Attribute::new("revenue", "10 million").with_confidence(0.6),
            ],
        );

        let merged = merge_attributes(base, other);
        let acme = merged.get("Acme").unwrap();
        assert_eq!(acme.len(), 2);

        let founded = acme.iter().find(|a| a.name == "founded").unwrap();
        assert_eq!(founded.value, "1999");
    }

    #[test]
    fn test_parse_attribute_item_unknown_entity_dropped() {
        let entities = vec![Entity::new("Acme", EntityType::Organization)];
        let known: HashMap<String, &Entity> =
            entities.iter().map(|e| (e.merge_key(), e)).collect();

        let item = serde_json::json!({"entity": "Ghost", "name": "founded", "value": "1999"});
        assert!(parse_attribute_item(&item, &known).is_none());

        let item = serde_json::json!({"entity": "acme", "name": "founded", "value": "1999"});
        let (entity_text, attr) = parse_attribute_item(&item, &known).unwrap();
        assert_eq!(entity_text, "Acme");
        assert_eq!(attr.normalized_value, "1999-01-01");
    }

    #[tokio::test]
    async fn test_pattern_mode_makes_no_model_call() {
        // Port 1 refuses connections; pattern mode must not care.
        let extractor = AttributeExtractor::new(Arc::new(GenerationClient::new(
            "http://localhost:1",
        )))
        .with_mode(AttributeMode::Pattern);

        let entities = vec![Entity::new("Acme", EntityType::Organization)];
        let attrs = extractor
            .extract("Acme was founded in 1999.", &entities)
            .await;
        assert!(attrs.contains_key("Acme"));
    }

    #[tokio::test]
    async fn test_hybrid_mode_survives_model_failure() {
        let extractor = AttributeExtractor::new(Arc::new(GenerationClient::new(
            "http://localhost:1",
        )))
        .with_mode(AttributeMode::Hybrid);

        let entities = vec![Entity::new("Acme", EntityType::Organization)];
        let attrs = extractor
            .extract("Acme was founded in 1999.", &entities)
            .await;
        assert!(attrs.contains_key("Acme"));
    }
}
