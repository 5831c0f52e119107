//! Entity extraction: text -> entity candidates

use super::{value_confidence, value_to_string, ExtractorConfig};
use crate::inference::GenerationClient;
use crate::repair::parse_lenient;
use crate::Result;
use kgraph_core::{Entity, EntityType};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, instrument, warn};

const MODEL_CONFIDENCE_DEFAULT: f32 = 0.7;
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Extracts typed entities from unstructured text
pub struct EntityExtractor {
    llm: Arc<GenerationClient>,
    config: ExtractorConfig,
}

impl EntityExtractor {
    pub fn new(llm: Arc<GenerationClient>) -> Self {
        Self {
            llm,
            config: ExtractorConfig::from_env(),
        }
    }

    pub fn with_config(mut self, config: ExtractorConfig) -> Self {
        self.config = config;
        self
    }

    /// Extract entity candidates from text.
    ///
    /// Never fails across this boundary: a total model failure falls back
    /// to pattern extraction, and an unusable input returns an empty list.
    #[instrument(skip(self, text))]
    pub async fn extract(&self, text: &str) -> Vec<Entity> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // The long-text flag selects the method set; both branches resolve
        // to the model path. Patterns run only on failure.
        let _long_text = text.len() > self.config.long_text_threshold;

        match self.extract_with_model(text).await {
            Ok(entities) => entities,
            Err(e) => {
                warn!("Model entity extraction failed, using pattern fallback: {}", e);
                self.extract_with_patterns(text)
            }
        }
    }

    async fn extract_with_model(&self, text: &str) -> Result<Vec<Entity>> {
        let prompt = self.build_prompt(text);
        let raw = self
            .llm
            .generate(&prompt, self.config.max_tokens, self.config.temperature)
            .await?;

        let value = parse_lenient(&raw).ok_or_else(|| {
            crate::EngineError::Processing(format!("Unparsable entity payload: {}", raw))
        })?;

        let items = value
            .get("entities")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut entities = Vec::new();
        for item in items.iter().take(self.config.max_entities) {
            match parse_entity_item(item, text) {
                Some(entity) => entities.push(entity),
                None => warn!("Dropping malformed entity candidate: {}", item),
            }
        }

        Ok(dedup_overlapping(entities))
    }

    fn build_prompt(&self, text: &str) -> String {
        format!(
            "Return ONLY valid JSON. No markdown, no extra keys.\n\n\
             Schema:\n\
             {{\"entities\":[{{\"name\":string,\"type\":string,\"confidence\":number}}]}}\n\n\
             Rules:\n\
             - type is one of: person, organization, location, event, product, concept, date, money\n\
             - Strings double-quoted, confidence between 0 and 1\n\
             - Max {} entities\n\
             - If unsure, return an empty array\n\n\
             Text:\n{}",
            self.config.max_entities, text
        )
    }

    /// Offline fallback: capitalized word sequences become low-confidence
    /// candidates.
    fn extract_with_patterns(&self, text: &str) -> Vec<Entity> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"\b[A-Z][A-Za-z0-9&.-]*(?:\s+[A-Z][A-Za-z0-9&.-]*)*")
                .expect("Invalid regex pattern")
        });

        let mut entities = Vec::new();
        for m in pattern.find_iter(text) {
            let candidate = m.as_str().trim_end_matches(['.', ',']);
            if candidate.len() < 3 {
                continue;
            }
            entities.push(
                Entity::new(candidate, EntityType::Custom)
                    .with_span(m.start(), m.start() + candidate.len())
                    .with_confidence(FALLBACK_CONFIDENCE),
            );
            if entities.len() >= self.config.max_entities {
                break;
            }
        }

        debug!("Pattern fallback produced {} entity candidates", entities.len());
        dedup_overlapping(entities)
    }
}

/// Validate and coerce one model item; None drops it
fn parse_entity_item(item: &Value, source_text: &str) -> Option<Entity> {
    let name = item
        .get("name")
        .or_else(|| item.get("entity"))
        .or_else(|| item.get("value"))
        .and_then(value_to_string)?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let entity_type = item
        .get("type")
        .or_else(|| item.get("entity_type"))
        .or_else(|| item.get("label"))
        .and_then(value_to_string)
        .map(|label| EntityType::from_label(&label))
        .unwrap_or_default();

    let confidence = value_confidence(item, MODEL_CONFIDENCE_DEFAULT);

    let mut entity = Entity::new(name, entity_type).with_confidence(confidence);
    // Models rarely return offsets; locate the first occurrence ourselves.
    if let Some(start) = source_text.find(name) {
        entity = entity.with_span(start, start + name.len());
    }
    Some(entity)
}

/// Span-overlap dedup: overlapping mentions keep the higher-confidence
/// (then longer-text) one.
fn dedup_overlapping(entities: Vec<Entity>) -> Vec<Entity> {
    let mut kept: Vec<Entity> = Vec::with_capacity(entities.len());

    'outer: for entity in entities {
        for existing in kept.iter_mut() {
            if !entity.span.is_empty()
                && !existing.span.is_empty()
                && entity.span.overlaps(&existing.span)
            {
                let replace = entity.confidence > existing.confidence
                    || (entity.confidence == existing.confidence
                        && entity.text.len() > existing.text.len());
                if replace {
                    *existing = entity;
                }
                continue 'outer;
            }
            // Identical surface forms without spans are duplicates too
            if entity.merge_key() == existing.merge_key() {
                if entity.confidence > existing.confidence {
                    *existing = entity;
                }
                continue 'outer;
            }
        }
        kept.push(entity);
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity_item() {
        let text = "Alice joined Acme Corp in 2020.";
        let item = serde_json::json!({"name": "Acme Corp", "type": "ORG", "confidence": 0.9});
        let entity = parse_entity_item(&item, text).unwrap();

        assert_eq!(entity.text, "Acme Corp");
        assert_eq!(entity.entity_type, EntityType::Organization);
        assert_eq!(entity.confidence, 0.9);
        assert_eq!(entity.span.start, 13);
        assert_eq!(entity.span.end, 22);
    }

    #[test]
    fn test_parse_entity_item_unknown_type_coerced() {
        let item = serde_json::json!({"name": "Widget", "type": "gizmo"});
        let entity = parse_entity_item(&item, "").unwrap();
        assert_eq!(entity.entity_type, EntityType::Custom);
    }

    #[test]
    fn test_parse_entity_item_missing_name_dropped() {
        let item = serde_json::json!({"type": "person"});
        assert!(parse_entity_item(&item, "").is_none());
    }

    #[test]
    fn test_dedup_overlapping_keeps_higher_confidence() {
        let a = Entity::new("Acme", EntityType::Organization)
            .with_span(0, 4)
            .with_confidence(0.6);
        let b = Entity::new("Acme Corp", EntityType::Organization)
            .with_span(0, 9)
            .with_confidence(0.9);

        let kept = dedup_overlapping(vec![a, b]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Acme Corp");
    }

    #[test]
    fn test_dedup_overlapping_ties_prefer_longer() {
        let a = Entity::new("Acme", EntityType::Organization)
            .with_span(0, 4)
            .with_confidence(0.8);
        let b = Entity::new("Acme Corp", EntityType::Organization)
            .with_span(0, 9)
            .with_confidence(0.8);

        let kept = dedup_overlapping(vec![a, b]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "Acme Corp");
    }

    #[test]
    fn test_dedup_disjoint_spans_kept() {
        let a = Entity::new("Alice", EntityType::Person).with_span(0, 5);
        let b = Entity::new("Bob", EntityType::Person).with_span(10, 13);

        let kept = dedup_overlapping(vec![a, b]);
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_text_returns_empty() {
        let extractor = EntityExtractor::new(Arc::new(GenerationClient::new(
            "http://localhost:1",
        )));
        let entities = extractor.extract("   ").await;
        assert!(entities.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_model_falls_back_to_patterns() {
        // Port 1 refuses connections, so the model path fails and the
        // regex fallback runs.
        let extractor = EntityExtractor::new(Arc::new(GenerationClient::new(
            "http://localhost:1",
        )));
        let entities = extractor
            .extract("Alice Johnson works at Acme Corp in Berlin.")
            .await;

        assert!(!entities.is_empty());
        assert!(entities.iter().all(|e| e.confidence <= FALLBACK_CONFIDENCE));
        assert!(entities.iter().any(|e| e.text.contains("Acme")));
    }
}
