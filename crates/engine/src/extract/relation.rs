//! Relation extraction: text + prior entities -> relation candidates

use super::{value_confidence, value_to_string, ExtractorConfig};
use crate::inference::GenerationClient;
use crate::repair::parse_lenient;
use crate::Result;
use kgraph_core::{Entity, Relation, RelationType};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const MODEL_CONFIDENCE_DEFAULT: f32 = 0.6;
const FALLBACK_CONFIDENCE: f32 = 0.2;

/// Extracts typed relations between previously found entities
pub struct RelationExtractor {
    llm: Arc<GenerationClient>,
    config: ExtractorConfig,
}

impl RelationExtractor {
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

    /// Extract relation candidates between the given entities.
    ///
    /// Never fails across this boundary: a total model failure falls back
    /// to sentence co-occurrence, and fewer than two entities yield an
    /// empty list.
    #[instrument(skip(self, text, entities))]
    pub async fn extract(&self, text: &str, entities: &[Entity]) -> Vec<Relation> {
        if text.trim().is_empty() || entities.len() < 2 {
            return Vec::new();
        }

        let _long_text = text.len() > self.config.long_text_threshold;

        match self.extract_with_model(text, entities).await {
            Ok(relations) => relations,
            Err(e) => {
                warn!("Model relation extraction failed, using co-occurrence fallback: {}", e);
                self.extract_with_cooccurrence(text, entities)
            }
        }
    }

    async fn extract_with_model(&self, text: &str, entities: &[Entity]) -> Result<Vec<Relation>> {
        let prompt = self.build_prompt(text, entities);
        let raw = self
            .llm
            .generate(&prompt, self.config.max_tokens, self.config.temperature)
            .await?;

        let value = parse_lenient(&raw).ok_or_else(|| {
            crate::EngineError::Processing(format!("Unparsable relation payload: {}", raw))
        })?;

        let items = value
            .get("relations")
            .or_else(|| value.get("relationships"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let by_name = index_entities(entities);
        let mut relations = Vec::new();
        for item in items.iter().take(self.config.max_relations) {
            match parse_relation_item(item, entities, &by_name) {
                Some(relation) if relation.is_self_relation() => {
                    debug!("Discarding self-relation on {}", relation.subject.text);
                }
                Some(relation) => relations.push(relation),
                None => warn!("Dropping malformed relation candidate: {}", item),
            }
        }

        Ok(dedup_relations(relations))
    }

    fn build_prompt(&self, text: &str, entities: &[Entity]) -> String {
        let mut listing = String::new();
        for (i, entity) in entities.iter().enumerate() {
            listing.push_str(&format!(
                "{}. {} ({})\n",
                i, entity.text, entity.entity_type
            ));
        }

        format!(
            "Return ONLY valid JSON. No markdown, no extra keys.\n\n\
             Schema:\n\
             {{\"relations\":[{{\"subject\":number,\"object\":number,\"predicate\":string,\"confidence\":number}}]}}\n\n\
             Rules:\n\
             - subject and object are indexes into the entity list below\n\
             - predicate is a short verb phrase (e.g. works_for, located_in)\n\
             - subject and object must differ\n\
             - Max {} relations\n\
             - If unsure, return an empty array\n\n\
             Entities:\n{}\n\
             Text:\n{}",
            self.config.max_relations, listing, text
        )
    }

    /// Offline fallback: entities mentioned in the same sentence get a
    /// generic low-confidence relation.
    fn extract_with_cooccurrence(&self, text: &str, entities: &[Entity]) -> Vec<Relation> {
        let mut relations = Vec::new();

        for sentence in text.split(['.', '!', '?']) {
            let present: Vec<&Entity> = entities
                .iter()
                .filter(|e| sentence.contains(e.text.as_str()))
                .collect();

            for pair in present.windows(2) {
                let relation = Relation::new(
                    pair[0].clone(),
                    pair[1].clone(),
                    "relates_to",
                )
                .with_confidence(FALLBACK_CONFIDENCE)
                .with_context(sentence.trim().to_string());

                if !relation.is_self_relation() {
                    relations.push(relation);
                }
                if relations.len() >= self.config.max_relations {
                    return dedup_relations(relations);
                }
            }
        }

        debug!(
            "Co-occurrence fallback produced {} relation candidates",
            relations.len()
        );
        dedup_relations(relations)
    }
}

fn index_entities(entities: &[Entity]) -> HashMap<String, usize> {
    let mut by_name = HashMap::new();
    for (i, entity) in entities.iter().enumerate() {
        by_name.entry(entity.merge_key()).or_insert(i);
    }
    by_name
}

/// Resolve a subject/object reference that may be an index or a name
fn resolve_entity<'a>(
    value: &Value,
    entities: &'a [Entity],
    by_name: &HashMap<String, usize>,
) -> Option<&'a Entity> {
    if let Some(index) = value.as_u64() {
        return entities.get(index as usize);
    }
    let name = value_to_string(value)?;
    let key = Entity::canonicalize(&name).to_lowercase();
    by_name.get(&key).map(|i| &entities[*i])
}

/// Validate and coerce one model item; None drops it
fn parse_relation_item(
    item: &Value,
    entities: &[Entity],
    by_name: &HashMap<String, usize>,
) -> Option<Relation> {
    let subject = item
        .get("subject")
        .or_else(|| item.get("source"))
        .or_else(|| item.get("from"))
        .and_then(|v| resolve_entity(v, entities, by_name))?;
    let object = item
        .get("object")
        .or_else(|| item.get("target"))
        .or_else(|| item.get("to"))
        .and_then(|v| resolve_entity(v, entities, by_name))?;

    let predicate = item
        .get("predicate")
        .or_else(|| item.get("relationship_type"))
        .or_else(|| item.get("relation_type"))
        .or_else(|| item.get("type"))
        .and_then(value_to_string)
        .unwrap_or_else(|| "relates_to".to_string());

    let confidence = value_confidence(item, MODEL_CONFIDENCE_DEFAULT);
    let context = item
        .get("context")
        .and_then(value_to_string)
        .unwrap_or_default();

    Some(
        Relation::new(subject.clone(), object.clone(), predicate)
            .with_confidence(confidence)
            .with_context(context),
    )
}

/// Relations with identical (subject, object, type) keep the
/// higher-confidence one.
fn dedup_relations(relations: Vec<Relation>) -> Vec<Relation> {
    let mut kept: Vec<Relation> = Vec::with_capacity(relations.len());

    'outer: for relation in relations {
        for existing in kept.iter_mut() {
            if existing.dedup_key() == relation.dedup_key() {
                if relation.confidence > existing.confidence {
                    *existing = relation;
                }
                continue 'outer;
            }
        }
        kept.push(relation);
    }

    kept
}
