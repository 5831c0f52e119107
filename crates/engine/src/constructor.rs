//! Graph construction: candidate records -> KnowledgeGraph
//!
//! Construction materializes one node per unique entity text and one
//! edge per resolvable relation, without merging. Merging happens in the
//! optimize pass; validate reports structural findings without
//! correcting them. Inputs are never mutated, so repeated construction
//! from the same candidates is idempotent.

use kgraph_core::{
    Attribute, Entity, GraphEdge, GraphNode, KnowledgeGraph, Relation, ValidationReport,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};

/// Builds, optimizes, and validates knowledge graphs
#[derive(Default)]
pub struct GraphConstructor;

impl GraphConstructor {
    pub fn new() -> Self {
        Self
    }

    /// Materialize a graph from candidate records.
    ///
    /// One node per unique entity text (case-sensitive at this stage);
    /// attributes attach by entity text lookup; relations referencing
    /// unknown entities or themselves are skipped silently.
    #[instrument(skip(self, entities, relations, attributes))]
    pub fn construct(
        &self,
        graph_name: &str,
        entities: &[Entity],
        relations: &[Relation],
        attributes: &HashMap<String, Vec<Attribute>>,
    ) -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new(graph_name);
        let mut node_ids: BTreeMap<String, String> = BTreeMap::new();
        let mut sequence = 0usize;

        for entity in entities {
            if node_ids.contains_key(&entity.text) {
                continue;
            }
            sequence += 1;
            let id = make_node_id(entity, sequence);
            let mut node = GraphNode::new(id.clone(), entity.clone());
            if let Some(attrs) = attributes.get(&entity.text) {
                node.attributes = attrs.clone();
            }
            node_ids.insert(entity.text.clone(), id);
            graph.insert_node(node);
        }

        let mut edge_seq = 0usize;
        for relation in relations {
            if relation.is_self_relation() {
                debug!("Skipping self-relation on {}", relation.subject.text);
                continue;
            }
            let (source, target) = match (
                node_ids.get(&relation.subject.text),
                node_ids.get(&relation.object.text),
            ) {
                (Some(s), Some(t)) => (s.clone(), t.clone()),
                _ => {
                    debug!(
                        "Skipping relation with unresolved endpoint: {} -> {}",
                        relation.subject.text, relation.object.text
                    );
                    continue;
                }
            };
            edge_seq += 1;
            let id = format!("{}__{}__{}", source, target, edge_seq);
            graph.insert_edge(GraphEdge::new(id, source, target, relation.clone()));
        }

        graph.refresh_metadata();
        graph
    }

    /// Merge pass: collapse nodes sharing a case-insensitive canonical
    /// form, then collapse parallel edges per (source, target) pair.
    ///
    /// Returns a new graph; the input is untouched.
    #[instrument(skip(self, graph))]
    pub fn optimize(&self, graph: &KnowledgeGraph) -> KnowledgeGraph {
        let mut optimized = KnowledgeGraph::new(graph.name.clone());

        // Group nodes by lowercased canonical form
        let mut groups: BTreeMap<String, Vec<&GraphNode>> = BTreeMap::new();
        for node in graph.nodes.values() {
            groups.entry(node.entity.merge_key()).or_default().push(node);
        }

        // Winner per group = highest entity confidence (first in id order
        // on ties); losers contribute aliases and attributes.
        let mut remap: HashMap<String, String> = HashMap::new();
        for members in groups.values() {
            let winner = members
                .iter()
                .max_by(|a, b| {
                    a.entity
                        .confidence
                        .total_cmp(&b.entity.confidence)
                        .then_with(|| b.id.cmp(&a.id))
                })
                .expect("group is non-empty");

            let mut merged = (*winner).clone();
            for member in members {
                remap.insert(member.id.clone(), winner.id.clone());
                if member.id == winner.id {
                    continue;
                }
                merged
                    .entity
                    .aliases
                    .extend(member.entity.aliases.iter().cloned());
                merged.entity.aliases.insert(member.entity.text.clone());
                for attribute in &member.attributes {
                    merge_attribute(&mut merged.attributes, attribute);
                }
            }
            optimized.insert_node(merged);
        }

        // Group edges by remapped (source, target); keep the heaviest,
        // record the collapsed relation types.
        let mut edge_groups: BTreeMap<(String, String), Vec<&GraphEdge>> = BTreeMap::new();
        for edge in graph.edges.values() {
            let source = remap.get(&edge.source_id).cloned().unwrap_or_else(|| edge.source_id.clone());
            let target = remap.get(&edge.target_id).cloned().unwrap_or_else(|| edge.target_id.clone());
            if source == target {
                debug!("Dropping edge that became a self-loop after merging: {}", edge.id);
                continue;
            }
            edge_groups.entry((source, target)).or_default().push(edge);
        }

        for ((source, target), members) in edge_groups {
            let winner = members
                .iter()
                .max_by(|a, b| a.weight.total_cmp(&b.weight).then_with(|| b.id.cmp(&a.id)))
                .expect("group is non-empty");

            let mut merged = GraphEdge::new(
                winner.id.clone(),
                source,
                target,
                winner.relation.clone(),
            );
            merged.weight = winner.weight;
            if members.len() > 1 {
                let mut merged_types: Vec<String> = members
                    .iter()
                    .map(|e| e.relation.relation_type.to_string())
                    .collect();
                merged_types.sort();
                merged_types.dedup();
                merged.metadata = json!({ "merged_types": merged_types });
            }
            optimized.insert_edge(merged);
        }

        optimized.metadata.source_text_length = graph.metadata.source_text_length;
        optimized.refresh_metadata();
        optimized
    }

    /// Report structural findings without correcting them.
    ///
    /// Errors: empty entity text, edges referencing missing node ids.
    /// Warnings: edge weights outside [0, 1].
    #[instrument(skip(self, graph))]
    pub fn validate(&self, graph: &KnowledgeGraph) -> ValidationReport {
        let mut report = ValidationReport {
            valid: true,
            ..Default::default()
        };

        for node in graph.nodes.values() {
            if node.entity.text.trim().is_empty() {
                report
                    .errors
                    .push(format!("Node {} has empty entity text", node.id));
            }
            *report
                .entity_types
                .entry(node.entity.entity_type.to_string())
                .or_insert(0) += 1;
        }

        for edge in graph.edges.values() {
            if !graph.nodes.contains_key(&edge.source_id) {
                report.errors.push(format!(
                    "Edge {} references missing source node {}",
                    edge.id, edge.source_id
                ));
            }
            if !graph.nodes.contains_key(&edge.target_id) {
                report.errors.push(format!(
                    "Edge {} references missing target node {}",
                    edge.id, edge.target_id
                ));
            }
            if !(0.0..=1.0).contains(&edge.weight) {
                report.warnings.push(format!(
                    "Edge {} has weight {} outside [0, 1]",
                    edge.id, edge.weight
                ));
            }
            *report
                .relation_types
                .entry(edge.relation.relation_type.to_string())
                .or_insert(0) += 1;
        }

        report.node_count = graph.nodes.len();
        report.edge_count = graph.edges.len();
        let degrees = graph.degrees();
        report.isolated_nodes = degrees.values().filter(|d| **d == 0).count();
        report.average_degree = if graph.nodes.is_empty() {
            0.0
        } else {
            (2 * graph.edges.len()) as f64 / graph.nodes.len() as f64
        };
        report.valid = report.errors.is_empty();
        report
    }
}

/// Stable node id: `{type}_{sanitized canonical form}_{seq}`
fn make_node_id(entity: &Entity, sequence: usize) -> String {
    let mut sanitized = String::with_capacity(entity.canonical_form.len());
    let mut last_underscore = true;
    for c in entity.canonical_form.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c);
            last_underscore = false;
        } else if !last_underscore {
            sanitized.push('_');
            last_underscore = true;
        }
    }
    let sanitized = sanitized.trim_end_matches('_');
    let sanitized = if sanitized.is_empty() { "node" } else { sanitized };
    format!("{}_{}_{}", entity.entity_type, sanitized, sequence)
}

/// Keep the highest-confidence value per attribute name
fn merge_attribute(attributes: &mut Vec<Attribute>, incoming: &Attribute) {
    match attributes.iter_mut().find(|a| a.name == incoming.name) {
        Some(current) => {
            if incoming.confidence > current.confidence {
                *current = incoming.clone();
            }
        }
        None => attributes.push(incoming.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::{EntityType, GraphEdge, Relation};

    fn entities_openai_pair() -> Vec<Entity> {
        vec![
            Entity::new("OpenAI", EntityType::Organization)
                .with_confidence(0.9)
                .with_alias("OpenAI Inc"),
            Entity::new("openai", EntityType::Organization)
                .with_confidence(0.6)
                .with_alias("openai.com"),
        ]
    }

    #[test]
    fn test_construct_one_node_per_unique_text() {
        let constructor = GraphConstructor::new();
        let entities = vec![
            Entity::new("Alice", EntityType::Person),
            Entity::new("Alice", EntityType::Person),
            Entity::new("Bob", EntityType::Person),
        ];

        let graph = constructor.construct("test", &entities, &[], &HashMap::new());
        assert_eq!(graph.nodes.len(), 2);
    }

    #[test]
    fn test_construct_skips_unknown_and_self_relations() {
        let constructor = GraphConstructor::new();
        let alice = Entity::new("Alice", EntityType::Person);
        let bob = Entity::new("Bob", EntityType::Person);
        let ghost = Entity::new("Ghost", EntityType::Person);

        let relations = vec![
            Relation::new(alice.clone(), bob.clone(), "relates_to"),
            // unknown endpoint
            Relation::new(alice.clone(), ghost.clone(), "relates_to"),
            // self-relation
            Relation::new(alice.clone(), alice.clone(), "relates_to"),
        ];

        let graph = constructor.construct(
            "test",
            &[alice, bob],
            &relations,
            &HashMap::new(),
        );

        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn test_construct_never_leaves_dangling_edges() {
        let constructor = GraphConstructor::new();
        let alice = Entity::new("Alice", EntityType::Person);
        let bob = Entity::new("Bob", EntityType::Person);
        let relations = vec![Relation::new(alice.clone(), bob.clone(), "relates_to")];

        let graph = constructor.construct("test", &[alice, bob], &relations, &HashMap::new());
        for edge in graph.edges.values() {
            assert!(graph.nodes.contains_key(&edge.source_id));
            assert!(graph.nodes.contains_key(&edge.target_id));
        }
    }

    #[test]
    fn test_construct_is_idempotent() {
        let constructor = GraphConstructor::new();
        let entities = entities_openai_pair();
        let relations = vec![Relation::new(
            entities[0].clone(),
            Entity::new("Sam", EntityType::Person),
            "created_by",
        )];
        let mut attributes = HashMap::new();
        attributes.insert(
            "OpenAI".to_string(),
            vec![Attribute::new("founded", "2015")],
        );

        let all_entities: Vec<Entity> = entities
            .iter()
            .cloned()
            .chain([Entity::new("Sam", EntityType::Person)])
            .collect();

        let first = constructor.construct("test", &all_entities, &relations, &attributes);
        let second = constructor.construct("test", &all_entities, &relations, &attributes);

        assert_eq!(first.nodes.len(), second.nodes.len());
        assert_eq!(first.edges.len(), second.edges.len());
        assert_eq!(first.metadata.entity_types, second.metadata.entity_types);
        assert_eq!(first.metadata.relation_types, second.metadata.relation_types);
    }

    #[test]
    fn test_optimize_merges_case_insensitive_canonicals() {
        let constructor = GraphConstructor::new();
        let entities = entities_openai_pair();
        let graph = constructor.construct("test", &entities, &[], &HashMap::new());
        assert_eq!(graph.nodes.len(), 2);

        let optimized = constructor.optimize(&graph);
        assert_eq!(optimized.nodes.len(), 1);

        let node = optimized.nodes.values().next().unwrap();
        // Winner is the higher-confidence "OpenAI"; aliases union both
        // inputs' aliases plus the losing surface form.
        assert_eq!(node.entity.text, "OpenAI");
        assert!(node.entity.aliases.contains("OpenAI Inc"));
        assert!(node.entity.aliases.contains("openai.com"));
        assert!(node.entity.aliases.contains("openai"));
    }

    #[test]
    fn test_optimize_merges_attributes_by_confidence() {
        let constructor = GraphConstructor::new();
        let entities = entities_openai_pair();
        let mut attributes = HashMap::new();
        attributes.insert(
            "OpenAI".to_string(),
            vec![Attribute::new("founded", "2015").with_confidence(0.9)],
        );
        attributes.insert(
            "openai".to_string(),
            vec![
                Attribute::new("founded", "2014").with_confidence(0.4),
                Attribute::new("location", "San Francisco").with_confidence(0.8),
            ],
        );

        let graph = constructor.construct("test", &entities, &[], &attributes);
        let optimized = constructor.optimize(&graph);

        let node = optimized.nodes.values().next().unwrap();
        assert_eq!(node.attributes.len(), 2);
        let founded = node.attributes.iter().find(|a| a.name == "founded").unwrap();
        assert_eq!(founded.value, "2015");
    }

    #[test]
    fn test_optimize_collapses_parallel_edges() {
        let constructor = GraphConstructor::new();
        let alice = Entity::new("Alice", EntityType::Person);
        let acme = Entity::new("Acme", EntityType::Organization);
        let relations = vec![
            Relation::new(alice.clone(), acme.clone(), "works_for").with_confidence(0.9),
            Relation::new(alice.clone(), acme.clone(), "relates_to").with_confidence(0.4),
        ];

        let graph = constructor.construct(
            "test",
            &[alice, acme],
            &relations,
            &HashMap::new(),
        );
        assert_eq!(graph.edges.len(), 2);

        let optimized = constructor.optimize(&graph);
        assert_eq!(optimized.edges.len(), 1);

        let edge = optimized.edges.values().next().unwrap();
        assert_eq!(edge.weight, 0.9);
        let merged_types = edge.metadata["merged_types"].as_array().unwrap();
        assert_eq!(merged_types.len(), 2);
    }

    #[test]
    fn test_validate_flags_dangling_edge() {
        let mut graph = KnowledgeGraph::new("test");
        graph.insert_node(GraphNode::new(
            "person_alice_1",
            Entity::new("Alice", EntityType::Person),
        ));
        let relation = Relation::new(
            Entity::new("Alice", EntityType::Person),
            Entity::new("Ghost", EntityType::Person),
            "relates_to",
        );
        graph.insert_edge(GraphEdge::new(
            "e1",
            "person_alice_1",
            "person_ghost_99",
            relation,
        ));

        let report = GraphConstructor::new().validate(&graph);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("person_ghost_99")));
    }

    #[test]
    fn test_validate_flags_weight_and_empty_text() {
        let mut graph = KnowledgeGraph::new("test");
        graph.insert_node(GraphNode::new(
            "custom_a_1",
            Entity::new("", EntityType::Custom),
        ));
        graph.insert_node(GraphNode::new(
            "custom_b_2",
            Entity::new("B", EntityType::Custom),
        ));
        let relation = Relation::new(
            Entity::new("", EntityType::Custom),
            Entity::new("B", EntityType::Custom),
            "relates_to",
        );
        let mut edge = GraphEdge::new("e1", "custom_a_1", "custom_b_2", relation);
        edge.weight = 1.5;
        graph.insert_edge(edge);

        let report = GraphConstructor::new().validate(&graph);
        assert!(!report.valid);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.errors.iter().any(|e| e.contains("empty entity text")));
    }

    #[test]
    fn test_validate_counts_and_degrees() {
        let constructor = GraphConstructor::new();
        let a = Entity::new("A", EntityType::Person);
        let b = Entity::new("B", EntityType::Person);
        let c = Entity::new("C", EntityType::Person);
        let relations = vec![Relation::new(a.clone(), b.clone(), "relates_to")];

        let graph = constructor.construct("test", &[a, b, c], &relations, &HashMap::new());
        let report = constructor.validate(&graph);

        assert!(report.valid);
        assert_eq!(report.node_count, 3);
        assert_eq!(report.edge_count, 1);
        assert_eq!(report.isolated_nodes, 1);
        assert!((report.average_degree - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_make_node_id_sanitizes() {
        let entity = Entity::new("Acme & Co., Ltd.", EntityType::Organization);
        let id = make_node_id(&entity, 7);
        assert_eq!(id, "organization_acme_co_ltd_7");
    }
}
