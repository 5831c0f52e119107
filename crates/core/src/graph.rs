//! The knowledge graph aggregate: nodes, edges, and build metadata

use crate::{Attribute, Entity, Relation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A merged entity with its unioned attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable generated id: `{type}_{sanitized canonical form}_{seq}`
    pub id: String,

    /// The merged entity (aliases unioned during optimization)
    pub entity: Entity,

    /// Attributes attached to this node
    #[serde(default)]
    pub attributes: Vec<Attribute>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, entity: Entity) -> Self {
        Self {
            id: id.into(),
            entity,
            attributes: Vec::new(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Text used for the node's embedding: canonical form plus attribute values
    pub fn embedding_text(&self) -> String {
        let mut text = self.entity.canonical_form.clone();
        for attr in &self.attributes {
            text.push_str(&format!(" {} {}", attr.name, attr.normalized_value));
        }
        text
    }
}

/// A relation materialized between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,

    /// Id of the subject node
    pub source_id: String,

    /// Id of the object node
    pub target_id: String,

    /// The wrapped relation
    pub relation: Relation,

    /// Edge weight (= relation confidence)
    pub weight: f32,

    /// Additional metadata; carries `merged_types` after edge collapsing
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl GraphEdge {
    pub fn new(
        id: impl Into<String>,
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation: Relation,
    ) -> Self {
        let weight = relation.confidence;
        Self {
            id: id.into(),
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation,
            weight,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Build metadata kept alongside the graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub node_count: usize,
    pub edge_count: usize,
    /// Node count per entity type
    #[serde(default)]
    pub entity_types: BTreeMap<String, usize>,
    /// Edge count per relation type
    #[serde(default)]
    pub relation_types: BTreeMap<String, usize>,
    /// Total length of the source text the graph was built from
    #[serde(default)]
    pub source_text_length: usize,
    pub built_at: Option<DateTime<Utc>>,
}

/// The aggregate exported to / queried from the store.
///
/// Nodes and edges are kept in BTreeMaps so iteration order is stable;
/// id generation and the graph algorithms rely on that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub name: String,
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: BTreeMap<String, GraphEdge>,
    #[serde(default)]
    pub metadata: GraphMetadata,
}

impl KnowledgeGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            metadata: GraphMetadata::default(),
        }
    }

    pub fn insert_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn insert_edge(&mut self, edge: GraphEdge) {
        self.edges.insert(edge.id.clone(), edge);
    }

    /// Recompute counts and type histograms from the current nodes/edges
    pub fn refresh_metadata(&mut self) {
        let mut entity_types = BTreeMap::new();
        for node in self.nodes.values() {
            *entity_types
                .entry(node.entity.entity_type.to_string())
                .or_insert(0) += 1;
        }
        let mut relation_types = BTreeMap::new();
        for edge in self.edges.values() {
            *relation_types
                .entry(edge.relation.relation_type.to_string())
                .or_insert(0) += 1;
        }
        self.metadata.node_count = self.nodes.len();
        self.metadata.edge_count = self.edges.len();
        self.metadata.entity_types = entity_types;
        self.metadata.relation_types = relation_types;
        self.metadata.built_at = Some(Utc::now());
    }

    /// Number of edges touching each node id
    pub fn degrees(&self) -> BTreeMap<&str, usize> {
        let mut degrees: BTreeMap<&str, usize> = BTreeMap::new();
        for id in self.nodes.keys() {
            degrees.insert(id.as_str(), 0);
        }
        for edge in self.edges.values() {
            if let Some(d) = degrees.get_mut(edge.source_id.as_str()) {
                *d += 1;
            }
            if let Some(d) = degrees.get_mut(edge.target_id.as_str()) {
                *d += 1;
            }
        }
        degrees
    }
}

/// Structural findings from validating a graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub isolated_nodes: usize,
    pub average_degree: f64,
    #[serde(default)]
    pub entity_types: BTreeMap<String, usize>,
    #[serde(default)]
    pub relation_types: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityType;

    fn node(id: &str, name: &str) -> GraphNode {
        GraphNode::new(id, Entity::new(name, EntityType::Person))
    }

    #[test]
    fn test_metadata_refresh() {
        let mut graph = KnowledgeGraph::new("test");
        graph.insert_node(node("person_alice_1", "Alice"));
        graph.insert_node(node("person_bob_2", "Bob"));

        let relation = Relation::new(
            Entity::new("Alice", EntityType::Person),
            Entity::new("Bob", EntityType::Person),
            "similar_to",
        );
        graph.insert_edge(GraphEdge::new(
            "edge_1",
            "person_alice_1",
            "person_bob_2",
            relation,
        ));

        graph.refresh_metadata();

        assert_eq!(graph.metadata.node_count, 2);
        assert_eq!(graph.metadata.edge_count, 1);
        assert_eq!(graph.metadata.entity_types.get("person"), Some(&2));
        assert_eq!(graph.metadata.relation_types.get("similar_to"), Some(&1));
    }

    #[test]
    fn test_degrees() {
        let mut graph = KnowledgeGraph::new("test");
        graph.insert_node(node("a", "A"));
        graph.insert_node(node("b", "B"));
        graph.insert_node(node("c", "C"));

        let relation = Relation::new(
            Entity::new("A", EntityType::Person),
            Entity::new("B", EntityType::Person),
            "relates_to",
        );
        graph.insert_edge(GraphEdge::new("e1", "a", "b", relation));

        let degrees = graph.degrees();
        assert_eq!(degrees.get("a"), Some(&1));
        assert_eq!(degrees.get("b"), Some(&1));
        assert_eq!(degrees.get("c"), Some(&0));
    }

    #[test]
    fn test_embedding_text_includes_attributes() {
        let mut n = node("a", "Acme");
        n.attributes.push(Attribute::new("founded", "1999"));
        let text = n.embedding_text();
        assert!(text.contains("Acme"));
        assert!(text.contains("founded"));
        assert!(text.contains("1999-01-01"));
    }
}
