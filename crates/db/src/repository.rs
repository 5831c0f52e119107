//! Repository pattern for graph store operations

use crate::{DbConnection, DbError, Result};
use kgraph_core::{GraphEdge, GraphNode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use surrealdb::types::SurrealValue;
use tracing::instrument;

/// Repository for all graph store operations.
///
/// Every node/edge row carries the name of the graph it belongs to, so a
/// single store holds many named graphs and builds stay additive per name.
#[derive(Clone)]
pub struct Repository {
    db: DbConnection,
}

impl Repository {
    /// Create a new repository
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    // ==========================================
    // NODE OPERATIONS
    // ==========================================

    /// Insert or update a node, keyed by (graph, node id)
    #[instrument(skip(self, node, embedding))]
    pub async fn upsert_node(
        &self,
        graph: &str,
        node: &GraphNode,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        let attributes = serde_json::to_value(&node.attributes)?;
        let aliases: Vec<String> = node.entity.aliases.iter().cloned().collect();

        self.db
            .query(
                r#"
                INSERT INTO node (graph, node_id, entity_type, name, canonical_form,
                                  aliases, confidence, attributes, metadata, embedding, created_at)
                VALUES ($graph, $node_id, $entity_type, $name, $canonical_form,
                        $aliases, $confidence, $attributes, $metadata, $embedding, time::now())
                ON DUPLICATE KEY UPDATE
                    name = $name,
                    aliases = $aliases,
                    confidence = $confidence,
                    attributes = $attributes,
                    embedding = $embedding
            "#,
            )
            .bind(("graph", graph.to_string()))
            .bind(("node_id", node.id.clone()))
            .bind(("entity_type", node.entity.entity_type.to_string()))
            .bind(("name", node.entity.text.clone()))
            .bind(("canonical_form", node.entity.canonical_form.clone()))
            .bind(("aliases", aliases))
            .bind(("confidence", node.entity.confidence))
            .bind(("attributes", attributes))
            .bind(("metadata", node.metadata.clone()))
            .bind(("embedding", embedding))
            .await?;

        Ok(())
    }

    /// Get a node by its stable id
    #[instrument(skip(self))]
    pub async fn get_node(&self, graph: &str, node_id: &str) -> Result<Option<StoredNode>> {
        let nodes: Vec<StoredNode> = self
            .db
            .query("SELECT * FROM node WHERE graph = $graph AND node_id = $node_id LIMIT 1")
            .bind(("graph", graph.to_string()))
            .bind(("node_id", node_id.to_string()))
            .await?
            .take(0)?;

        Ok(nodes.into_iter().next())
    }

    /// Find nodes whose canonical form or aliases match a name
    #[instrument(skip(self))]
    pub async fn find_nodes_by_name(&self, graph: &str, name: &str) -> Result<Vec<StoredNode>> {
        let nodes: Vec<StoredNode> = self
            .db
            .query(
                r#"
                SELECT * FROM node
                WHERE graph = $graph AND (
                    string::lowercase(canonical_form) = string::lowercase($name)
                    OR string::lowercase($name) IN array::map(aliases, |$a| string::lowercase($a))
                )
            "#,
            )
            .bind(("graph", graph.to_string()))
            .bind(("name", name.to_string()))
            .await?
            .take(0)?;

        Ok(nodes)
    }

    // ==========================================
    // EDGE OPERATIONS
    // ==========================================

    /// Insert or replace an edge, keyed by (graph, edge id).
    ///
    /// Edges whose endpoints are missing from the store create nothing;
    /// RELATE over an empty selection is a no-op.
    #[instrument(skip(self, edge))]
    pub async fn upsert_edge(&self, graph: &str, edge: &GraphEdge) -> Result<()> {
        self.db
            .query("DELETE relates WHERE graph = $graph AND edge_id = $edge_id")
            .bind(("graph", graph.to_string()))
            .bind(("edge_id", edge.id.clone()))
            .await?;

        let context = if edge.relation.context.is_empty() {
            None
        } else {
            Some(edge.relation.context.clone())
        };

        self.db
            .query(
                r#"
                RELATE (SELECT * FROM node WHERE graph = $graph AND node_id = $source LIMIT 1)
                    ->relates->
                    (SELECT * FROM node WHERE graph = $graph AND node_id = $target LIMIT 1)
                SET graph = $graph,
                    edge_id = $edge_id,
                    relation_type = $relation_type,
                    predicate = $predicate,
                    weight = $weight,
                    context = $context,
                    metadata = $metadata,
                    created_at = time::now()
            "#,
            )
            .bind(("graph", graph.to_string()))
            .bind(("edge_id", edge.id.clone()))
            .bind(("source", edge.source_id.clone()))
            .bind(("target", edge.target_id.clone()))
            .bind(("relation_type", edge.relation.relation_type.to_string()))
            .bind(("predicate", edge.relation.predicate.clone()))
            .bind(("weight", edge.weight))
            .bind(("context", context))
            .bind(("metadata", edge.metadata.clone()))
            .await?;

        Ok(())
    }

    /// Edges touching a node, with endpoint ids and names resolved
    #[instrument(skip(self))]
    pub async fn neighbors(&self, graph: &str, node_id: &str) -> Result<Vec<StoredEdge>> {
        let edges: Vec<StoredEdge> = self
            .db
            .query(
                r#"
                SELECT edge_id, relation_type, predicate, weight, context, metadata,
                       in.node_id AS source_id, in.name AS source_name,
                       out.node_id AS target_id, out.name AS target_name
                FROM relates
                WHERE graph = $graph AND (in.node_id = $node_id OR out.node_id = $node_id)
            "#,
            )
            .bind(("graph", graph.to_string()))
            .bind(("node_id", node_id.to_string()))
            .await?
            .take(0)?;

        Ok(edges)
    }

    // ==========================================
    // SEARCH OPERATIONS
    // ==========================================

    /// Vector similarity search over node embeddings
    #[instrument(skip(self, embedding))]
    pub async fn vector_search(
        &self,
        graph: &str,
        embedding: Vec<f32>,
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<NodeMatch>> {
        let results: Vec<NodeMatch> = self
            .db
            .query(
                r#"
                SELECT
                    node_id,
                    name,
                    canonical_form,
                    entity_type,
                    confidence,
                    vector::distance::knn() AS vec_distance
                FROM node
                WHERE graph = $graph AND embedding <|100,COSINE|> $embedding
                LIMIT $limit
            "#,
            )
            .bind(("graph", graph.to_string()))
            .bind(("embedding", embedding))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        // Cosine distance -> similarity; apply the optional floor here since
        // the KNN operator has no threshold form.
        let results = match threshold {
            Some(min) => results
                .into_iter()
                .filter(|m| m.similarity() >= min)
                .collect(),
            None => results,
        };

        Ok(results)
    }

    /// Full-text search over node names
    #[instrument(skip(self))]
    pub async fn fulltext_search(
        &self,
        graph: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<NodeMatch>> {
        let results: Vec<NodeMatch> = self
            .db
            .query(
                r#"
                SELECT
                    node_id,
                    name,
                    canonical_form,
                    entity_type,
                    confidence,
                    search::score(0) AS fts_score
                FROM node
                WHERE graph = $graph AND name @0@ $query
                ORDER BY fts_score DESC
                LIMIT $limit
            "#,
            )
            .bind(("graph", graph.to_string()))
            .bind(("query", query.to_string()))
            .bind(("limit", limit))
            .await?
            .take(0)?;

        Ok(results)
    }

    // ==========================================
    // SNAPSHOT / PATH OPERATIONS
    // ==========================================

    /// Load all nodes and edges of a named graph
    #[instrument(skip(self))]
    pub async fn load_snapshot(&self, graph: &str) -> Result<(Vec<StoredNode>, Vec<StoredEdge>)> {
        let nodes: Vec<StoredNode> = self
            .db
            .query("SELECT * FROM node WHERE graph = $graph")
            .bind(("graph", graph.to_string()))
            .await?
            .take(0)?;

        let edges: Vec<StoredEdge> = self
            .db
            .query(
                r#"
                SELECT edge_id, relation_type, predicate, weight, context, metadata,
                       in.node_id AS source_id, in.name AS source_name,
                       out.node_id AS target_id, out.name AS target_name
                FROM relates
                WHERE graph = $graph
            "#,
            )
            .bind(("graph", graph.to_string()))
            .await?
            .take(0)?;

        Ok((nodes, edges))
    }

    /// Rebuild an in-memory KnowledgeGraph from the stored snapshot
    #[instrument(skip(self))]
    pub async fn load_graph(&self, graph: &str) -> Result<kgraph_core::KnowledgeGraph> {
        use kgraph_core::{Attribute, Entity, EntityType, Relation, RelationType};

        let (nodes, edges) = self.load_snapshot(graph).await?;
        let mut result = kgraph_core::KnowledgeGraph::new(graph);

        for stored in nodes {
            let mut entity = Entity::new(
                stored.name.clone(),
                EntityType::from_label(&stored.entity_type),
            )
            .with_confidence(stored.confidence)
            .with_canonical(stored.canonical_form.clone());
            entity.aliases = stored.aliases.iter().cloned().collect();

            let attributes: Vec<Attribute> = match stored.attributes {
                serde_json::Value::Null => Vec::new(),
                value => serde_json::from_value(value).unwrap_or_default(),
            };

            let mut node = kgraph_core::GraphNode::new(stored.node_id, entity);
            node.attributes = attributes;
            node.metadata = stored.metadata;
            result.insert_node(node);
        }

        for stored in edges {
            let subject = Entity::new(
                stored.source_name.clone().unwrap_or_else(|| stored.source_id.clone()),
                EntityType::Custom,
            );
            let object = Entity::new(
                stored.target_name.clone().unwrap_or_else(|| stored.target_id.clone()),
                EntityType::Custom,
            );
            let relation = Relation::new(subject, object, stored.predicate.clone())
                .with_type(RelationType::from_label(&stored.relation_type))
                .with_confidence(stored.weight)
                .with_context(stored.context.clone().unwrap_or_default());

            let mut edge = kgraph_core::GraphEdge::new(
                stored.edge_id,
                stored.source_id,
                stored.target_id,
                relation,
            );
            edge.metadata = stored.metadata;
            result.insert_edge(edge);
        }

        result.refresh_metadata();
        Ok(result)
    }

    /// Shortest undirected path between two nodes (BFS over the snapshot).
    ///
    /// Returns the node ids along the path, inclusive of both endpoints,
    /// or None when no path exists within `max_hops`.
    #[instrument(skip(self))]
    pub async fn find_path(
        &self,
        graph: &str,
        from_id: &str,
        to_id: &str,
        max_hops: usize,
    ) -> Result<Option<Vec<String>>> {
        let (_, edges) = self.load_snapshot(graph).await?;

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &edges {
            adjacency
                .entry(edge.source_id.as_str())
                .or_default()
                .push(edge.target_id.as_str());
            adjacency
                .entry(edge.target_id.as_str())
                .or_default()
                .push(edge.source_id.as_str());
        }

        let mut predecessors: HashMap<&str, &str> = HashMap::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        queue.push_back((from_id, 0));
        predecessors.insert(from_id, from_id);

        while let Some((current, depth)) = queue.pop_front() {
            if current == to_id {
                let mut path = vec![current.to_string()];
                let mut cursor = current;
                while cursor != from_id {
                    cursor = predecessors[cursor];
                    path.push(cursor.to_string());
                }
                path.reverse();
                return Ok(Some(path));
            }
            if depth >= max_hops {
                continue;
            }
            if let Some(nexts) = adjacency.get(current) {
                for next in nexts {
                    if !predecessors.contains_key(next) {
                        predecessors.insert(next, current);
                        queue.push_back((next, depth + 1));
                    }
                }
            }
        }

        Ok(None)
    }

    // ==========================================
    // GRAPH MANAGEMENT
    // ==========================================

    /// Delete every node and edge of a named graph
    #[instrument(skip(self))]
    pub async fn delete_graph(&self, graph: &str) -> Result<()> {
        self.db
            .query("DELETE relates WHERE graph = $graph")
            .bind(("graph", graph.to_string()))
            .await?;
        self.db
            .query("DELETE node WHERE graph = $graph")
            .bind(("graph", graph.to_string()))
            .await?;
        Ok(())
    }

    /// Names of all stored graphs with their node counts
    #[instrument(skip(self))]
    pub async fn list_graphs(&self) -> Result<Vec<GraphSummary>> {
        let summaries: Vec<GraphSummary> = self
            .db
            .query("SELECT graph, count() AS nodes FROM node GROUP BY graph")
            .await?
            .take(0)?;

        Ok(summaries)
    }

    // ==========================================
    // STATS
    // ==========================================

    /// Get store statistics for one graph
    #[instrument(skip(self))]
    pub async fn get_stats(&self, graph: &str) -> Result<GraphStats> {
        let stats: Vec<GraphStats> = self
            .db
            .query(
                r#"
                RETURN {
                    node_count: (SELECT count() FROM node WHERE graph = $graph GROUP ALL)[0].count || 0,
                    edge_count: (SELECT count() FROM relates WHERE graph = $graph GROUP ALL)[0].count || 0
                }
            "#,
            )
            .bind(("graph", graph.to_string()))
            .await?
            .take(0)?;

        stats
            .into_iter()
            .next()
            .ok_or_else(|| DbError::QueryFailed("stats".into()))
    }

    // ==========================================
    // RAW PASSTHROUGH
    // ==========================================

    /// Raw query-language passthrough for callers that need it
    #[instrument(skip(self))]
    pub async fn raw_query(&self, query: &str) -> Result<Vec<serde_json::Value>> {
        let results: Vec<serde_json::Value> =
            self.db.query(query.to_string()).await?.take(0)?;
        Ok(results)
    }
}

// ==========================================
// RESULT TYPES
// ==========================================

/// A node row as stored
#[derive(Debug, Clone, Serialize, Deserialize, SurrealValue)]
pub struct StoredNode {
    pub node_id: String,
    pub graph: String,
    pub entity_type: String,
    pub name: String,
    pub canonical_form: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An edge row with endpoint ids and names resolved
#[derive(Debug, Clone, Serialize, Deserialize, SurrealValue)]
pub struct StoredEdge {
    pub edge_id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    #[serde(default)]
    pub predicate: String,
    #[serde(default)]
    pub weight: f32,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
}

/// A node returned from vector or full-text search
#[derive(Debug, Clone, Serialize, Deserialize, SurrealValue)]
pub struct NodeMatch {
    pub node_id: String,
    pub name: String,
    pub canonical_form: String,
    pub entity_type: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub vec_distance: Option<f32>,
    #[serde(default)]
    pub fts_score: Option<f32>,
}

impl NodeMatch {
    /// Cosine similarity derived from the KNN distance (1.0 when the
    /// match came from full-text search only)
    pub fn similarity(&self) -> f32 {
        match self.vec_distance {
            Some(distance) => 1.0 - distance.max(0.0),
            None => 1.0,
        }
    }
}

/// One stored graph with its node count
#[derive(Debug, Clone, Serialize, Deserialize, SurrealValue)]
pub struct GraphSummary {
    pub graph: String,
    #[serde(default)]
    pub nodes: i64,
}

/// Per-graph store statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default, SurrealValue)]
pub struct GraphStats {
    #[serde(default)]
    pub node_count: i64,
    #[serde(default)]
    pub edge_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_memory;
    use kgraph_core::{Entity, EntityType, GraphEdge, GraphNode, Relation};

    fn person_node(id: &str, name: &str) -> GraphNode {
        GraphNode::new(id, Entity::new(name, EntityType::Person).with_confidence(0.9))
    }

    fn edge_between(id: &str, source: &str, target: &str) -> GraphEdge {
        let relation = Relation::new(
            Entity::new(source, EntityType::Person),
            Entity::new(target, EntityType::Person),
            "relates_to",
        )
        .with_confidence(0.7);
        GraphEdge::new(id, source, target, relation)
    }

    #[tokio::test]
    async fn test_upsert_and_get_node() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let node = person_node("person_alice_1", "Alice");
        repo.upsert_node("test", &node, None).await.unwrap();

        let stored = repo.get_node("test", "person_alice_1").await.unwrap();
        assert!(stored.is_some());
        let stored = stored.unwrap();
        assert_eq!(stored.name, "Alice");
        assert_eq!(stored.entity_type, "person");
    }

    #[tokio::test]
    async fn test_upsert_node_is_idempotent() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        let node = person_node("person_alice_1", "Alice");
        repo.upsert_node("test", &node, None).await.unwrap();
        repo.upsert_node("test", &node, None).await.unwrap();

        let stats = repo.get_stats("test").await.unwrap();
        assert_eq!(stats.node_count, 1);
    }

    #[tokio::test]
    async fn test_edges_and_snapshot() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        repo.upsert_node("test", &person_node("a", "A"), None)
            .await
            .unwrap();
        repo.upsert_node("test", &person_node("b", "B"), None)
            .await
            .unwrap();
        repo.upsert_edge("test", &edge_between("e1", "a", "b"))
            .await
            .unwrap();

        let (nodes, edges) = repo.load_snapshot("test").await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_id, "a");
        assert_eq!(edges[0].target_id, "b");
    }

    #[tokio::test]
    async fn test_edge_with_missing_endpoint_is_skipped() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        repo.upsert_node("test", &person_node("a", "A"), None)
            .await
            .unwrap();
        // Target node "ghost" was never stored
        repo.upsert_edge("test", &edge_between("e1", "a", "ghost"))
            .await
            .unwrap();

        let stats = repo.get_stats("test").await.unwrap();
        assert_eq!(stats.edge_count, 0);
    }

    #[tokio::test]
    async fn test_find_path() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        for id in ["a", "b", "c", "d"] {
            repo.upsert_node("test", &person_node(id, id), None)
                .await
                .unwrap();
        }
        repo.upsert_edge("test", &edge_between("e1", "a", "b"))
            .await
            .unwrap();
        repo.upsert_edge("test", &edge_between("e2", "b", "c"))
            .await
            .unwrap();
        repo.upsert_edge("test", &edge_between("e3", "c", "d"))
            .await
            .unwrap();

        let path = repo.find_path("test", "a", "d", 10).await.unwrap();
        assert_eq!(
            path,
            Some(vec![
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
                "d".to_string()
            ])
        );

        let no_path = repo.find_path("test", "a", "d", 2).await.unwrap();
        assert!(no_path.is_none());
    }

    #[tokio::test]
    async fn test_raw_query_passthrough() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        repo.upsert_node("test", &person_node("a", "A"), None)
            .await
            .unwrap();

        let rows = repo
            .raw_query("SELECT node_id FROM node WHERE graph = 'test'")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["node_id"], "a");
    }

    #[tokio::test]
    async fn test_graphs_are_isolated_by_name() {
        let db = init_memory().await.unwrap();
        let repo = Repository::new(db);

        repo.upsert_node("one", &person_node("a", "A"), None)
            .await
            .unwrap();
        repo.upsert_node("two", &person_node("a", "A"), None)
            .await
            .unwrap();

        let stats_one = repo.get_stats("one").await.unwrap();
        assert_eq!(stats_one.node_count, 1);

        repo.delete_graph("one").await.unwrap();
        let stats_one = repo.get_stats("one").await.unwrap();
        assert_eq!(stats_one.node_count, 0);
        let stats_two = repo.get_stats("two").await.unwrap();
        assert_eq!(stats_two.node_count, 1);
    }
}
