//! SurrealDB schema definitions

use crate::{DbConnection, Result};
use tracing::info;

/// Embedding dimension (Jina v3 default: 1024)
pub const EMBEDDING_DIMENSION: usize = 1024;

/// Initialize the database schema
pub async fn initialize_schema(db: &DbConnection) -> Result<()> {
    info!("Initializing database schema...");

    // Define tables and fields
    db.query(SCHEMA_DEFINITION).await?;

    info!("Schema initialized successfully");
    Ok(())
}

const SCHEMA_DEFINITION: &str = r#"
-- ============================================
-- TABLES
-- ============================================

-- Graph nodes (one row per merged entity, per named graph)
DEFINE TABLE node SCHEMAFULL;
DEFINE FIELD graph ON node TYPE string;
DEFINE FIELD node_id ON node TYPE string;
DEFINE FIELD entity_type ON node TYPE string DEFAULT 'custom';
DEFINE FIELD name ON node TYPE string;
DEFINE FIELD canonical_form ON node TYPE string;
DEFINE FIELD aliases ON node TYPE array<string> DEFAULT [];
DEFINE FIELD confidence ON node TYPE float DEFAULT 0.5;
DEFINE FIELD attributes ON node TYPE option<array> FLEXIBLE;
DEFINE FIELD metadata ON node TYPE option<object> FLEXIBLE;
DEFINE FIELD embedding ON node TYPE option<array<float>>;
DEFINE FIELD created_at ON node TYPE datetime DEFAULT time::now();

-- ============================================
-- GRAPH EDGE TABLE
-- ============================================

-- A single edge table; the relation type is a field, not a table,
-- because extracted relation types are open-ended.
DEFINE TABLE relates SCHEMAFULL;
DEFINE FIELD in ON relates TYPE record<node>;
DEFINE FIELD out ON relates TYPE record<node>;
DEFINE FIELD graph ON relates TYPE string;
DEFINE FIELD edge_id ON relates TYPE string;
DEFINE FIELD relation_type ON relates TYPE string DEFAULT 'relates_to';
DEFINE FIELD predicate ON relates TYPE string DEFAULT '';
DEFINE FIELD weight ON relates TYPE float DEFAULT 0.5;
DEFINE FIELD context ON relates TYPE option<string>;
DEFINE FIELD metadata ON relates TYPE option<object> FLEXIBLE;
DEFINE FIELD created_at ON relates TYPE datetime DEFAULT time::now();

-- ============================================
-- INDEXES
-- ============================================

-- Search analyzers
DEFINE ANALYZER IF NOT EXISTS ascii
    TOKENIZERS class
    FILTERS lowercase, ascii;

-- Full-text search on node names
DEFINE INDEX idx_node_name ON node FIELDS name
    SEARCH ANALYZER ascii BM25;

-- Vector index for semantic search (HNSW for performance)
DEFINE INDEX idx_node_embedding ON node FIELDS embedding
    HNSW DIMENSION 1024 DIST COSINE;

-- One row per (graph, node id); builds upsert against this key
DEFINE INDEX idx_node_key ON node FIELDS graph, node_id UNIQUE;

-- Canonical-form lookups within a graph
DEFINE INDEX idx_node_canonical ON node FIELDS graph, canonical_form;

-- Type filtering
DEFINE INDEX idx_node_type ON node FIELDS entity_type;

-- Edge lookups within a graph
DEFINE INDEX idx_relates_graph ON relates FIELDS graph;
DEFINE INDEX idx_relates_key ON relates FIELDS graph, edge_id;
"#;

#[cfg(test)]
mod tests {
    use crate::init_memory;

    #[tokio::test]
    async fn test_schema_initialization() {
        let db = init_memory().await.expect("Failed to init db");

        // Verify tables exist by selecting from them
        let nodes: Vec<serde_json::Value> = db.select("node").await.unwrap();
        assert!(nodes.is_empty());

        let edges: Vec<serde_json::Value> = db.select("relates").await.unwrap();
        assert!(edges.is_empty());
    }
}
