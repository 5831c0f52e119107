//! The graph analytics engine
//!
//! This crate contains the moving parts of the system:
//! - inference: clients for the text-generation and embedding services
//! - extract: entity / relation / attribute extraction from text
//! - constructor: candidate records -> knowledge graph, with merge and
//!   validation passes
//! - builder: concurrent batch ingestion with retry and progress
//! - aggregator: multi-strategy query retrieval and result fusion
//! - analytics: centrality and community detection over a snapshot
//! - ingest: files and directories -> documents

pub mod aggregator;
pub mod analytics;
pub mod builder;
pub mod constructor;
pub mod error;
pub mod extract;
pub mod inference;
pub mod ingest;
pub mod repair;

pub use aggregator::{
    classify_intent, AggregatedResult, QueryAggregator, QueryAnalysis, QueryIntent, QueryStatus,
};
pub use analytics::{CommunityAssignment, UndirectedGraph};
pub use builder::{
    BuilderConfig, CancelToken, Document, DocumentProcessor, DocumentStats, GraphBuilder,
    KnowledgePipeline, ProgressObserver,
};
pub use constructor::GraphConstructor;
pub use error::{EngineError, Result};
pub use extract::{
    AttributeExtractor, AttributeMode, EntityExtractor, ExtractorConfig, RelationExtractor,
};
pub use inference::{EmbeddingClient, GenerationClient};
pub use ingest::{DocumentLoader, IngestedFile};
