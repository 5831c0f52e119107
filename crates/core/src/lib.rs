//! Core domain types for the knowledge graph engine
//!
//! This crate defines the fundamental data structures used throughout
//! the system: Entities, Relations, Attributes, the KnowledgeGraph
//! aggregate, and batch progress tracking. It is pure data - no I/O.

pub mod attribute;
pub mod entity;
pub mod error;
pub mod export;
pub mod graph;
pub mod progress;
pub mod relation;

pub use attribute::{normalize_value, Attribute, AttributeType};
pub use entity::{Entity, EntityType, Span};
pub use error::{CoreError, Result};
pub use export::{export_graph, ExportFormat};
pub use graph::{GraphEdge, GraphMetadata, GraphNode, KnowledgeGraph, ValidationReport};
pub use progress::{BatchProgress, BuildResult, BuildStatus, MAX_TRACKED_ERRORS};
pub use relation::{Relation, RelationType};
