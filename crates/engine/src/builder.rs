//! Batch build orchestration: documents -> extraction -> construction ->
//! persistence, with bounded concurrency, retry, and progress reporting.

use crate::constructor::GraphConstructor;
use crate::extract::{AttributeExtractor, EntityExtractor, RelationExtractor};
use crate::inference::EmbeddingClient;
use crate::ingest::DocumentLoader;
use crate::{EngineError, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kgraph_core::{BatchProgress, BuildResult, BuildStatus};
use kgraph_db::Repository;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// One unit of ingestion work
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source: Option<String>,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Counts returned by processing one document
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentStats {
    pub entities: usize,
    pub relationships: usize,
}

/// The extract-construct-persist round trip for one document.
///
/// The seam exists so the retry/progress machinery can be exercised
/// without live inference services.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, document: &Document, graph_name: &str) -> Result<DocumentStats>;
}

/// Observer invoked synchronously after every document completes.
///
/// Errors are logged and never propagate into the batch.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &BatchProgress) -> Result<()>;
}

/// Cooperative cancellation checked between batches
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Batch builder tuning
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Documents per batch; the next batch starts only after the current
    /// batch's tasks all resolve
    pub batch_size: usize,
    /// Concurrent document tasks within a batch
    pub max_concurrent: usize,
    /// Total attempts per document before it is recorded as failed
    pub retry_attempts: usize,
    /// Backoff between attempts is `attempt * retry_base_delay`
    pub retry_base_delay: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrent: 4,
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
        }
    }
}

/// Orchestrates concurrent document ingestion into a named graph
pub struct GraphBuilder<P: DocumentProcessor> {
    processor: P,
    config: BuilderConfig,
    observers: Vec<Arc<dyn ProgressObserver>>,
    cancel: CancelToken,
}

impl<P: DocumentProcessor> GraphBuilder<P> {
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            config: BuilderConfig::default(),
            observers: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    /// Token callers can use to cancel the build between batches
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Build a named graph from documents.
    ///
    /// Documents run in fixed-size batches; within a batch, tasks run
    /// under bounded concurrency and may complete out of order. Progress
    /// is reported after each completion. A document that exhausts its
    /// retries is recorded as failed and does not stop the batch.
    #[instrument(skip(self, documents))]
    pub async fn build_from_documents(
        &self,
        documents: Vec<Document>,
        graph_name: &str,
    ) -> BuildResult {
        let total = documents.len();
        info!("Building graph '{}' from {} documents", graph_name, total);

        let started = Instant::now();
        let progress = Mutex::new(BatchProgress::new(total));
        let mut entities_created = 0usize;
        let mut relationships_created = 0usize;
        let mut cancelled = false;

        let mut offset = 0usize;
        for batch in documents.chunks(self.config.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                cancelled = true;
                let mut guard = progress.lock().unwrap();
                for document in &documents[offset..] {
                    guard.record_failure(format!("{}: build cancelled", document.id));
                }
                break;
            }
            offset += batch.len();

            let progress = &progress;
            let outcomes: Vec<DocumentStats> = stream::iter(batch.iter().map(|document| async move {
                let outcome = self.process_with_retry(document, graph_name).await;
                let snapshot = {
                    let mut guard = progress.lock().unwrap();
                    match &outcome {
                        Ok(_) => guard.record_success(),
                        Err(e) => guard.record_failure(format!("{}: {}", document.id, e)),
                    }
                    guard.clone()
                };
                self.notify_observers(&snapshot);
                outcome.unwrap_or_default()
            }))
            .buffer_unordered(self.config.max_concurrent.max(1))
            .collect()
            .await;

            for stats in outcomes {
                entities_created += stats.entities;
                relationships_created += stats.relationships;
            }
        }

        let progress = progress.into_inner().unwrap();
        let status = if progress.failed_items == 0 && !cancelled {
            BuildStatus::Success
        } else {
            BuildStatus::PartialSuccess
        };

        let result = BuildResult {
            status,
            graph_name: graph_name.to_string(),
            total_documents: total,
            successful_documents: progress.successful_items,
            failed_documents: progress.failed_items,
            entities_created,
            relationships_created,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            errors: progress.errors,
        };

        info!(
            "Build '{}' finished: {} ({}/{} documents, {} entities, {} relationships)",
            graph_name,
            result.status,
            result.successful_documents,
            result.total_documents,
            result.entities_created,
            result.relationships_created
        );

        result
    }

    /// Additive build into an existing graph name
    pub async fn incremental_update(
        &self,
        documents: Vec<Document>,
        graph_name: &str,
    ) -> BuildResult {
        self.build_from_documents(documents, graph_name).await
    }

    /// Convenience: ingest a single file via the ingestion collaborator
    pub async fn build_from_file(
        &self,
        loader: &DocumentLoader,
        path: &Path,
        graph_name: &str,
    ) -> Result<BuildResult> {
        let file = loader.process_file(path)?;
        let documents = DocumentLoader::to_documents(vec![file]);
        Ok(self.build_from_documents(documents, graph_name).await)
    }

    /// Convenience: ingest a directory via the ingestion collaborator
    pub async fn build_from_directory(
        &self,
        loader: &DocumentLoader,
        path: &Path,
        recursive: bool,
        patterns: &[String],
        graph_name: &str,
    ) -> Result<BuildResult> {
        let files = loader.process_directory(path, recursive, patterns)?;
        if files.is_empty() {
            return Err(EngineError::NotFound(format!(
                "No matching files under {}",
                path.display()
            )));
        }
        let documents = DocumentLoader::to_documents(files);
        Ok(self.build_from_documents(documents, graph_name).await)
    }

    /// Retry loop: up to `retry_attempts` attempts with linear backoff.
    /// Empty documents are skipped (counted as successes with no output).
    async fn process_with_retry(
        &self,
        document: &Document,
        graph_name: &str,
    ) -> Result<DocumentStats> {
        if document.content.trim().is_empty() {
            debug!("Skipping empty document {}", document.id);
            return Ok(DocumentStats::default());
        }

        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.processor.process(document, graph_name).await {
                Ok(stats) => return Ok(stats),
                Err(e) => {
                    warn!(
                        "Document {} attempt {}/{} failed: {}",
                        document.id, attempt, attempts, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_base_delay * attempt as u32).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EngineError::Processing("Document processing failed".to_string())
        }))
    }

    fn notify_observers(&self, progress: &BatchProgress) {
        for observer in &self.observers {
            if let Err(e) = observer.on_progress(progress) {
                warn!("Progress observer failed (ignored): {}", e);
            }
        }
    }
}

// ==========================================
// THE REAL PIPELINE
// ==========================================

/// Extract -> construct -> optimize -> persist, against live collaborators
pub struct KnowledgePipeline {
    entity_extractor: EntityExtractor,
    relation_extractor: RelationExtractor,
    attribute_extractor: AttributeExtractor,
    constructor: GraphConstructor,
    repo: Repository,
    embedder: Arc<EmbeddingClient>,
}

impl KnowledgePipeline {
    pub fn new(
        entity_extractor: EntityExtractor,
        relation_extractor: RelationExtractor,
        attribute_extractor: AttributeExtractor,
        repo: Repository,
        embedder: Arc<EmbeddingClient>,
    ) -> Self {
        Self {
            entity_extractor,
            relation_extractor,
            attribute_extractor,
            constructor: GraphConstructor::new(),
            repo,
            embedder,
        }
    }
}

#[async_trait]
impl DocumentProcessor for KnowledgePipeline {
    async fn process(&self, document: &Document, graph_name: &str) -> Result<DocumentStats> {
        let entities = self.entity_extractor.extract(&document.content).await;
        if entities.is_empty() {
            debug!("No entities extracted from {}", document.id);
            return Ok(DocumentStats::default());
        }

        let relations = self
            .relation_extractor
            .extract(&document.content, &entities)
            .await;
        let attributes = self
            .attribute_extractor
            .extract(&document.content, &entities)
            .await;

        let graph = self
            .constructor
            .construct(graph_name, &entities, &relations, &attributes);
        let mut graph = self.constructor.optimize(&graph);
        graph.metadata.source_text_length = document.content.len();

        // Embed node texts in one batch, then write nodes before edges so
        // RELATE always finds its endpoints.
        let texts: Vec<String> = graph.nodes.values().map(|n| n.embedding_text()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        for (node, embedding) in graph.nodes.values().zip(embeddings.into_iter()) {
            self.repo
                .upsert_node(graph_name, node, Some(embedding))
                .await?;
        }
        for edge in graph.edges.values() {
            self.repo.upsert_edge(graph_name, edge).await?;
        }

        Ok(DocumentStats {
            entities: graph.nodes.len(),
            relationships: graph.edges.len(),
        })
    }
}
