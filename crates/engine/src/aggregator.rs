//! Query aggregation: classify the query, fan out to retrieval
//! strategies concurrently, merge with first-seen-wins deduplication.

use crate::analytics::UndirectedGraph;
use crate::inference::EmbeddingClient;
use crate::Result;
use kgraph_db::Repository;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const SEMANTIC_THRESHOLD: f32 = 0.3;
const MANY_RESULTS: usize = 20;
const MAX_ANALYSIS_ENTITIES: usize = 10;

/// The fixed strategy execution (and merge) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Semantic,
    Entity,
    Relationship,
    Analytical,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Semantic => "semantic",
            Strategy::Entity => "entity",
            Strategy::Relationship => "relationship",
            Strategy::Analytical => "analytical",
        }
    }
}

/// Keyword-heuristic intent flags (no ML)
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueryIntent {
    pub is_analytical: bool,
    pub has_relationships: bool,
    pub is_factual: bool,
    pub has_entities: bool,
}

/// Classify a query with keyword heuristics
pub fn classify_intent(query: &str) -> QueryIntent {
    let lowered = query.to_lowercase();

    const ANALYTICAL: &[&str] = &[
        "compare",
        "comparison",
        "statistic",
        "average",
        "count",
        "how many",
        "most connected",
        "most important",
        "central",
        "centrality",
        "cluster",
        "communit",
        "distribution",
        "overall",
    ];
    const RELATIONAL: &[&str] = &[
        "related",
        "relationship",
        "relation",
        "connection",
        "connected",
        "link",
        "between",
        "associated",
        "path",
    ];
    const FACTUAL_PREFIXES: &[&str] = &["who", "what", "when", "where", "which", "whose"];

    let is_analytical = ANALYTICAL.iter().any(|k| lowered.contains(k));
    let has_relationships = RELATIONAL.iter().any(|k| lowered.contains(k));
    let is_factual = FACTUAL_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix));

    // Entities are assumed present unless the query is purely analytical
    let has_entities = !(is_analytical && !has_relationships && !is_factual);

    QueryIntent {
        is_analytical,
        has_relationships,
        is_factual,
        has_entities,
    }
}

/// One retrieved item, tagged with the strategy that produced it
#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub strategy: Strategy,
    pub score: f32,
    #[serde(flatten)]
    pub item: ResultItem,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultItem {
    Entity {
        node_id: String,
        name: String,
        entity_type: String,
    },
    Relationship {
        source: String,
        target: String,
        relation_type: String,
        weight: f32,
    },
    Analytical {
        title: String,
        detail: serde_json::Value,
    },
}

impl ResultItem {
    /// Deduplication key: entity name, ordered source/target pair, or a
    /// structural hash for analytical payloads.
    pub fn dedup_key(&self) -> String {
        match self {
            ResultItem::Entity { name, .. } => format!("entity:{}", name.to_lowercase()),
            ResultItem::Relationship { source, target, .. } => {
                format!("rel:{}->{}", source.to_lowercase(), target.to_lowercase())
            }
            ResultItem::Analytical { title, detail } => {
                let mut hasher = DefaultHasher::new();
                title.hash(&mut hasher);
                detail.to_string().hash(&mut hasher);
                format!("analytical:{:x}", hasher.finish())
            }
        }
    }
}

/// Overall query status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    PartialSuccess,
    Error,
}

/// Optional analysis block appended to a query result
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnalysis {
    /// Result count per source strategy
    pub source_histogram: BTreeMap<String, usize>,
    /// Up to 10 distinct entity names appearing in the results
    pub entities_mentioned: Vec<String>,
    pub insights: Vec<String>,
}

/// The aggregated answer to an intelligent query
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedResult {
    pub status: QueryStatus,
    pub query: String,
    pub intent: QueryIntent,
    pub results: Vec<StrategyResult>,
    pub analysis: Option<QueryAnalysis>,
    pub errors: Vec<String>,
}

/// Multi-strategy retrieval against one named graph
pub struct QueryAggregator {
    repo: Repository,
    embedder: Arc<EmbeddingClient>,
}

impl QueryAggregator {
    pub fn new(repo: Repository, embedder: Arc<EmbeddingClient>) -> Self {
        Self { repo, embedder }
    }

    /// Classify, fan out, aggregate.
    ///
    /// Individual strategy failures are excluded from aggregation; the
    /// query as a whole fails only when every strategy failed.
    #[instrument(skip(self))]
    pub async fn intelligent_query(
        &self,
        graph: &str,
        query: &str,
        max_results: usize,
        include_analysis: bool,
    ) -> AggregatedResult {
        let intent = classify_intent(query);
        debug!("Query intent: {:?}", intent);

        let names = probable_entity_names(query);

        // Semantic search always runs; the others run when the intent
        // calls for them. All four are issued concurrently.
        let (semantic, entity, relationship, analytical) = tokio::join!(
            self.semantic_search(graph, query, max_results),
            async {
                if intent.has_entities {
                    self.entity_search(graph, query, &names, max_results).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if intent.has_relationships {
                    self.relationship_search(graph, &names, max_results).await
                } else {
                    Ok(Vec::new())
                }
            },
            async {
                if intent.is_analytical {
                    self.analytical_search(graph).await
                } else {
                    Ok(Vec::new())
                }
            },
        );

        let outcomes = vec![
            (Strategy::Semantic, semantic),
            (Strategy::Entity, entity),
            (Strategy::Relationship, relationship),
            (Strategy::Analytical, analytical),
        ];

        let (results, errors, attempted, failed) = aggregate_results(outcomes, max_results);

        let status = if attempted > 0 && failed == attempted {
            QueryStatus::Error
        } else if failed > 0 {
            QueryStatus::PartialSuccess
        } else {
            QueryStatus::Success
        };

        let analysis = if include_analysis {
            Some(analyze_results(&results, &intent))
        } else {
            None
        };

        AggregatedResult {
            status,
            query: query.to_string(),
            intent,
            results,
            analysis,
            errors,
        }
    }

    /// Query embedding vs. stored node vectors
    async fn semantic_search(
        &self,
        graph: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StrategyResult>> {
        let embedding = self.embedder.embed(query).await?;
        let matches = self
            .repo
            .vector_search(graph, embedding, limit, Some(SEMANTIC_THRESHOLD))
            .await?;

        Ok(matches
            .into_iter()
            .map(|m| StrategyResult {
                strategy: Strategy::Semantic,
                score: m.similarity(),
                item: ResultItem::Entity {
                    node_id: m.node_id,
                    name: m.name,
                    entity_type: m.entity_type,
                },
            })
            .collect())
    }

    /// Exact-name lookups for probable entity names plus full-text search
    async fn entity_search(
        &self,
        graph: &str,
        query: &str,
        names: &[String],
        limit: usize,
    ) -> Result<Vec<StrategyResult>> {
        let mut results = Vec::new();

        for name in names {
            for node in self.repo.find_nodes_by_name(graph, name).await? {
                results.push(StrategyResult {
                    strategy: Strategy::Entity,
                    score: node.confidence,
                    item: ResultItem::Entity {
                        node_id: node.node_id,
                        name: node.name,
                        entity_type: node.entity_type,
                    },
                });
            }
        }

        for m in self.repo.fulltext_search(graph, query, limit).await? {
            results.push(StrategyResult {
                strategy: Strategy::Entity,
                score: m.fts_score.map(|s| (s / 10.0).min(1.0)).unwrap_or(0.0),
                item: ResultItem::Entity {
                    node_id: m.node_id,
                    name: m.name,
                    entity_type: m.entity_type,
                },
            });
        }

        results.truncate(limit);
        Ok(results)
    }

    /// Edges around probable entities; when two names resolve, also the
    /// path between them
    async fn relationship_search(
        &self,
        graph: &str,
        names: &[String],
        limit: usize,
    ) -> Result<Vec<StrategyResult>> {
        let mut results = Vec::new();
        let mut resolved: Vec<String> = Vec::new();

        for name in names {
            let nodes = self.repo.find_nodes_by_name(graph, name).await?;
            for node in &nodes {
                resolved.push(node.node_id.clone());
            }
            for node in nodes {
                for edge in self.repo.neighbors(graph, &node.node_id).await? {
                    results.push(edge_result(
                        edge.source_name.as_deref().unwrap_or(&edge.source_id),
                        edge.target_name.as_deref().unwrap_or(&edge.target_id),
                        &edge.relation_type,
                        edge.weight,
                    ));
                }
            }
        }

        if resolved.len() >= 2 {
            if let Some(path) = self
                .repo
                .find_path(graph, &resolved[0], &resolved[1], 6)
                .await?
            {
                for pair in path.windows(2) {
                    results.push(edge_result(&pair[0], &pair[1], "path", 1.0));
                }
            }
        }

        results.truncate(limit);
        Ok(results)
    }

    /// Graph statistics, top centrality, and the community snapshot
    async fn analytical_search(&self, graph: &str) -> Result<Vec<StrategyResult>> {
        let (nodes, edges) = self.repo.load_snapshot(graph).await?;
        let undirected = UndirectedGraph::from_snapshot(&nodes, &edges);

        let mut results = vec![StrategyResult {
            strategy: Strategy::Analytical,
            score: 1.0,
            item: ResultItem::Analytical {
                title: "graph_statistics".to_string(),
                detail: serde_json::json!({
                    "nodes": nodes.len(),
                    "edges": edges.len(),
                }),
            },
        }];

        let mut centrality: Vec<(String, f64)> = undirected
            .degree_centrality(true)
            .into_iter()
            .collect();
        centrality.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        centrality.truncate(5);
        results.push(StrategyResult {
            strategy: Strategy::Analytical,
            score: 1.0,
            item: ResultItem::Analytical {
                title: "top_degree_centrality".to_string(),
                detail: serde_json::json!(centrality
                    .into_iter()
                    .map(|(id, value)| serde_json::json!({"node": id, "centrality": value}))
                    .collect::<Vec<_>>()),
            },
        });

        let communities = undirected.detect_communities();
        results.push(StrategyResult {
            strategy: Strategy::Analytical,
            score: 1.0,
            item: ResultItem::Analytical {
                title: "communities".to_string(),
                detail: serde_json::json!({
                    "count": communities.community_count,
                    "modularity": communities.modularity,
                }),
            },
        });

        Ok(results)
    }
}

fn edge_result(source: &str, target: &str, relation_type: &str, weight: f32) -> StrategyResult {
    StrategyResult {
        strategy: Strategy::Relationship,
        score: weight,
        item: ResultItem::Relationship {
            source: source.to_string(),
            target: target.to_string(),
            relation_type: relation_type.to_string(),
            weight,
        },
    }
}

/// Capitalized word sequences in the query are probable entity names
pub fn probable_entity_names(query: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in query.split_whitespace() {
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        let capitalized = cleaned
            .chars()
            .next()
            .map(|c| c.is_uppercase())
            .unwrap_or(false);
        if capitalized {
            current.push(cleaned);
        } else {
            if !current.is_empty() {
                names.push(current.join(" "));
            }
            current.clear();
        }
    }
    if !current.is_empty() {
        names.push(current.join(" "));
    }

    // The leading word of a question is capitalized by grammar, not by
    // being a name; drop single-word candidates that start the query.
    names.retain(|n| {
        !(query.starts_with(n.as_str()) && !n.contains(' '))
    });
    names.dedup();
    names
}

type AggregateOutput = (Vec<StrategyResult>, Vec<String>, usize, usize);

/// Merge strategy outputs in fixed order with first-seen-wins dedup.
///
/// Returns (results, errors, strategies attempted, strategies failed).
pub fn aggregate_results(
    outcomes: Vec<(Strategy, Result<Vec<StrategyResult>>)>,
    max_results: usize,
) -> AggregateOutput {
    let mut results: Vec<StrategyResult> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut errors = Vec::new();
    let mut attempted = 0usize;
    let mut failed = 0usize;

    for (strategy, outcome) in outcomes {
        attempted += 1;
        match outcome {
            Ok(items) => {
                for item in items {
                    if !seen.insert(item.item.dedup_key()) {
                        continue;
                    }
                    results.push(item);
                }
            }
            Err(e) => {
                failed += 1;
                warn!("Strategy {} failed: {}", strategy.as_str(), e);
                errors.push(format!("{}: {}", strategy.as_str(), e));
            }
        }
    }

    results.truncate(max_results);
    (results, errors, attempted, failed)
}

/// Result-source histogram, entity mentions, qualitative insights
fn analyze_results(results: &[StrategyResult], intent: &QueryIntent) -> QueryAnalysis {
    let mut source_histogram: BTreeMap<String, usize> = BTreeMap::new();
    for result in results {
        *source_histogram
            .entry(result.strategy.as_str().to_string())
            .or_insert(0) += 1;
    }

    let mut entities_mentioned = Vec::new();
    for result in results {
        if let ResultItem::Entity { name, .. } = &result.item {
            if !entities_mentioned.contains(name) {
                entities_mentioned.push(name.clone());
                if entities_mentioned.len() >= MAX_ANALYSIS_ENTITIES {
                    break;
                }
            }
        }
    }

    let mut insights = Vec::new();
    if results.is_empty() {
        insights.push("No results found - consider broadening the query".to_string());
    } else if results.len() > MANY_RESULTS {
        insights.push("Many results returned - consider adding filters".to_string());
    }
    if intent.is_analytical {
        insights.push(
            "Analytical query - the centrality and community commands may help".to_string(),
        );
    }

    QueryAnalysis {
        source_histogram,
        entities_mentioned,
        insights,
    }
}
