//! Knowledge graph engine CLI
//!
//! Thin glue over the engine: build graphs from files, query them, run
//! analytics, export for visualization tooling.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kgraph_core::{BatchProgress, ExportFormat};
use kgraph_db::{init_memory, init_persistent, Repository};
use kgraph_engine::{
    AttributeExtractor, BuilderConfig, DocumentLoader, EmbeddingClient, EntityExtractor,
    GenerationClient, GraphBuilder, GraphConstructor, KnowledgePipeline, ProgressObserver,
    QueryAggregator, RelationExtractor, UndirectedGraph,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// kgraph - build and query knowledge graphs from unstructured text
#[derive(Parser)]
#[command(name = "kgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (defaults to ~/.kgraph/data)
    #[arg(short, long)]
    db_path: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long)]
    memory: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph from a file or directory
    Build {
        /// Path to a file or directory
        path: PathBuf,

        /// Graph name to build into
        #[arg(short, long, default_value = "default")]
        graph: String,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// File suffixes to include (comma-separated, e.g. ".md,.txt")
        #[arg(short, long)]
        patterns: Option<String>,

        /// Delete the graph before building instead of appending
        #[arg(long)]
        replace: bool,
    },

    /// Run an intelligent query against a graph
    Query {
        /// Natural-language query
        query: String,

        /// Graph name to query
        #[arg(short, long, default_value = "default")]
        graph: String,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Include the analysis block
        #[arg(short, long)]
        analysis: bool,
    },

    /// Show store statistics for a graph
    Stats {
        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,
    },

    /// List stored graphs
    Graphs,

    /// Compute centrality over a graph
    Centrality {
        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,

        /// Measure: degree, betweenness, or closeness
        #[arg(short, long, default_value = "degree")]
        measure: String,

        /// Show the top N nodes
        #[arg(short, long, default_value = "10")]
        top: usize,
    },

    /// Detect communities in a graph
    Communities {
        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,
    },

    /// Show a node and its edges
    Node {
        /// Node id (e.g. organization_acme_corp_2)
        node_id: String,

        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,
    },

    /// Find the shortest path between two nodes
    Path {
        /// Source node id
        from: String,

        /// Target node id
        to: String,

        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,

        /// Maximum hops
        #[arg(long, default_value = "6")]
        max_hops: usize,
    },

    /// Export a graph (json, gexf, graphml, dot)
    Export {
        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a stored graph's structure
    Validate {
        /// Graph name
        #[arg(short, long, default_value = "default")]
        graph: String,
    },

    /// Delete the local database (fresh start)
    ResetDb {
        /// Database path (defaults to ~/.kgraph/data)
        #[arg(short, long)]
        db_path: Option<PathBuf>,
    },
}

fn default_db_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".kgraph");
    path.push("data");
    path
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::ResetDb { db_path } = &cli.command {
        let path = db_path.clone().unwrap_or_else(default_db_path);
        if path.exists() {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove db at {}", path.display()))?;
            println!("✓ Removed database at {}", path.display());
        } else {
            println!("Database not found at {}, nothing to remove", path.display());
        }
        return Ok(());
    }

    // Initialize database
    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        let db_path = cli.db_path.clone().unwrap_or_else(default_db_path);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Using database at: {}", db_path.display());
        init_persistent(&db_path).await?
    };

    let repo = Repository::new(db);
    let embedder = Arc::new(EmbeddingClient::default_local());
    let llm = Arc::new(GenerationClient::default_local());

    // Check inference services only when needed
    let needs_embedder = matches!(cli.command, Commands::Build { .. } | Commands::Query { .. });
    let needs_llm = matches!(cli.command, Commands::Build { .. });

    if needs_embedder {
        let ok = embedder.health().await.unwrap_or(false);
        if !ok {
            eprintln!("Error: embedding service is not reachable.");
            eprintln!("  Embeddings: {}", embedder.base_url());
            eprintln!("Start it with: docker compose up -d");
            anyhow::bail!("Embedding service unavailable");
        }
    }

    if needs_llm {
        let ok = llm.health().await.unwrap_or(false);
        if !ok {
            eprintln!("Error: text-generation service is not reachable.");
            eprintln!("  Generation: {}", llm.base_url());
            eprintln!("Start it with: docker compose up -d");
            anyhow::bail!("Text-generation service unavailable");
        }
    }

    match cli.command {
        Commands::Build {
            path,
            graph,
            recursive,
            patterns,
            replace,
        } => {
            cmd_build(repo, llm, embedder, path, graph, recursive, patterns, replace).await?;
        }
        Commands::Query {
            query,
            graph,
            limit,
            analysis,
        } => {
            cmd_query(repo, embedder, graph, query, limit, analysis).await?;
        }
        Commands::Stats { graph } => {
            cmd_stats(repo, graph).await?;
        }
        Commands::Graphs => {
            cmd_graphs(repo).await?;
        }
        Commands::Centrality {
            graph,
            measure,
            top,
        } => {
            cmd_centrality(repo, graph, measure, top).await?;
        }
        Commands::Communities { graph } => {
            cmd_communities(repo, graph).await?;
        }
        Commands::Node { node_id, graph } => {
            cmd_node(repo, graph, node_id).await?;
        }
        Commands::Path {
            from,
            to,
            graph,
            max_hops,
        } => {
            cmd_path(repo, graph, from, to, max_hops).await?;
        }
        Commands::Export {
            graph,
            format,
            output,
        } => {
            cmd_export(repo, graph, format, output).await?;
        }
        Commands::Validate { graph } => {
            cmd_validate(repo, graph).await?;
        }
        Commands::ResetDb { .. } => {
            // Handled before database init.
        }
    }

    Ok(())
}

/// Prints progress lines as documents complete
struct ConsoleProgress;

impl ProgressObserver for ConsoleProgress {
    fn on_progress(&self, progress: &BatchProgress) -> kgraph_engine::Result<()> {
        eprintln!(
            "  [{:>5.1}%] {}/{} documents ({} failed)",
            progress.progress_percentage(),
            progress.processed_items,
            progress.total_items,
            progress.failed_items,
        );
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn cmd_build(
    repo: Repository,
    llm: Arc<GenerationClient>,
    embedder: Arc<EmbeddingClient>,
    path: PathBuf,
    graph: String,
    recursive: bool,
    patterns: Option<String>,
    replace: bool,
) -> Result<()> {
    if replace {
        repo.delete_graph(&graph).await?;
        println!("Replacing graph '{}'", graph);
    }

    let pipeline = KnowledgePipeline::new(
        EntityExtractor::new(llm.clone()),
        RelationExtractor::new(llm.clone()),
        AttributeExtractor::new(llm),
        repo,
        embedder,
    );

    let mut builder = GraphBuilder::new(pipeline).with_config(builder_config_from_env());
    builder.add_observer(Arc::new(ConsoleProgress));

    let loader = DocumentLoader::new();
    let patterns: Vec<String> = patterns
        .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let result = if path.is_dir() {
        builder
            .build_from_directory(&loader, &path, recursive, &patterns, &graph)
            .await?
    } else {
        builder.build_from_file(&loader, &path, &graph).await?
    };

    println!("\n✓ Build {}:", result.status);
    println!("  • Documents: {}/{}", result.successful_documents, result.total_documents);
    println!("  • Entities stored: {}", result.entities_created);
    println!("  • Relationships stored: {}", result.relationships_created);
    println!("  • Elapsed: {:.1}s", result.elapsed_seconds);

    if !result.errors.is_empty() {
        println!("  • Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }

    Ok(())
}

fn builder_config_from_env() -> BuilderConfig {
    let mut config = BuilderConfig::default();
    if let Ok(value) = std::env::var("BUILD_BATCH_SIZE") {
        if let Ok(parsed) = value.parse() {
            config.batch_size = parsed;
        }
    }
    if let Ok(value) = std::env::var("BUILD_MAX_CONCURRENT") {
        if let Ok(parsed) = value.parse() {
            config.max_concurrent = parsed;
        }
    }
    if let Ok(value) = std::env::var("BUILD_RETRY_ATTEMPTS") {
        if let Ok(parsed) = value.parse() {
            config.retry_attempts = parsed;
        }
    }
    if let Ok(value) = std::env::var("BUILD_RETRY_DELAY_MS") {
        if let Ok(parsed) = value.parse() {
            config.retry_base_delay = Duration::from_millis(parsed);
        }
    }
    config
}

async fn cmd_query(
    repo: Repository,
    embedder: Arc<EmbeddingClient>,
    graph: String,
    query: String,
    limit: usize,
    analysis: bool,
) -> Result<()> {
    let aggregator = QueryAggregator::new(repo, embedder);
    let result = aggregator
        .intelligent_query(&graph, &query, limit, analysis)
        .await;

    if result.results.is_empty() {
        println!("No results found.");
    } else {
        println!("Found {} results:\n", result.results.len());
        for (i, item) in result.results.iter().enumerate() {
            match &item.item {
                kgraph_engine::aggregator::ResultItem::Entity {
                    name, entity_type, ..
                } => {
                    println!(
                        "{}. {} [{}] (score {:.2}, via {})",
                        i + 1,
                        name,
                        entity_type,
                        item.score,
                        item.strategy.as_str()
                    );
                }
                kgraph_engine::aggregator::ResultItem::Relationship {
                    source,
                    target,
                    relation_type,
                    weight,
                } => {
                    println!(
                        "{}. {} -[{}]-> {} (weight {:.2})",
                        i + 1,
                        source,
                        relation_type,
                        target,
                        weight
                    );
                }
                kgraph_engine::aggregator::ResultItem::Analytical { title, detail } => {
                    println!("{}. {}: {}", i + 1, title, detail);
                }
            }
        }
    }

    if let Some(analysis) = &result.analysis {
        println!("\nAnalysis:");
        for (strategy, count) in &analysis.source_histogram {
            println!("  • {}: {} results", strategy, count);
        }
        if !analysis.entities_mentioned.is_empty() {
            println!("  • Entities: {}", analysis.entities_mentioned.join(", "));
        }
        for insight in &analysis.insights {
            println!("  → {}", insight);
        }
    }

    if !result.errors.is_empty() {
        println!("\nStrategy errors:");
        for error in &result.errors {
            println!("  - {}", error);
        }
    }

    Ok(())
}

async fn cmd_stats(repo: Repository, graph: String) -> Result<()> {
    let stats = repo.get_stats(&graph).await?;

    println!("Graph '{}':", graph);
    println!("  • Nodes: {}", stats.node_count);
    println!("  • Edges: {}", stats.edge_count);

    Ok(())
}

async fn cmd_graphs(repo: Repository) -> Result<()> {
    let graphs = repo.list_graphs().await?;

    if graphs.is_empty() {
        println!("No graphs yet. Build one with: kgraph build <path>");
        return Ok(());
    }

    println!("Stored graphs:");
    for summary in graphs {
        println!("  • {} ({} nodes)", summary.graph, summary.nodes);
    }

    Ok(())
}

async fn cmd_centrality(
    repo: Repository,
    graph: String,
    measure: String,
    top: usize,
) -> Result<()> {
    let (nodes, edges) = repo.load_snapshot(&graph).await?;
    if nodes.is_empty() {
        println!("Graph '{}' is empty.", graph);
        return Ok(());
    }

    let undirected = UndirectedGraph::from_snapshot(&nodes, &edges);
    let scores = match measure.as_str() {
        "degree" => undirected.degree_centrality(true),
        "betweenness" => undirected.betweenness_centrality(true),
        "closeness" => undirected.closeness_centrality(true),
        other => anyhow::bail!(
            "Unknown measure '{}': expected degree, betweenness, or closeness",
            other
        ),
    };

    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(top);

    println!("Top {} nodes by {} centrality:", ranked.len(), measure);
    for (i, (node_id, score)) in ranked.iter().enumerate() {
        println!("{:>3}. {:.4}  {}", i + 1, score, node_id);
    }

    Ok(())
}

async fn cmd_communities(repo: Repository, graph: String) -> Result<()> {
    let (nodes, edges) = repo.load_snapshot(&graph).await?;
    if nodes.is_empty() {
        println!("Graph '{}' is empty.", graph);
        return Ok(());
    }

    let undirected = UndirectedGraph::from_snapshot(&nodes, &edges);
    let assignment = undirected.detect_communities();

    println!(
        "Found {} communities (modularity {:.4}):",
        assignment.community_count, assignment.modularity
    );

    let mut by_community: std::collections::BTreeMap<usize, Vec<&str>> =
        std::collections::BTreeMap::new();
    for (node, community) in &assignment.communities {
        by_community.entry(*community).or_default().push(node);
    }

    for (community, members) in by_community {
        println!("  [{}] {} members", community, members.len());
        for member in members.iter().take(8) {
            println!("      {}", member);
        }
        if members.len() > 8 {
            println!("      … and {} more", members.len() - 8);
        }
    }

    Ok(())
}

async fn cmd_node(repo: Repository, graph: String, node_id: String) -> Result<()> {
    let node = repo
        .get_node(&graph, &node_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Node not found: {}", node_id))?;

    println!("{} [{}]", node.name, node.entity_type);
    println!("  Canonical: {}", node.canonical_form);
    println!("  Confidence: {:.2}", node.confidence);
    if !node.aliases.is_empty() {
        println!("  Aliases: {}", node.aliases.join(", "));
    }
    if let Some(attributes) = node.attributes.as_array() {
        for attribute in attributes {
            println!(
                "  • {} = {}",
                attribute["name"].as_str().unwrap_or("?"),
                attribute["normalized_value"].as_str().unwrap_or("?")
            );
        }
    }

    let edges = repo.neighbors(&graph, &node_id).await?;
    if edges.is_empty() {
        println!("  (no edges)");
    } else {
        println!("  Edges:");
        for edge in edges {
            println!(
                "    {} -[{}]-> {} (weight {:.2})",
                edge.source_name.as_deref().unwrap_or(&edge.source_id),
                edge.relation_type,
                edge.target_name.as_deref().unwrap_or(&edge.target_id),
                edge.weight
            );
        }
    }

    Ok(())
}

async fn cmd_path(
    repo: Repository,
    graph: String,
    from: String,
    to: String,
    max_hops: usize,
) -> Result<()> {
    match repo.find_path(&graph, &from, &to, max_hops).await? {
        Some(path) => {
            println!("Path ({} hops):", path.len().saturating_sub(1));
            println!("  {}", path.join(" -> "));
        }
        None => {
            println!("No path between {} and {} within {} hops.", from, to, max_hops);
        }
    }

    Ok(())
}

async fn cmd_export(
    repo: Repository,
    graph: String,
    format: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let export_format = ExportFormat::from_name(&format)
        .with_context(|| format!("Unknown format '{}': expected json, gexf, graphml, or dot", format))?;

    let knowledge_graph = repo.load_graph(&graph).await?;
    let rendered = kgraph_core::export_graph(&knowledge_graph, export_format)?;

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Exported graph '{}' to {}", graph, path.display());
        }
        None => {
            println!("{}", rendered);
        }
    }

    Ok(())
}

async fn cmd_validate(repo: Repository, graph: String) -> Result<()> {
    let knowledge_graph = repo.load_graph(&graph).await?;
    let report = GraphConstructor::new().validate(&knowledge_graph);

    println!(
        "Graph '{}': {}",
        graph,
        if report.valid { "valid" } else { "INVALID" }
    );
    println!("  • Nodes: {} ({} isolated)", report.node_count, report.isolated_nodes);
    println!("  • Edges: {}", report.edge_count);
    println!("  • Average degree: {:.2}", report.average_degree);

    if !report.entity_types.is_empty() {
        println!("  • Entity types:");
        for (entity_type, count) in &report.entity_types {
            println!("    - {}: {}", entity_type, count);
        }
    }

    for error in &report.errors {
        println!("  ✗ {}", error);
    }
    for warning in &report.warnings {
        println!("  ! {}", warning);
    }

    Ok(())
}
