//! Graph export renderings for interoperability tooling
//!
//! JSON is the canonical document; GEXF/GraphML/DOT are simplified text
//! renderings of the same structure for visualization tools.

use crate::{KnowledgeGraph, Result};
use serde_json::json;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Gexf,
    GraphMl,
    Dot,
}

impl ExportFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "gexf" => Some(Self::Gexf),
            "graphml" => Some(Self::GraphMl),
            "dot" => Some(Self::Dot),
            _ => None,
        }
    }
}

/// Render a graph in the requested format
pub fn export_graph(graph: &KnowledgeGraph, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => to_json(graph),
        ExportFormat::Gexf => Ok(to_gexf(graph)),
        ExportFormat::GraphMl => Ok(to_graphml(graph)),
        ExportFormat::Dot => Ok(to_dot(graph)),
    }
}

/// JSON document with `nodes[]` and `edges[]`
pub fn to_json(graph: &KnowledgeGraph) -> Result<String> {
    let nodes: Vec<_> = graph
        .nodes
        .values()
        .map(|node| {
            json!({
                "id": node.id,
                "entity": node.entity,
                "attributes": node.attributes,
                "metadata": node.metadata,
            })
        })
        .collect();

    let edges: Vec<_> = graph
        .edges
        .values()
        .map(|edge| {
            json!({
                "id": edge.id,
                "source": edge.source_id,
                "target": edge.target_id,
                "relation": edge.relation,
                "weight": edge.weight,
                "metadata": edge.metadata,
            })
        })
        .collect();

    let document = json!({
        "name": graph.name,
        "metadata": graph.metadata,
        "nodes": nodes,
        "edges": edges,
    });

    Ok(serde_json::to_string_pretty(&document)?)
}

/// Simplified GEXF rendering
pub fn to_gexf(graph: &KnowledgeGraph) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<gexf xmlns=\"http://gexf.net/1.3\" version=\"1.3\">\n");
    out.push_str("  <graph defaultedgetype=\"directed\">\n");
    out.push_str("    <nodes>\n");
    for node in graph.nodes.values() {
        out.push_str(&format!(
            "      <node id=\"{}\" label=\"{}\" />\n",
            xml_escape(&node.id),
            xml_escape(&node.entity.canonical_form)
        ));
    }
    out.push_str("    </nodes>\n");
    out.push_str("    <edges>\n");
    for edge in graph.edges.values() {
        out.push_str(&format!(
            "      <edge id=\"{}\" source=\"{}\" target=\"{}\" label=\"{}\" weight=\"{}\" />\n",
            xml_escape(&edge.id),
            xml_escape(&edge.source_id),
            xml_escape(&edge.target_id),
            xml_escape(edge.relation.relation_type.as_str()),
            edge.weight
        ));
    }
    out.push_str("    </edges>\n");
    out.push_str("  </graph>\n");
    out.push_str("</gexf>\n");
    out
}

/// Simplified GraphML rendering
pub fn to_graphml(graph: &KnowledgeGraph) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">\n");
    out.push_str("  <key id=\"label\" for=\"node\" attr.name=\"label\" attr.type=\"string\"/>\n");
    out.push_str("  <key id=\"weight\" for=\"edge\" attr.name=\"weight\" attr.type=\"double\"/>\n");
    out.push_str(&format!(
        "  <graph id=\"{}\" edgedefault=\"directed\">\n",
        xml_escape(&graph.name)
    ));
    for node in graph.nodes.values() {
        out.push_str(&format!(
            "    <node id=\"{}\"><data key=\"label\">{}</data></node>\n",
            xml_escape(&node.id),
            xml_escape(&node.entity.canonical_form)
        ));
    }
    for edge in graph.edges.values() {
        out.push_str(&format!(
            "    <edge source=\"{}\" target=\"{}\"><data key=\"weight\">{}</data></edge>\n",
            xml_escape(&edge.source_id),
            xml_escape(&edge.target_id),
            edge.weight
        ));
    }
    out.push_str("  </graph>\n");
    out.push_str("</graphml>\n");
    out
}

/// Graphviz DOT rendering
pub fn to_dot(graph: &KnowledgeGraph) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", dot_escape(&graph.name)));
    for node in graph.nodes.values() {
        out.push_str(&format!(
            "  \"{}\" [label=\"{}\"];\n",
            dot_escape(&node.id),
            dot_escape(&node.entity.canonical_form)
        ));
    }
    for edge in graph.edges.values() {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\", weight={}];\n",
            dot_escape(&edge.source_id),
            dot_escape(&edge.target_id),
            dot_escape(edge.relation.relation_type.as_str()),
            edge.weight
        ));
    }
    out.push_str("}\n");
    out
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn dot_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
