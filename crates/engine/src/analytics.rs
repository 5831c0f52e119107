//! Hand-rolled graph algorithms over a node/edge snapshot.
//!
//! The snapshot is viewed as an undirected weighted graph. Node ids are
//! sorted at construction, so every algorithm is deterministic for a
//! fixed snapshot. Nothing here touches the store.

use kgraph_core::KnowledgeGraph;
use kgraph_db::repository::{StoredEdge, StoredNode};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// Undirected weighted adjacency built from a snapshot.
///
/// Parallel edges collapse to one adjacency entry keeping the maximum
/// weight; self-loops are ignored.
pub struct UndirectedGraph {
    node_ids: Vec<String>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl UndirectedGraph {
    /// Build from store rows
    pub fn from_snapshot(nodes: &[StoredNode], edges: &[StoredEdge]) -> Self {
        let pairs = edges
            .iter()
            .map(|e| (e.source_id.as_str(), e.target_id.as_str(), e.weight as f64));
        Self::build(nodes.iter().map(|n| n.node_id.as_str()), pairs)
    }

    /// Build from an in-memory graph
    pub fn from_graph(graph: &KnowledgeGraph) -> Self {
        let pairs = graph
            .edges
            .values()
            .map(|e| (e.source_id.as_str(), e.target_id.as_str(), e.weight as f64));
        Self::build(graph.nodes.keys().map(|k| k.as_str()), pairs)
    }

    fn build<'a>(
        ids: impl Iterator<Item = &'a str>,
        pairs: impl Iterator<Item = (&'a str, &'a str, f64)>,
    ) -> Self {
        let mut node_ids: Vec<String> = ids.map(|s| s.to_string()).collect();
        node_ids.sort();
        node_ids.dedup();

        let index: BTreeMap<&str, usize> = node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        // max weight per unordered pair
        let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for (source, target, weight) in pairs {
            let (Some(&s), Some(&t)) = (index.get(source), index.get(target)) else {
                continue;
            };
            if s == t {
                continue;
            }
            let key = (s.min(t), s.max(t));
            let entry = weights.entry(key).or_insert(weight);
            if weight > *entry {
                *entry = weight;
            }
        }

        let mut adjacency = vec![Vec::new(); node_ids.len()];
        for ((s, t), weight) in weights {
            adjacency[s].push((t, weight));
            adjacency[t].push((s, weight));
        }

        Self { node_ids, adjacency }
    }

    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    /// Degree centrality: neighbor-set size, optionally divided by (N-1)
    pub fn degree_centrality(&self, normalized: bool) -> BTreeMap<String, f64> {
        let n = self.len();
        let scale = if normalized && n > 1 {
            1.0 / (n - 1) as f64
        } else {
            1.0
        };

        self.node_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), self.adjacency[i].len() as f64 * scale))
            .collect()
    }

    /// Betweenness centrality via Brandes' algorithm (unweighted BFS).
    ///
    /// Accumulated pair dependencies are halved for the undirected case;
    /// with `normalized` they are rescaled by 2/((N-1)(N-2)) for N > 2.
    pub fn betweenness_centrality(&self, normalized: bool) -> BTreeMap<String, f64> {
        let n = self.len();
        let mut centrality = vec![0.0f64; n];

        for s in 0..n {
            // single-source shortest paths with path counting
            let mut stack: Vec<usize> = Vec::new();
            let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
            let mut sigma = vec![0.0f64; n];
            let mut distance = vec![-1i64; n];
            sigma[s] = 1.0;
            distance[s] = 0;

            let mut queue = VecDeque::new();
            queue.push_back(s);
            while let Some(v) = queue.pop_front() {
                stack.push(v);
                for &(w, _) in &self.adjacency[v] {
                    if distance[w] < 0 {
                        distance[w] = distance[v] + 1;
                        queue.push_back(w);
                    }
                    if distance[w] == distance[v] + 1 {
                        sigma[w] += sigma[v];
                        predecessors[w].push(v);
                    }
                }
            }

            // back-propagated dependency accumulation
            let mut delta = vec![0.0f64; n];
            while let Some(w) = stack.pop() {
                for &v in &predecessors[w] {
                    delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
                }
                if w != s {
                    centrality[w] += delta[w];
                }
            }
        }

        // each unordered pair was counted from both endpoints
        for value in centrality.iter_mut() {
            *value /= 2.0;
        }
        if normalized && n > 2 {
            let scale = 2.0 / ((n - 1) as f64 * (n - 2) as f64);
            for value in centrality.iter_mut() {
                *value *= scale;
            }
        }

        self.node_ids
            .iter()
            .zip(centrality)
            .map(|(id, value)| (id.clone(), value))
            .collect()
    }

    /// Closeness centrality: reachable-count / sum-of-distances,
    /// optionally rescaled by reachable-count/(N-1)
    pub fn closeness_centrality(&self, normalized: bool) -> BTreeMap<String, f64> {
        let n = self.len();
        let mut result = BTreeMap::new();

        for s in 0..n {
            let mut distance = vec![-1i64; n];
            distance[s] = 0;
            let mut queue = VecDeque::new();
            queue.push_back(s);
            let mut reachable = 0usize;
            let mut total = 0i64;

            while let Some(v) = queue.pop_front() {
                for &(w, _) in &self.adjacency[v] {
                    if distance[w] < 0 {
                        distance[w] = distance[v] + 1;
                        reachable += 1;
                        total += distance[w];
                        queue.push_back(w);
                    }
                }
            }

            let mut closeness = if total > 0 {
                reachable as f64 / total as f64
            } else {
                0.0
            };
            if normalized && n > 1 {
                closeness *= reachable as f64 / (n - 1) as f64;
            }
            result.insert(self.node_ids[s].clone(), closeness);
        }

        result
    }

    /// Greedy local-search modularity optimization (Louvain-style local
    /// moves, single level).
    ///
    /// Every node starts in its own community; each pass moves a node to
    /// the neighboring community with the best strictly-positive
    /// modularity gain, until no move improves any node. The gain of
    /// community C for node v is k_{v,C}/m - (tot_C * k_v)/(2m^2), with
    /// v excluded from its current community's total.
    pub fn detect_communities(&self) -> CommunityAssignment {
        let n = self.len();
        let total_weight: f64 = self
            .adjacency
            .iter()
            .flat_map(|neighbors| neighbors.iter().map(|(_, w)| w))
            .sum::<f64>()
            / 2.0;

        let degree: Vec<f64> = self
            .adjacency
            .iter()
            .map(|neighbors| neighbors.iter().map(|(_, w)| w).sum())
            .collect();

        let mut communities: Vec<usize> = (0..n).collect();
        if total_weight > 0.0 {
            let mut sigma_tot: BTreeMap<usize, f64> =
                degree.iter().enumerate().map(|(i, k)| (i, *k)).collect();

            loop {
                let mut improved = false;
                for v in 0..n {
                    let current = communities[v];
                    let k_v = degree[v];

                    // weight from v into each adjacent community
                    let mut weight_to: BTreeMap<usize, f64> = BTreeMap::new();
                    for &(w, weight) in &self.adjacency[v] {
                        *weight_to.entry(communities[w]).or_insert(0.0) += weight;
                    }

                    let gain = |community: usize, weight: f64| {
                        let mut tot = sigma_tot.get(&community).copied().unwrap_or(0.0);
                        if community == current {
                            tot -= k_v;
                        }
                        weight / total_weight
                            - tot * k_v / (2.0 * total_weight * total_weight)
                    };

                    let current_gain =
                        gain(current, weight_to.get(&current).copied().unwrap_or(0.0));

                    let mut best = current;
                    let mut best_gain = current_gain;
                    for (&candidate, &weight) in &weight_to {
                        if candidate == current {
                            continue;
                        }
                        let candidate_gain = gain(candidate, weight);
                        if candidate_gain > best_gain {
                            best_gain = candidate_gain;
                            best = candidate;
                        }
                    }

                    if best != current {
                        *sigma_tot.entry(current).or_insert(0.0) -= k_v;
                        *sigma_tot.entry(best).or_insert(0.0) += k_v;
                        communities[v] = best;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        // renumber communities densely, in first-seen node order
        let mut renumber: BTreeMap<usize, usize> = BTreeMap::new();
        for &community in &communities {
            let next = renumber.len();
            renumber.entry(community).or_insert(next);
        }
        let communities: Vec<usize> = communities.iter().map(|c| renumber[c]).collect();
        let community_count = renumber.len();
        let modularity = self.modularity(&communities, total_weight);

        CommunityAssignment {
            communities: self
                .node_ids
                .iter()
                .zip(communities.iter())
                .map(|(id, c)| (id.clone(), *c))
                .collect(),
            community_count,
            modularity,
        }
    }

    /// Weighted modularity of an assignment:
    /// Q = sum_c [ in_c/(2m) - (tot_c/(2m))^2 ]
    fn modularity(&self, communities: &[usize], total_weight: f64) -> f64 {
        if total_weight <= 0.0 {
            return 0.0;
        }
        let two_m = 2.0 * total_weight;

        let mut internal: BTreeMap<usize, f64> = BTreeMap::new();
        let mut total: BTreeMap<usize, f64> = BTreeMap::new();

        for v in 0..self.len() {
            let community = communities[v];
            for &(w, weight) in &self.adjacency[v] {
                *total.entry(community).or_insert(0.0) += weight;
                if communities[w] == community {
                    *internal.entry(community).or_insert(0.0) += weight;
                }
            }
        }

        total
            .iter()
            .map(|(community, tot)| {
                let inside = internal.get(community).copied().unwrap_or(0.0);
                inside / two_m - (tot / two_m).powi(2)
            })
            .sum()
    }
}

/// Result of community detection
#[derive(Debug, Clone, Serialize)]
pub struct CommunityAssignment {
    /// Node id -> community index
    pub communities: BTreeMap<String, usize>,
    pub community_count: usize,
    pub modularity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A-B-C-D path graph
    fn path_graph() -> UndirectedGraph {
        UndirectedGraph::build(
            ["a", "b", "c", "d"].into_iter(),
            [("a", "b", 1.0), ("b", "c", 1.0), ("c", "d", 1.0)].into_iter(),
        )
    }

    /// Two triangles joined by one bridge edge
    fn two_cliques() -> UndirectedGraph {
        UndirectedGraph::build(
            ["a", "b", "c", "x", "y", "z"].into_iter(),
            [
                ("a", "b", 1.0),
                ("b", "c", 1.0),
                ("a", "c", 1.0),
                ("x", "y", 1.0),
                ("y", "z", 1.0),
                ("x", "z", 1.0),
                ("c", "x", 1.0),
            ]
            .into_iter(),
        )
    }

    #[test]
    fn test_degree_centrality_path_graph() {
        let graph = path_graph();
        let degrees = graph.degree_centrality(false);

        assert_eq!(degrees["a"], 1.0);
        assert_eq!(degrees["b"], 2.0);
        assert_eq!(degrees["c"], 2.0);
        assert_eq!(degrees["d"], 1.0);
    }

    #[test]
    fn test_degree_centrality_normalized() {
        let graph = path_graph();
        let degrees = graph.degree_centrality(true);
        assert!((degrees["b"] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_betweenness_path_graph() {
        let graph = path_graph();
        let centrality = graph.betweenness_centrality(false);

        assert_eq!(centrality["a"], 0.0);
        assert_eq!(centrality["d"], 0.0);
        assert_eq!(centrality["b"], centrality["c"]);
        assert!(centrality["b"] > 0.0);
        // pairs routed through b: (a,c) and (a,d)
        assert_eq!(centrality["b"], 2.0);
    }

    #[test]
    fn test_betweenness_normalized() {
        let graph = path_graph();
        let centrality = graph.betweenness_centrality(true);
        // 2.0 * 2/((4-1)(4-2)) = 2/3
        assert!((centrality["b"] - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_closeness_path_graph() {
        let graph = path_graph();
        let closeness = graph.closeness_centrality(false);

        // a: distances 1+2+3=6, 3 reachable -> 0.5
        assert!((closeness["a"] - 0.5).abs() < 1e-9);
        // b: distances 1+1+2=4 -> 0.75
        assert!((closeness["b"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_closeness_disconnected_component() {
        let graph = UndirectedGraph::build(
            ["a", "b", "c"].into_iter(),
            [("a", "b", 1.0)].into_iter(),
        );
        let closeness = graph.closeness_centrality(true);

        assert_eq!(closeness["c"], 0.0);
        // a reaches 1 of 2 others at distance 1: (1/1) * (1/2)
        assert!((closeness["a"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_communities_two_cliques() {
        let graph = two_cliques();
        let assignment = graph.detect_communities();

        assert_eq!(assignment.community_count, 2);
        assert_eq!(
            assignment.communities["a"],
            assignment.communities["b"]
        );
        assert_eq!(
            assignment.communities["a"],
            assignment.communities["c"]
        );
        assert_eq!(
            assignment.communities["x"],
            assignment.communities["y"]
        );
        assert_ne!(
            assignment.communities["a"],
            assignment.communities["x"]
        );
        assert!(assignment.modularity > 0.0);
    }

    #[test]
    fn test_communities_deterministic() {
        let first = two_cliques().detect_communities();
        let second = two_cliques().detect_communities();
        assert_eq!(first.communities, second.communities);
        assert_eq!(first.modularity, second.modularity);
    }

    #[test]
    fn test_empty_graph() {
        let graph = UndirectedGraph::build(std::iter::empty(), std::iter::empty());
        assert!(graph.is_empty());
        assert!(graph.degree_centrality(true).is_empty());
        assert!(graph.betweenness_centrality(true).is_empty());

        let assignment = graph.detect_communities();
        assert_eq!(assignment.community_count, 0);
        assert_eq!(assignment.modularity, 0.0);
    }

    #[test]
    fn test_from_graph_matches_manual_build() {
        use kgraph_core::{Entity, EntityType, GraphEdge, GraphNode, Relation};

        let mut graph = KnowledgeGraph::new("t");
        graph.insert_node(GraphNode::new("a", Entity::new("A", EntityType::Person)));
        graph.insert_node(GraphNode::new("b", Entity::new("B", EntityType::Person)));
        let relation = Relation::new(
            Entity::new("A", EntityType::Person),
            Entity::new("B", EntityType::Person),
            "relates_to",
        )
        .with_confidence(0.8);
        graph.insert_edge(GraphEdge::new("e", "a", "b", relation));

        let undirected = UndirectedGraph::from_graph(&graph);
        assert_eq!(undirected.len(), 2);
        assert_eq!(undirected.degree_centrality(false)["a"], 1.0);
    }

    #[test]
    fn test_parallel_edges_collapse() {
        let graph = UndirectedGraph::build(
            ["a", "b"].into_iter(),
            [("a", "b", 0.3), ("b", "a", 0.9)].into_iter(),
        );
        let degrees = graph.degree_centrality(false);
        assert_eq!(degrees["a"], 1.0);
    }
}
