//! Topology analytics over a finished lineage graph.
//!
//! Every analysis is a pure read of a [`LineageGraph`]: islands (undirected
//! components of two or more nodes), hubs, orphans grouped by schema and type,
//! longest forward chains and cycles. All of them accept an empty graph and
//! terminate on cyclic input.

use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::graph::{LineageGraph, NodeKind};

/// Which analysis to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    Islands,
    Hubs,
    Orphans,
    LongestPath,
    Cycles,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Islands,
        AnalysisKind::Hubs,
        AnalysisKind::Orphans,
        AnalysisKind::LongestPath,
        AnalysisKind::Cycles,
    ];
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisKind::Islands => write!(f, "islands"),
            AnalysisKind::Hubs => write!(f, "hubs"),
            AnalysisKind::Orphans => write!(f, "orphans"),
            AnalysisKind::LongestPath => write!(f, "longest-path"),
            AnalysisKind::Cycles => write!(f, "cycles"),
        }
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "islands" => Ok(AnalysisKind::Islands),
            "hubs" => Ok(AnalysisKind::Hubs),
            "orphans" => Ok(AnalysisKind::Orphans),
            "longest-path" => Ok(AnalysisKind::LongestPath),
            "cycles" => Ok(AnalysisKind::Cycles),
            other => Err(format!(
                "unknown analysis '{}' (expected islands, hubs, orphans, longest-path or cycles)",
                other
            )),
        }
    }
}

/// Thresholds for the analyses, loaded from the `[analysis]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Islands larger than this are left out. `None` keeps every island.
    pub island_max_size: Option<usize>,
    /// Minimum total degree for a hub.
    pub hub_min_degree: usize,
    /// Chains with fewer nodes are left out.
    pub longest_path_min_nodes: usize,
    /// Maximum number of chains reported.
    pub max_chains: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            island_max_size: None,
            hub_min_degree: 5,
            longest_path_min_nodes: 3,
            max_chains: 10,
        }
    }
}

/// What a group in an analysis result represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Island,
    Hub,
    Orphans,
    Chain,
    /// A strongly connected component of three or more nodes.
    Cycle,
    /// Two nodes referencing each other.
    Bidirectional,
}

/// One group of nodes reported by an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisGroup {
    pub kind: GroupKind,
    pub label: String,
    pub node_ids: Vec<String>,
    /// Ranking value: component size, degree, group size or chain length.
    pub weight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub kind: AnalysisKind,
    pub groups: Vec<AnalysisGroup>,
    /// One-line human readable description of the result.
    pub summary: String,
}

/// Run one analysis over `graph`.
pub fn analyze(graph: &LineageGraph, kind: AnalysisKind, config: &AnalysisConfig) -> AnalysisResult {
    if graph.is_empty() {
        return AnalysisResult {
            kind,
            groups: Vec::new(),
            summary: format!("{}: graph is empty", kind),
        };
    }

    let (groups, summary) = match kind {
        AnalysisKind::Islands => islands(graph, config),
        AnalysisKind::Hubs => hubs(graph, config),
        AnalysisKind::Orphans => orphans(graph),
        AnalysisKind::LongestPath => longest_paths(graph, config),
        AnalysisKind::Cycles => cycles(graph),
    };
    debug!(analysis = %kind, groups = groups.len(), "analysis complete");

    AnalysisResult {
        kind,
        groups,
        summary,
    }
}

fn ids(graph: &LineageGraph, nodes: &[NodeIndex]) -> Vec<String> {
    nodes.iter().map(|&idx| graph.inner()[idx].id.clone()).collect()
}

// ─── Islands ────────────────────────────────────────────────────

fn islands(graph: &LineageGraph, config: &AnalysisConfig) -> (Vec<AnalysisGroup>, String) {
    let inner = graph.inner();
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut components: Vec<Vec<NodeIndex>> = Vec::new();

    for start in inner.node_indices() {
        if !seen.insert(start) {
            continue;
        }
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            for next in inner.neighbors_undirected(idx) {
                if seen.insert(next) {
                    component.push(next);
                    queue.push_back(next);
                }
            }
        }
        components.push(component);
    }

    let total = components.len();
    let mut kept: Vec<Vec<NodeIndex>> = components
        .into_iter()
        .filter(|c| c.len() > 1)
        .filter(|c| config.island_max_size.map_or(true, |max| c.len() <= max))
        .collect();
    kept.sort_by_key(|c| c.len());

    let groups: Vec<AnalysisGroup> = kept
        .iter()
        .enumerate()
        .map(|(i, component)| AnalysisGroup {
            kind: GroupKind::Island,
            label: format!("island {} ({} nodes)", i + 1, component.len()),
            node_ids: ids(graph, component),
            weight: component.len(),
        })
        .collect();

    let summary = if groups.is_empty() {
        format!("no islands among {} connected components", total)
    } else {
        format!(
            "{} islands of {} connected components",
            groups.len(),
            total
        )
    };
    (groups, summary)
}

// ─── Hubs ───────────────────────────────────────────────────────

fn hubs(graph: &LineageGraph, config: &AnalysisConfig) -> (Vec<AnalysisGroup>, String) {
    let inner = graph.inner();
    let mut ranked: Vec<(NodeIndex, usize)> = inner
        .node_indices()
        .map(|idx| (idx, degree(graph, idx)))
        .filter(|&(_, d)| d >= config.hub_min_degree)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let groups: Vec<AnalysisGroup> = ranked
        .iter()
        .map(|&(idx, d)| AnalysisGroup {
            kind: GroupKind::Hub,
            label: format!("{} ({} connections)", inner[idx].full_name, d),
            node_ids: vec![inner[idx].id.clone()],
            weight: d,
        })
        .collect();

    let summary = if groups.is_empty() {
        format!("no nodes with degree >= {}", config.hub_min_degree)
    } else {
        format!(
            "{} hubs with degree >= {}",
            groups.len(),
            config.hub_min_degree
        )
    };
    (groups, summary)
}

fn degree(graph: &LineageGraph, idx: NodeIndex) -> usize {
    let inner = graph.inner();
    inner.edges_directed(idx, Direction::Incoming).count()
        + inner.edges_directed(idx, Direction::Outgoing).count()
}

// ─── Orphans ────────────────────────────────────────────────────

fn orphans(graph: &LineageGraph) -> (Vec<AnalysisGroup>, String) {
    let inner = graph.inner();
    let mut order: Vec<(String, NodeKind)> = Vec::new();
    let mut grouped: HashMap<(String, NodeKind), Vec<NodeIndex>> = HashMap::new();

    for idx in inner.node_indices().filter(|&idx| degree(graph, idx) == 0) {
        let key = (inner[idx].schema.clone(), inner[idx].kind);
        let members = grouped.entry(key.clone()).or_default();
        if members.is_empty() {
            order.push(key);
        }
        members.push(idx);
    }

    let mut groups: Vec<AnalysisGroup> = order
        .into_iter()
        .filter_map(|key| {
            let members = grouped.remove(&key)?;
            let (schema, kind) = key;
            Some(AnalysisGroup {
                kind: GroupKind::Orphans,
                label: format!("{} {}", schema, kind),
                node_ids: ids(graph, &members),
                weight: members.len(),
            })
        })
        .collect();
    groups.sort_by(|a, b| b.weight.cmp(&a.weight));

    let count: usize = groups.iter().map(|g| g.weight).sum();
    let summary = if count == 0 {
        "no orphan nodes".to_string()
    } else {
        format!("{} orphan nodes in {} groups", count, groups.len())
    };
    (groups, summary)
}

// ─── Longest Path ───────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

struct Frame {
    node: NodeIndex,
    children: Vec<NodeIndex>,
    cursor: usize,
}

/// Longest forward chain length (in edges) from every node, with the successor
/// that achieves it. Iterative so deep graphs cannot overflow the stack; an
/// edge back into a node still on the stack counts as one final hop.
fn chain_depths(graph: &LineageGraph) -> (Vec<usize>, Vec<Option<NodeIndex>>) {
    let inner = graph.inner();
    let n = inner.node_count();
    let mut marks = vec![Mark::Unvisited; n];
    let mut depth = vec![0usize; n];
    let mut next: Vec<Option<NodeIndex>> = vec![None; n];

    let children = |idx: NodeIndex| {
        let mut out: Vec<NodeIndex> = inner.neighbors_directed(idx, Direction::Outgoing).collect();
        out.sort();
        out
    };

    for start in inner.node_indices() {
        if marks[start.index()] != Mark::Unvisited {
            continue;
        }
        marks[start.index()] = Mark::Visiting;
        let mut stack = vec![Frame {
            node: start,
            children: children(start),
            cursor: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let node = frame.node;
            match frame.children.get(frame.cursor).copied() {
                Some(child) => {
                    frame.cursor += 1;
                    match marks[child.index()] {
                        Mark::Unvisited => {
                            marks[child.index()] = Mark::Visiting;
                            stack.push(Frame {
                                node: child,
                                children: children(child),
                                cursor: 0,
                            });
                        }
                        Mark::Visiting => relax(&mut depth, &mut next, node, child, 1),
                        Mark::Done => {
                            let candidate = depth[child.index()] + 1;
                            relax(&mut depth, &mut next, node, child, candidate);
                        }
                    }
                }
                None => {
                    marks[node.index()] = Mark::Done;
                    stack.pop();
                    if let Some(parent) = stack.last() {
                        let candidate = depth[node.index()] + 1;
                        relax(&mut depth, &mut next, parent.node, node, candidate);
                    }
                }
            }
        }
    }

    (depth, next)
}

fn relax(
    depth: &mut [usize],
    next: &mut [Option<NodeIndex>],
    from: NodeIndex,
    to: NodeIndex,
    candidate: usize,
) {
    if candidate > depth[from.index()] {
        depth[from.index()] = candidate;
        next[from.index()] = Some(to);
    }
}

fn longest_paths(graph: &LineageGraph, config: &AnalysisConfig) -> (Vec<AnalysisGroup>, String) {
    let inner = graph.inner();
    let (depth, next) = chain_depths(graph);

    let mut starts: Vec<NodeIndex> = inner
        .node_indices()
        .filter(|&idx| depth[idx.index()] > 0)
        .filter(|&idx| {
            inner
                .neighbors_directed(idx, Direction::Incoming)
                .next()
                .is_none()
        })
        .collect();
    if starts.is_empty() {
        starts = inner
            .node_indices()
            .filter(|&idx| depth[idx.index()] > 0)
            .collect();
    }

    let mut chains: Vec<Vec<NodeIndex>> = starts
        .into_iter()
        .map(|start| {
            let mut chain = vec![start];
            let mut seen = HashSet::from([start]);
            let mut cursor = start;
            while let Some(step) = next[cursor.index()] {
                if !seen.insert(step) {
                    break;
                }
                chain.push(step);
                cursor = step;
            }
            chain
        })
        .collect();
    chains.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut terminals: HashSet<NodeIndex> = HashSet::new();
    let kept: Vec<Vec<NodeIndex>> = chains
        .into_iter()
        .filter(|chain| chain.last().is_some_and(|&end| terminals.insert(end)))
        .filter(|chain| chain.len() >= config.longest_path_min_nodes)
        .take(config.max_chains)
        .collect();

    let groups: Vec<AnalysisGroup> = kept
        .iter()
        .map(|chain| {
            let first = &inner[chain[0]].full_name;
            let last = &inner[chain[chain.len() - 1]].full_name;
            AnalysisGroup {
                kind: GroupKind::Chain,
                label: format!("{} -> {} ({} nodes)", first, last, chain.len()),
                node_ids: ids(graph, chain),
                weight: chain.len(),
            }
        })
        .collect();

    let summary = match groups.first() {
        Some(longest) => format!(
            "{} chains, longest has {} nodes",
            groups.len(),
            longest.weight
        ),
        None => format!(
            "no chains with at least {} nodes",
            config.longest_path_min_nodes
        ),
    };
    (groups, summary)
}

// ─── Cycles ─────────────────────────────────────────────────────

fn cycles(graph: &LineageGraph) -> (Vec<AnalysisGroup>, String) {
    let mut components: Vec<Vec<String>> = tarjan_scc(graph.inner())
        .into_iter()
        .filter(|scc| scc.len() > 2)
        .map(|scc| {
            let mut members = ids(graph, &scc);
            members.sort();
            members
        })
        .collect();
    components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut groups: Vec<AnalysisGroup> = components
        .into_iter()
        .enumerate()
        .map(|(i, members)| AnalysisGroup {
            kind: GroupKind::Cycle,
            label: format!("cycle {} ({} nodes)", i + 1, members.len()),
            weight: members.len(),
            node_ids: members,
        })
        .collect();
    let cycle_count = groups.len();

    for pair in graph.bidirectional_pairs() {
        groups.push(AnalysisGroup {
            kind: GroupKind::Bidirectional,
            label: format!("{} <-> {}", pair.from, pair.to),
            node_ids: vec![pair.from, pair.to],
            weight: 2,
        });
    }
    let pair_count = groups.len() - cycle_count;

    let summary = if groups.is_empty() {
        "no cycles".to_string()
    } else {
        format!(
            "{} cycles and {} bidirectional pairs",
            cycle_count, pair_count
        )
    };
    (groups, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeKind, Node};
    use crate::name::{normalize, parse};

    fn node(raw: &str, kind: NodeKind) -> Node {
        let name = parse(raw);
        Node {
            id: name.canonical_id(),
            schema: name.display_schema(),
            name: name.object.clone(),
            full_name: raw.to_string(),
            kind,
            body: None,
        }
    }

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> LineageGraph {
        let nodes: Vec<Node> = nodes.iter().map(|n| node(n, NodeKind::Table)).collect();
        let edges: Vec<Edge> = edges
            .iter()
            .map(|(s, t)| Edge::new(&normalize(s), &normalize(t), EdgeKind::Reference))
            .collect();
        LineageGraph::new(&nodes, &edges)
    }

    #[test]
    fn test_every_analysis_handles_empty_graph() {
        let graph = LineageGraph::default();
        for kind in AnalysisKind::ALL {
            let result = analyze(&graph, kind, &AnalysisConfig::default());
            assert!(result.groups.is_empty(), "{kind} on empty graph");
            assert!(result.summary.contains("empty"));
        }
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            "longest-path".parse::<AnalysisKind>().unwrap(),
            AnalysisKind::LongestPath
        );
        assert_eq!(
            "Longest_Path".parse::<AnalysisKind>().unwrap(),
            AnalysisKind::LongestPath
        );
        assert!("paths".parse::<AnalysisKind>().is_err());
        assert_eq!(AnalysisKind::LongestPath.to_string(), "longest-path");
    }

    #[test]
    fn test_isolated_nodes_are_not_islands() {
        let graph = graph(&["dbo.A", "dbo.B", "dbo.C"], &[]);
        let result = analyze(&graph, AnalysisKind::Islands, &AnalysisConfig::default());
        assert!(result.groups.is_empty(), "lone nodes are orphans");
    }

    #[test]
    fn test_islands_sorted_ascending_and_capped() {
        let graph = graph(
            &["dbo.A", "dbo.B", "dbo.C", "dbo.D", "dbo.E", "dbo.F"],
            &[
                ("dbo.A", "dbo.B"),
                ("dbo.C", "dbo.B"),
                ("dbo.D", "dbo.E"),
            ],
        );
        let result = analyze(&graph, AnalysisKind::Islands, &AnalysisConfig::default());
        let sizes: Vec<usize> = result.groups.iter().map(|g| g.weight).collect();
        assert_eq!(sizes, vec![2, 3]);

        let config = AnalysisConfig {
            island_max_size: Some(2),
            ..Default::default()
        };
        let result = analyze(&graph, AnalysisKind::Islands, &config);
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].node_ids, vec!["[dbo].[d]", "[dbo].[e]"]);
    }

    #[test]
    fn test_hubs_ranked_by_degree() {
        let graph = graph(
            &["dbo.Hub", "dbo.A", "dbo.B", "dbo.C", "dbo.Mid"],
            &[
                ("dbo.A", "dbo.Hub"),
                ("dbo.B", "dbo.Hub"),
                ("dbo.Hub", "dbo.C"),
                ("dbo.A", "dbo.Mid"),
                ("dbo.Mid", "dbo.C"),
            ],
        );
        let config = AnalysisConfig {
            hub_min_degree: 2,
            ..Default::default()
        };
        let result = analyze(&graph, AnalysisKind::Hubs, &config);
        let ranked: Vec<(&str, usize)> = result
            .groups
            .iter()
            .map(|g| (g.node_ids[0].as_str(), g.weight))
            .collect();
        assert_eq!(
            ranked,
            vec![
                ("[dbo].[hub]", 3),
                ("[dbo].[a]", 2),
                ("[dbo].[c]", 2),
                ("[dbo].[mid]", 2),
            ],
            "ties keep node order"
        );
    }

    #[test]
    fn test_orphans_grouped_by_schema_and_kind() {
        let nodes = vec![
            node("dbo.A", NodeKind::Table),
            node("dbo.B", NodeKind::Table),
            node("rpt.V", NodeKind::View),
            node("dbo.P", NodeKind::Procedure),
            node("dbo.Linked", NodeKind::Table),
        ];
        let edges = vec![Edge::new("[dbo].[p]", "[dbo].[linked]", EdgeKind::Reference)];
        let graph = LineageGraph::new(&nodes, &edges);

        let result = analyze(&graph, AnalysisKind::Orphans, &AnalysisConfig::default());
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].label, "DBO table");
        assert_eq!(result.groups[0].weight, 2);
        assert_eq!(result.groups[1].node_ids, vec!["[rpt].[v]"]);
        assert!(result.summary.starts_with("3 orphan nodes"));
    }

    #[test]
    fn test_longest_path_chain() {
        let graph = graph(
            &["dbo.A", "dbo.B", "dbo.C", "dbo.D", "dbo.X"],
            &[
                ("dbo.A", "dbo.B"),
                ("dbo.B", "dbo.C"),
                ("dbo.C", "dbo.D"),
                ("dbo.X", "dbo.C"),
            ],
        );
        let result = analyze(&graph, AnalysisKind::LongestPath, &AnalysisConfig::default());
        assert_eq!(result.groups.len(), 1, "X's chain ends at D too");
        assert_eq!(
            result.groups[0].node_ids,
            vec!["[dbo].[a]", "[dbo].[b]", "[dbo].[c]", "[dbo].[d]"]
        );
        assert_eq!(result.groups[0].weight, 4);
    }

    #[test]
    fn test_longest_path_terminates_on_cycle() {
        let graph = graph(
            &["dbo.A", "dbo.B", "dbo.C"],
            &[("dbo.A", "dbo.B"), ("dbo.B", "dbo.C"), ("dbo.C", "dbo.A")],
        );
        let result = analyze(&graph, AnalysisKind::LongestPath, &AnalysisConfig::default());
        for group in &result.groups {
            let unique: HashSet<&String> = group.node_ids.iter().collect();
            assert_eq!(unique.len(), group.node_ids.len(), "chain repeats a node");
            assert!(group.node_ids.len() <= 3);
        }
    }

    #[test]
    fn test_longest_path_respects_limits() {
        let graph = graph(
            &["dbo.A", "dbo.B", "dbo.C", "dbo.D"],
            &[("dbo.A", "dbo.B"), ("dbo.C", "dbo.D")],
        );
        let result = analyze(&graph, AnalysisKind::LongestPath, &AnalysisConfig::default());
        assert!(result.groups.is_empty(), "two-node chains are below the minimum");

        let config = AnalysisConfig {
            longest_path_min_nodes: 2,
            max_chains: 1,
            ..Default::default()
        };
        let result = analyze(&graph, AnalysisKind::LongestPath, &config);
        assert_eq!(result.groups.len(), 1);
    }

    #[test]
    fn test_cycles_and_bidirectional_pairs() {
        let graph = graph(
            &["dbo.A", "dbo.B", "dbo.C", "dbo.P", "dbo.Q", "dbo.Z"],
            &[
                ("dbo.A", "dbo.B"),
                ("dbo.B", "dbo.C"),
                ("dbo.C", "dbo.A"),
                ("dbo.P", "dbo.Q"),
                ("dbo.Q", "dbo.P"),
                ("dbo.Z", "dbo.A"),
            ],
        );
        let result = analyze(&graph, AnalysisKind::Cycles, &AnalysisConfig::default());
        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].kind, GroupKind::Cycle);
        assert_eq!(
            result.groups[0].node_ids,
            vec!["[dbo].[a]", "[dbo].[b]", "[dbo].[c]"]
        );
        assert_eq!(result.groups[1].kind, GroupKind::Bidirectional);
        assert_eq!(result.groups[1].node_ids, vec!["[dbo].[p]", "[dbo].[q]"]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let graph = graph(&["dbo.A", "dbo.B"], &[("dbo.A", "dbo.B")]);
        let result = analyze(&graph, AnalysisKind::Cycles, &AnalysisConfig::default());
        assert!(result.groups.is_empty());
        assert_eq!(result.summary, "no cycles");
    }
}
