//! The query engine over a finished lineage graph.
//!
//! Wraps a petgraph `DiGraph` built once from a [`BuildResult`] and answers
//! read-only queries against it: bounded tracing, the co-writer filter,
//! shortest path and the display direction of mutually-referencing pairs.
//! Nothing here mutates the graph after construction, so one instance can be
//! shared across threads and queried concurrently.

use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::debug;

use super::types::*;
use crate::error::{LineageError, Result};
use crate::name::normalize;

/// An immutable, indexed lineage graph.
#[derive(Debug, Clone, Default)]
pub struct LineageGraph {
    graph: DiGraph<Node, EdgeKind>,
    /// Index: canonical node id -> node index.
    index: HashMap<String, NodeIndex>,
    /// Index: ordered endpoint pair -> edge kind, for constant-time existence tests.
    edge_index: HashMap<(NodeIndex, NodeIndex), EdgeKind>,
}

impl LineageGraph {
    /// Build the graph from node and edge lists. Duplicate node ids, self-loops,
    /// repeated ordered pairs and edges with unknown endpoints are ignored.
    pub fn new(nodes: &[Node], edges: &[Edge]) -> Self {
        let mut lineage = Self::default();
        for node in nodes {
            if lineage.index.contains_key(&node.id) {
                continue;
            }
            let idx = lineage.graph.add_node(node.clone());
            lineage.index.insert(node.id.clone(), idx);
        }

        for edge in edges {
            let (Some(&source), Some(&target)) =
                (lineage.index.get(&edge.source), lineage.index.get(&edge.target))
            else {
                continue;
            };
            if source == target || lineage.edge_index.contains_key(&(source, target)) {
                continue;
            }
            lineage.graph.add_edge(source, target, edge.kind);
            lineage.edge_index.insert((source, target), edge.kind);
        }

        debug!(
            nodes = lineage.graph.node_count(),
            edges = lineage.graph.edge_count(),
            "lineage graph indexed"
        );
        lineage
    }

    pub fn from_build(result: &BuildResult) -> Self {
        Self::new(&result.nodes, &result.edges)
    }

    /// Access the underlying petgraph.
    pub(crate) fn inner(&self) -> &DiGraph<Node, EdgeKind> {
        &self.graph
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn has_edge_between(&self, source: NodeIndex, target: NodeIndex) -> bool {
        self.edge_index.contains_key(&(source, target))
    }

    // ─── Lookup ─────────────────────────────────────────────────

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Look up a node by its canonical id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|idx| &self.graph[idx])
    }

    /// Look up a node by any spelling of its qualified name.
    pub fn resolve(&self, raw: &str) -> Option<&Node> {
        self.node(&normalize(raw))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Edges in insertion order.
    pub fn edges(&self) -> Vec<Edge> {
        self.graph
            .edge_references()
            .map(|e| {
                Edge::new(
                    &self.graph[e.source()].id,
                    &self.graph[e.target()].id,
                    *e.weight(),
                )
            })
            .collect()
    }

    pub fn has_edge(&self, source: &str, target: &str) -> bool {
        self.edge_kind(source, target).is_some()
    }

    pub fn edge_kind(&self, source: &str, target: &str) -> Option<EdgeKind> {
        let source = self.index_of(source)?;
        let target = self.index_of(target)?;
        self.edge_index.get(&(source, target)).copied()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.neighbor_count(id, Direction::Incoming)
    }

    pub fn out_degree(&self, id: &str) -> usize {
        self.neighbor_count(id, Direction::Outgoing)
    }

    /// Total degree (in + out).
    pub fn degree(&self, id: &str) -> usize {
        self.in_degree(id) + self.out_degree(id)
    }

    /// Direct predecessors: objects this node reads from or is called by.
    pub fn upstream(&self, id: &str) -> Vec<&Node> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct successors: objects this node writes to or calls.
    pub fn downstream(&self, id: &str) -> Vec<&Node> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbor_count(&self, id: &str, dir: Direction) -> usize {
        self.index_of(id)
            .map(|idx| self.graph.edges_directed(idx, dir).count())
            .unwrap_or(0)
    }

    fn neighbors(&self, id: &str, dir: Direction) -> Vec<&Node> {
        let Some(idx) = self.index_of(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, dir).collect();
        found.sort();
        found.into_iter().map(|n| &self.graph[n]).collect()
    }

    fn require(&self, raw: &str) -> Result<NodeIndex> {
        self.index_of(&normalize(raw))
            .ok_or_else(|| LineageError::NodeNotFound(raw.to_string()))
    }

    // ─── Statistics ─────────────────────────────────────────────

    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_kind = BTreeMap::new();
        for node in self.graph.node_weights() {
            *nodes_by_kind.entry(node.kind.to_string()).or_insert(0) += 1;
        }
        let call_edges = self
            .graph
            .edge_weights()
            .filter(|kind| **kind == EdgeKind::Call)
            .count();

        GraphStats {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            call_edge_count: call_edges,
            nodes_by_kind,
            bidirectional_pairs: self.bidirectional_pairs().len(),
        }
    }

    // ─── Trace ──────────────────────────────────────────────────

    /// Bounded upstream/downstream trace around `origin`.
    ///
    /// A depth of 0 disables that direction. Edges are kept only when they flow
    /// toward the origin on the upstream side or away from it on the downstream
    /// side, which leaves out edges that merely connect two traced neighbours.
    pub fn trace(
        &self,
        origin: &str,
        upstream_depth: usize,
        downstream_depth: usize,
        hide_co_writers: bool,
    ) -> Result<TraceResult> {
        let start = self.require(origin)?;

        let (up, up_order) = self.depth_map(start, Direction::Incoming, upstream_depth);
        let (down, down_order) = self.depth_map(start, Direction::Outgoing, downstream_depth);

        let mut traced: Vec<NodeIndex> = Vec::new();
        let mut seen: HashSet<NodeIndex> = HashSet::new();
        for idx in up_order.into_iter().chain(down_order) {
            if seen.insert(idx) {
                traced.push(idx);
            }
        }

        let excluded = if hide_co_writers {
            self.co_writers(start, &traced)
        } else {
            HashSet::new()
        };
        traced.retain(|idx| !excluded.contains(idx));

        let mut edge_ids = Vec::new();
        for edge in self.graph.edge_references() {
            let (a, b) = (edge.source(), edge.target());
            if excluded.contains(&a) || excluded.contains(&b) {
                continue;
            }
            let flows_in = matches!((up.get(&a), up.get(&b)), (Some(da), Some(db)) if da > db);
            let flows_out =
                matches!((down.get(&a), down.get(&b)), (Some(da), Some(db)) if db > da);
            if flows_in || flows_out {
                edge_ids.push(edge_id(&self.graph[a].id, &self.graph[b].id));
            }
        }

        let mut excluded_ids: Vec<String> =
            excluded.iter().map(|&idx| self.graph[idx].id.clone()).collect();
        excluded_ids.sort();

        debug!(
            origin = %self.graph[start].id,
            nodes = traced.len(),
            edges = edge_ids.len(),
            excluded = excluded_ids.len(),
            "trace complete"
        );

        Ok(TraceResult {
            origin: self.graph[start].id.clone(),
            node_ids: traced.iter().map(|&idx| self.graph[idx].id.clone()).collect(),
            edge_ids,
            excluded: excluded_ids,
        })
    }

    /// Breadth-first hop counts from `start` in one direction, plus visit order.
    fn depth_map(
        &self,
        start: NodeIndex,
        dir: Direction,
        max_depth: usize,
    ) -> (HashMap<NodeIndex, usize>, Vec<NodeIndex>) {
        let mut depths = HashMap::from([(start, 0)]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([(start, 0usize)]);

        while let Some((idx, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for next in self.graph.neighbors_directed(idx, dir) {
                if depths.contains_key(&next) {
                    continue;
                }
                depths.insert(next, depth + 1);
                order.push(next);
                queue.push_back((next, depth + 1));
            }
        }
        (depths, order)
    }

    /// Traced nodes that write one of the origin's write targets without ever
    /// reading a target they write. Only routines write, so tracing from a
    /// table or view excludes nothing.
    fn co_writers(&self, origin: NodeIndex, traced: &[NodeIndex]) -> HashSet<NodeIndex> {
        if !self.graph[origin].kind.is_routine() {
            return HashSet::new();
        }
        let targets: HashSet<NodeIndex> = self
            .graph
            .edges_directed(origin, Direction::Outgoing)
            .filter(|e| *e.weight() == EdgeKind::Reference)
            .map(|e| e.target())
            .filter(|&t| self.graph[t].kind.is_data())
            .collect();
        if targets.is_empty() {
            return HashSet::new();
        }

        traced
            .iter()
            .copied()
            .filter(|&idx| idx != origin)
            .filter(|&idx| {
                let written: Vec<NodeIndex> = self
                    .graph
                    .edges_directed(idx, Direction::Outgoing)
                    .filter(|e| *e.weight() == EdgeKind::Reference)
                    .map(|e| e.target())
                    .filter(|t| targets.contains(t))
                    .collect();
                !written.is_empty() && written.iter().all(|&t| !self.has_edge_between(t, idx))
            })
            .collect()
    }

    // ─── Paths ──────────────────────────────────────────────────

    /// Fewest-hop directed path from `from` to `to`, falling back to `to -> from`.
    /// `Ok(None)` when neither direction connects.
    pub fn shortest_path(&self, from: &str, to: &str) -> Result<Option<PathResult>> {
        let a = self.require(from)?;
        let b = self.require(to)?;

        if let Some(path) = self.directed_path(a, b) {
            return Ok(Some(self.path_result(path, false)));
        }
        Ok(self
            .directed_path(b, a)
            .map(|path| self.path_result(path, true)))
    }

    fn directed_path(&self, from: NodeIndex, to: NodeIndex) -> Option<Vec<NodeIndex>> {
        astar(&self.graph, from, |n| n == to, |_| 1usize, |_| 0)
            .map(|(_cost, path)| path)
    }

    fn path_result(&self, path: Vec<NodeIndex>, reversed: bool) -> PathResult {
        let edge_ids = path
            .windows(2)
            .map(|pair| edge_id(&self.graph[pair[0]].id, &self.graph[pair[1]].id))
            .collect();
        PathResult {
            node_ids: path.iter().map(|&idx| self.graph[idx].id.clone()).collect(),
            edge_ids,
            reversed,
        }
    }

    // ─── Bidirectional Pairs ────────────────────────────────────

    /// Every pair joined by edges in both directions, listed once in canonical
    /// display direction. The two underlying edges stay in the graph.
    pub fn bidirectional_pairs(&self) -> Vec<BidirectionalPair> {
        let mut pairs: Vec<BidirectionalPair> = self
            .edge_index
            .iter()
            .filter(|((a, b), _)| a < b && self.has_edge_between(*b, *a))
            .map(|((a, b), _)| {
                let (from, to) = canonical_direction(&self.graph[*a], &self.graph[*b]);
                BidirectionalPair {
                    from: from.id.clone(),
                    to: to.id.clone(),
                    forward_kind: self.edge_index[&(self.index[&from.id], self.index[&to.id])],
                    reverse_kind: self.edge_index[&(self.index[&to.id], self.index[&from.id])],
                }
            })
            .collect();
        pairs.sort_by(|x, y| (&x.from, &x.to).cmp(&(&y.from, &y.to)));
        pairs
    }
}

/// Display order for two nodes: routine before data object, otherwise
/// lexical by id.
pub fn canonical_direction<'a>(a: &'a Node, b: &'a Node) -> (&'a Node, &'a Node) {
    match (a.kind.is_routine(), b.kind.is_routine()) {
        (true, false) if b.kind.is_data() => (a, b),
        (false, true) if a.kind.is_data() => (b, a),
        _ if a.id <= b.id => (a, b),
        _ => (b, a),
    }
}

// ─── Query Results ──────────────────────────────────────────────

/// Nodes and edges reached by a bounded trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceResult {
    pub origin: String,
    /// Origin first, then upstream and downstream nodes in BFS order.
    pub node_ids: Vec<String>,
    pub edge_ids: Vec<String>,
    /// Sibling writers removed by the co-writer filter.
    pub excluded: Vec<String>,
}

/// A directed path between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathResult {
    pub node_ids: Vec<String>,
    pub edge_ids: Vec<String>,
    /// True when only the reverse direction (`to -> from`) connected.
    pub reversed: bool,
}

/// Two nodes joined by edges in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidirectionalPair {
    pub from: String,
    pub to: String,
    pub forward_kind: EdgeKind,
    pub reverse_kind: EdgeKind,
}

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub call_edge_count: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub bidirectional_pairs: usize,
}
