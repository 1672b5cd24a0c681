//! # Graph
//!
//! Dataflow graphs: nodes wired by directed edges.
//!
//! Graphs are assembled with a [`GraphBuilder`]. Every wiring call goes
//! through the builder value, there is no hidden global state. An edge runs
//! from a producer node to a consumer node and may carry a [`KeySelector`]
//! deciding how the consumer's input is partitioned, plus an optional name.
//!
//! [`GraphBuilder::build`] validates the graph (known endpoints, positive
//! parallelism, no cycles) and returns an immutable [`Graph`] ready for the
//! [`Engine`](crate::engine::Engine).
//!
//! ## Traversal
//!
//! [`Graph::walk`] visits every edge exactly once, breadth-first from the
//! roots (nodes without inbound edges), layer by layer. Within a layer nodes
//! are ordered by name and then by insertion order, and each node's outbound
//! edges are visited in the order they were connected. The result does not
//! depend on hashing or on the run.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::collector::Collector;
//! use slipstream::graph::GraphBuilder;
//! use slipstream::node::{FnNode, LogSink, NodeBuilderExt};
//! use slipstream::value::Value;
//!
//! let mut g = GraphBuilder::new();
//! let source = g.add(
//!   FnNode::new(|out: &dyn Collector, _: Value| {
//!     out.collect(Value::from(1i64));
//!     Ok(())
//!   })
//!   .named("source"),
//! );
//! let (sink, _log) = LogSink::new();
//! g.out(source).named("results").connect(sink.named("sink"));
//!
//! let graph = g.build().unwrap();
//! assert_eq!(graph.to_string(), "source -> sink\n");
//! ```

use crate::error::GraphError;
use crate::key::KeySelector;
use crate::node::Node;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// Handle to a node added to a [`GraphBuilder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
  /// Position of the node in insertion order.
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A directed connection from a producer to a consumer.
pub struct Edge {
  from: NodeId,
  to: NodeId,
  name: Option<String>,
  selector: Option<Box<dyn KeySelector>>,
}

impl Edge {
  /// The producing node.
  pub fn from(&self) -> NodeId {
    self.from
  }

  /// The consuming node.
  pub fn to(&self) -> NodeId {
    self.to
  }

  /// The edge name, if one was given.
  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  /// The key selector partitioning the consumer's input, if any.
  pub fn selector(&self) -> Option<&dyn KeySelector> {
    self.selector.as_deref()
  }

  /// Removes and returns the key selector.
  pub fn take_selector(&mut self) -> Option<Box<dyn KeySelector>> {
    self.selector.take()
  }
}

impl fmt::Debug for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Edge")
      .field("from", &self.from)
      .field("to", &self.to)
      .field("name", &self.name)
      .field("selector", &self.selector.as_ref().map(|s| s.name().to_string()))
      .finish()
  }
}

/// Accumulates nodes and edges.
#[derive(Default)]
pub struct GraphBuilder {
  nodes: Vec<Box<dyn Node>>,
  edges: Vec<Edge>,
}

impl GraphBuilder {
  /// Creates an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a node and returns its handle.
  pub fn add<N: Node>(&mut self, node: N) -> NodeId {
    self.add_boxed(Box::new(node))
  }

  /// Adds an already boxed node and returns its handle.
  pub fn add_boxed(&mut self, node: Box<dyn Node>) -> NodeId {
    self.nodes.push(node);
    NodeId(self.nodes.len() - 1)
  }

  /// Returns the node behind `id`.
  pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
    self.nodes.get(id.0).map(|n| &**n)
  }

  /// Returns the node behind `id` mutably, to rename it or change its
  /// parallelism after it was added.
  pub fn node_mut(&mut self, id: NodeId) -> Option<&mut dyn Node> {
    match self.nodes.get_mut(id.0) {
      Some(node) => Some(&mut **node),
      None => None,
    }
  }

  /// Starts an edge out of `from`.
  pub fn out(&mut self, from: NodeId) -> EdgeBuilder<'_> {
    EdgeBuilder {
      builder: self,
      from,
      name: None,
      selector: None,
    }
  }

  /// Connects two existing nodes with a plain edge.
  pub fn connect(&mut self, from: NodeId, to: NodeId) {
    self.out(from).connect_to(to);
  }

  /// Validates the accumulated nodes and edges.
  pub fn build(self) -> Result<Graph, GraphError> {
    for edge in &self.edges {
      for id in [edge.from, edge.to] {
        if id.0 >= self.nodes.len() {
          return Err(GraphError::UnknownNode(id));
        }
      }
    }
    for node in &self.nodes {
      if node.parallelism() == 0 {
        return Err(GraphError::InvalidParallelism {
          node: node.name().to_string(),
          parallelism: 0,
        });
      }
    }
    let graph = Graph::new(self.nodes, self.edges);
    graph.check_acyclic()?;
    Ok(graph)
  }
}

/// Configures one edge out of a node.
pub struct EdgeBuilder<'a> {
  builder: &'a mut GraphBuilder,
  from: NodeId,
  name: Option<String>,
  selector: Option<Box<dyn KeySelector>>,
}

impl EdgeBuilder<'_> {
  /// Partitions the consumer's input with `selector`.
  pub fn key_by<K: KeySelector + 'static>(mut self, selector: K) -> Self {
    self.selector = Some(Box::new(selector));
    self
  }

  /// Names the edge.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  /// Adds `node` and connects the edge to it. Returns the new node's handle.
  pub fn connect<N: Node>(self, node: N) -> NodeId {
    let to = self.builder.add(node);
    self.connect_to(to)
  }

  /// Connects the edge to a node that was already added. Returns `to`.
  pub fn connect_to(self, to: NodeId) -> NodeId {
    self.builder.edges.push(Edge {
      from: self.from,
      to,
      name: self.name,
      selector: self.selector,
    });
    to
  }
}

/// A validated, acyclic dataflow graph.
pub struct Graph {
  nodes: Vec<Box<dyn Node>>,
  edges: Vec<Edge>,
  outgoing: Vec<Vec<usize>>,
  incoming: Vec<Vec<usize>>,
}

impl Graph {
  fn new(nodes: Vec<Box<dyn Node>>, edges: Vec<Edge>) -> Self {
    let mut outgoing = vec![Vec::new(); nodes.len()];
    let mut incoming = vec![Vec::new(); nodes.len()];
    for (i, edge) in edges.iter().enumerate() {
      outgoing[edge.from.0].push(i);
      incoming[edge.to.0].push(i);
    }
    Self {
      nodes,
      edges,
      outgoing,
      incoming,
    }
  }

  /// Number of nodes.
  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  /// Returns the node behind `id`.
  pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
    self.nodes.get(id.0).map(|n| &**n)
  }

  /// All edges in the order they were connected.
  pub fn edges(&self) -> &[Edge] {
    &self.edges
  }

  /// Edges into `id`, in the order they were connected.
  pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
    self.incoming.get(id.0).into_iter().flatten().map(|&i| &self.edges[i])
  }

  /// Edges out of `id`, in the order they were connected.
  pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> + '_ {
    self.outgoing.get(id.0).into_iter().flatten().map(|&i| &self.edges[i])
  }

  /// Nodes with outbound but no inbound edges, ordered by name then id.
  pub fn roots(&self) -> Vec<NodeId> {
    let mut roots: Vec<NodeId> = (0..self.nodes.len())
      .filter(|&i| self.incoming[i].is_empty() && !self.outgoing[i].is_empty())
      .map(NodeId)
      .collect();
    self.sort_layer(&mut roots);
    roots
  }

  /// Calls `f` on every edge, breadth-first from the roots.
  pub fn walk<F: FnMut(&Edge)>(&self, mut f: F) {
    for i in self.walk_order() {
      f(&self.edges[i]);
    }
  }

  /// Nodes taking part in at least one edge, in the order the walk reaches
  /// them.
  pub fn walk_nodes(&self) -> Vec<NodeId> {
    let mut seen = vec![false; self.nodes.len()];
    let mut order = Vec::new();
    for i in self.walk_order() {
      for id in [self.edges[i].from, self.edges[i].to] {
        if !seen[id.0] {
          seen[id.0] = true;
          order.push(id);
        }
      }
    }
    order
  }

  /// Splits the graph into its nodes and edges, both indexed as before.
  pub fn into_parts(self) -> (Vec<Box<dyn Node>>, Vec<Edge>) {
    (self.nodes, self.edges)
  }

  fn walk_order(&self) -> Vec<usize> {
    let mut visited = vec![false; self.nodes.len()];
    let mut order = Vec::with_capacity(self.edges.len());
    let mut layer = self.roots();
    for id in &layer {
      visited[id.0] = true;
    }
    while !layer.is_empty() {
      let mut next = Vec::new();
      for id in &layer {
        for &e in &self.outgoing[id.0] {
          order.push(e);
          let to = self.edges[e].to;
          if !visited[to.0] {
            visited[to.0] = true;
            next.push(to);
          }
        }
      }
      self.sort_layer(&mut next);
      layer = next;
    }
    order
  }

  fn sort_layer(&self, layer: &mut [NodeId]) {
    layer.sort_by(|a, b| {
      self.nodes[a.0]
        .name()
        .cmp(self.nodes[b.0].name())
        .then(a.cmp(b))
    });
  }

  fn check_acyclic(&self) -> Result<(), GraphError> {
    // Kahn's algorithm
    let mut in_degree: Vec<usize> = self.incoming.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = (0..self.nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = 0;
    while let Some(i) = queue.pop_front() {
      ordered += 1;
      for &e in &self.outgoing[i] {
        let to = self.edges[e].to.0;
        in_degree[to] -= 1;
        if in_degree[to] == 0 {
          queue.push_back(to);
        }
      }
    }
    if ordered == self.nodes.len() {
      return Ok(());
    }
    let nodes: BTreeSet<String> = (0..self.nodes.len())
      .filter(|&i| in_degree[i] > 0)
      .map(|i| self.nodes[i].name().to_string())
      .collect();
    Err(GraphError::Cycle {
      nodes: nodes.into_iter().collect(),
    })
  }
}

impl fmt::Display for Graph {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for i in self.walk_order() {
      let edge = &self.edges[i];
      writeln!(
        f,
        "{} -> {}",
        self.nodes[edge.from.0].name(),
        self.nodes[edge.to.0].name()
      )?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collector::Collector;
  use crate::key::fixed;
  use crate::node::{FnNode, NodeBuilderExt};
  use crate::value::Value;

  fn noop(name: &str) -> FnNode {
    FnNode::new(|_: &dyn Collector, _: Value| Ok(())).named(name)
  }

  #[test]
  fn test_walk_is_breadth_first_and_sorted() {
    let mut g = GraphBuilder::new();
    let src = g.add(noop("source"));
    let upper = g.out(src).connect(noop("upper"));
    let count = g.out(src).connect(noop("count"));
    let align = g.add(noop("align"));
    g.connect(upper, align);
    g.out(count).key_by(fixed()).named("counts").connect_to(align);
    g.out(align).connect(noop("sink"));

    let graph = g.build().unwrap();
    // count sorts before upper in the second layer
    assert_eq!(
      graph.to_string(),
      "source -> upper\nsource -> count\ncount -> align\nupper -> align\nalign -> sink\n"
    );
    let names: Vec<&str> = graph
      .walk_nodes()
      .into_iter()
      .map(|id| graph.node(id).unwrap().name())
      .collect();
    assert_eq!(names, vec!["source", "upper", "count", "align", "sink"]);

    let inbound: Vec<Option<&str>> = graph.incoming(align).map(|e| e.name()).collect();
    assert_eq!(inbound, vec![None, Some("counts")]);
    assert_eq!(graph.incoming(align).nth(1).unwrap().selector().unwrap().name(), "fixed");
  }

  #[test]
  fn test_walk_visits_each_edge_once() {
    let mut g = GraphBuilder::new();
    let a = g.add(noop("a"));
    let b = g.out(a).connect(noop("b"));
    let c = g.out(a).connect(noop("c"));
    let d = g.out(b).connect(noop("d"));
    g.connect(c, d);

    let graph = g.build().unwrap();
    let mut visited = 0;
    graph.walk(|_| visited += 1);
    assert_eq!(visited, graph.edges().len());
    assert_eq!(graph.roots(), vec![a]);
  }

  #[test]
  fn test_isolated_nodes_are_not_walked() {
    let mut g = GraphBuilder::new();
    let a = g.add(noop("a"));
    g.add(noop("lonely"));
    g.out(a).connect(noop("b"));
    let graph = g.build().unwrap();
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.walk_nodes().len(), 2);
  }

  #[test]
  fn test_cycle_is_rejected() {
    let mut g = GraphBuilder::new();
    let a = g.add(noop("a"));
    let b = g.out(a).connect(noop("b"));
    let c = g.out(b).connect(noop("c"));
    g.connect(c, b);
    match g.build() {
      Err(GraphError::Cycle { nodes }) => assert_eq!(nodes, vec!["b", "c"]),
      Err(other) => panic!("unexpected error: {other}"),
      Ok(_) => panic!("cycle accepted"),
    }
  }

  #[test]
  fn test_unknown_node_is_rejected() {
    let mut other = GraphBuilder::new();
    other.add(noop("x"));
    let foreign = other.add(noop("y"));

    let mut g = GraphBuilder::new();
    let a = g.add(noop("a"));
    g.connect(a, foreign);
    assert!(matches!(g.build(), Err(GraphError::UnknownNode(id)) if id == foreign));
  }

  #[test]
  fn test_zero_parallelism_is_rejected() {
    let mut g = GraphBuilder::new();
    let a = g.add(noop("a"));
    g.out(a).connect(noop("b").with_parallelism(0));
    assert!(matches!(
      g.build(),
      Err(GraphError::InvalidParallelism { parallelism: 0, .. })
    ));
  }

  #[test]
  fn test_node_mut_updates_settings() {
    let mut g = GraphBuilder::new();
    let a = g.add(noop("a"));
    let node = g.node_mut(a).unwrap();
    node.set_name("renamed");
    node.set_parallelism(2);
    assert_eq!(g.node(a).unwrap().name(), "renamed");
    assert_eq!(g.node(a).unwrap().parallelism(), 2);
  }
}
