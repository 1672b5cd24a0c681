//! # Engine
//!
//! Compiles a [`Graph`] into running operators and drives them to
//! completion.
//!
//! Execution proceeds in four steps:
//!
//! 1. **Instantiate**: one [`ParallelOperator`] per node taking part in an
//!    edge, sized by the node's parallelism, in walk order.
//! 2. **Wire**: one buffered stream per edge. The writer joins the producer's
//!    outputs, the reader joins the consumer's inputs. A consumer's inputs are
//!    indexed in the order its inbound edges were connected, and those indices
//!    are the source indices its values are tagged with. Its key selector is
//!    taken from the first of those edges that declares one.
//! 3. **Open**: every operator starts.
//! 4. **Join**: every operator is waited for. The first error in walk order
//!    is returned once all of them have finished; later ones are logged.
//!
//! A failing node does not cancel the rest of the graph. Downstream operators
//! see a normal close and run to completion; upstream producers stop being
//! read from by the failed replica and have their output to it dropped.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::collector::Collector;
//! use slipstream::engine::Engine;
//! use slipstream::graph::GraphBuilder;
//! use slipstream::node::{FnNode, LogSink, NodeBuilderExt};
//! use slipstream::value::Value;
//!
//! # tokio_test::block_on(async {
//! let mut g = GraphBuilder::new();
//! let source = g.add(
//!   FnNode::new(|out: &dyn Collector, _: Value| {
//!     for i in 0..3i64 {
//!       out.collect(Value::from(i));
//!     }
//!     Ok(())
//!   })
//!   .named("numbers"),
//! );
//! let (sink, log) = LogSink::new();
//! g.out(source).connect(sink);
//!
//! Engine::new(g.build().unwrap()).execute().await.unwrap();
//! assert_eq!(log.int64s(), vec![0, 1, 2]);
//! # });
//! ```

use crate::collector::Output;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::graph::{Graph, GraphBuilder};
use crate::key::KeySelector;
use crate::node::Node;
use crate::operator::ParallelOperator;
use crate::stream::{StreamReader, buffered};
use futures::future::join_all;
use tracing::{debug, error, info};

/// Runs a graph.
pub struct Engine {
  graph: Graph,
  config: EngineConfig,
}

impl Engine {
  /// Creates an engine with the default configuration.
  pub fn new(graph: Graph) -> Self {
    Self::with_config(graph, EngineConfig::default())
  }

  /// Creates an engine with `config`.
  pub fn with_config(graph: Graph, config: EngineConfig) -> Self {
    Self { graph, config }
  }

  /// Builds the graph held by `builder` and creates an engine for it.
  ///
  /// Validation failures are reported as
  /// [`EngineError::Graph`](crate::error::EngineError::Graph).
  pub fn from_builder(builder: GraphBuilder) -> EngineResult<Self> {
    Ok(Self::new(builder.build()?))
  }

  /// The engine configuration.
  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// The graph this engine runs.
  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// Runs every operator to completion.
  ///
  /// Must be called from within a tokio runtime. Node code runs on one
  /// dedicated thread per replica.
  pub async fn execute(self) -> EngineResult<()> {
    self.config.validate()?;
    let capacity = self.config.buffer_size;
    let order = self.graph.walk_nodes();
    let (nodes, edges) = self.graph.into_parts();
    let node_count = nodes.len();

    let mut templates: Vec<Option<Box<dyn Node>>> = nodes.into_iter().map(Some).collect();
    let mut inputs: Vec<Vec<StreamReader>> = (0..node_count).map(|_| Vec::new()).collect();
    let mut outputs: Vec<Vec<Box<dyn Output>>> = (0..node_count).map(|_| Vec::new()).collect();
    let mut selectors: Vec<Option<Box<dyn KeySelector>>> = (0..node_count).map(|_| None).collect();

    for mut edge in edges {
      let (from, to) = (edge.from().index(), edge.to().index());
      let (writer, reader) = buffered(capacity);
      outputs[from].push(Box::new(writer));
      inputs[to].push(reader);
      if selectors[to].is_none() {
        selectors[to] = edge.take_selector();
      }
    }

    let mut operators = Vec::with_capacity(order.len());
    for id in &order {
      let i = id.index();
      let Some(template) = templates[i].take() else {
        continue;
      };
      let mut operator = ParallelOperator::new(template);
      let node_inputs = std::mem::take(&mut inputs[i]);
      debug!(
        node = %operator.name(),
        parallelism = operator.parallelism(),
        inputs = node_inputs.len(),
        outputs = outputs[i].len(),
        "wiring operator"
      );
      if !node_inputs.is_empty() {
        operator.connect_inputs(node_inputs, selectors[i].take(), capacity);
      }
      operator.connect_outputs(std::mem::take(&mut outputs[i]));
      operators.push(operator);
    }

    info!(operators = operators.len(), buffer_size = capacity, "starting graph");
    for operator in &mut operators {
      operator.open();
    }

    let closed = join_all(operators.iter_mut().map(|operator| operator.close())).await;
    let mut result = Ok(());
    for (operator, closed) in operators.iter().zip(closed) {
      if let Err(e) = closed {
        if result.is_ok() {
          result = Err(e);
        } else {
          error!(node = %operator.name(), error = %e, "additional operator failure");
        }
      }
    }
    match &result {
      Ok(()) => info!("graph finished"),
      Err(e) => error!(error = %e, "graph failed"),
    }
    result
  }
}

/// Runs `graph` with the default configuration.
pub async fn execute(graph: Graph) -> EngineResult<()> {
  Engine::new(graph).execute().await
}
