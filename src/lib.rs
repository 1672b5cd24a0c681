//! # Slipstream
//!
//! A keyed, parallel stream-processing engine with event-time windows.
//!
//! Slipstream runs a directed acyclic graph of transformation nodes. Every
//! node runs as a group of replicas. Records are partitioned across replicas
//! by key, and each key gets its own clone of the node, so per-key state never
//! leaks between keys. Nodes are connected by bounded buffers, which are the
//! only back-pressure mechanism. When a node has several inputs, they are
//! merged into one stream and their watermarks are combined so event time only
//! advances as fast as the slowest input.
//!
//! ## Key Features
//!
//! - **Per-key state**: node templates are cloned lazily for each observed key
//! - **Parallel replicas**: `key mod parallelism` routing keeps a key on one
//!   replica
//! - **Watermarks**: monotone global watermark across merged sources
//! - **Windows**: fixed and sliding event-time windows fired by the watermark
//! - **Exactly one close**: end-of-stream is deduplicated at every fan-in
//!
//! ## Quick Start
//!
//! ```rust
//! use slipstream::collector::Collector;
//! use slipstream::engine::execute;
//! use slipstream::graph::GraphBuilder;
//! use slipstream::key::hash_by;
//! use slipstream::node::{FnNode, LogSink, NodeBuilderExt, StatefulNode};
//! use slipstream::value::Value;
//!
//! # tokio_test::block_on(async {
//! let mut g = GraphBuilder::new();
//! let words = g.add(
//!   FnNode::new(|out: &dyn Collector, _: Value| {
//!     for w in ["a", "b", "a"] {
//!       out.collect(Value::from(w));
//!     }
//!     Ok(())
//!   })
//!   .named("words"),
//! );
//! let counter = StatefulNode::new(0i64, |n: &mut i64, out: &dyn Collector, v: Value| {
//!   *n += 1;
//!   out.collect(Value::from(format!("{}: {}", v.as_str()?, n)));
//!   Ok(())
//! })
//! .named("count")
//! .with_parallelism(2);
//! let (sink, log) = LogSink::new();
//!
//! let count = g
//!   .out(words)
//!   .key_by(hash_by(|v: &Value| v.payload().to_string()))
//!   .connect(counter);
//! g.out(count).connect(sink);
//!
//! execute(g.build().unwrap()).await.unwrap();
//! let mut got = log.strings();
//! got.sort();
//! assert_eq!(got, vec!["a: 1", "a: 2", "b: 1"]);
//! # });
//! ```

#![deny(missing_docs)]

/// Output sinks handed to nodes, plus broadcast and close deduplication.
pub mod collector;
/// Engine configuration.
pub mod config;
/// Compiles graphs into operators and runs them.
pub mod engine;
/// Error types.
pub mod error;
/// Graph builder and validated graphs.
pub mod graph;
/// Key selectors deciding how records are partitioned.
pub mod key;
/// Fan-in of several upstream streams.
pub mod merge;
/// The node trait and the built-in node kinds.
pub mod node;
/// Sequential and parallel node runtimes.
pub mod operator;
/// Routing of a merged stream to operator replicas.
pub mod partition;
/// Bounded streams connecting stages.
pub mod stream;
/// Event timestamps.
pub mod time;
/// The value envelope and its decorations.
pub mod value;
/// Per-source watermark tracking.
pub mod watermark;
/// Event-time windows.
pub mod window;

pub use engine::{Engine, execute};
pub use error::{EngineError, EngineResult, NodeError};
pub use graph::{Graph, GraphBuilder, NodeId};
pub use node::{Node, NodeBuilderExt};
pub use value::{Key, Value};

#[cfg(test)]
mod key_test;
#[cfg(test)]
mod value_test;
