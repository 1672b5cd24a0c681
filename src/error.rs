//! # Error Handling
//!
//! Error types for the execution engine, the graph builder, window managers
//! and the value decoration accessors.
//!
//! ## Taxonomy
//!
//! - **User transformation errors**: returned by [`Node::process`](crate::node::Node::process)
//!   as a [`NodeError`]. They are never retried and terminate only the replica
//!   that produced them; the engine wraps them in [`EngineError::Node`].
//! - **Contract violations**: a value missing a required decoration, a
//!   non-positive window size or slide, an invalid parallelism. These indicate
//!   a caller bug. They surface as errors where a caller can act on them
//!   ([`WindowError`], [`GraphError`], [`ValueError`]) and as panics where they
//!   are unreachable by construction (an element added outside its window).
//! - **Aggregated reporting**: joins over several concurrent workers report a
//!   single error. There is no structured multi-error collection.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::error::{EngineError, NodeError};
//!
//! let cause: NodeError = "boom".into();
//! let err = EngineError::Node {
//!   node: "counter".to_string(),
//!   replica: 2,
//!   source: cause,
//! };
//! assert_eq!(err.to_string(), "node 'counter' (replica 2) failed: boom");
//! ```

use crate::graph::NodeId;
use thiserror::Error;

/// Error type returned by user transformations.
///
/// Any error can be boxed into a `NodeError`, including plain strings:
/// `Err("bad input".into())`.
pub type NodeError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Decorations a value can carry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Decoration {
  /// The partition key assigned by a partitioner.
  Key,
  /// The index of the merged input the value came from.
  Source,
  /// The event timestamp and watermark pair.
  Time,
}

impl std::fmt::Display for Decoration {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Decoration::Key => write!(f, "key"),
      Decoration::Source => write!(f, "source"),
      Decoration::Time => write!(f, "time"),
    }
  }
}

/// Errors produced by value accessors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
  /// The value does not carry the requested decoration.
  #[error("value {value} is not decorated with a {decoration}")]
  MissingDecoration {
    /// The decoration that was requested.
    decoration: Decoration,
    /// Rendering of the offending value.
    value: String,
  },
  /// The payload is not of the requested type.
  #[error("value {value} is of type {actual}, expected {expected}")]
  TypeMismatch {
    /// The requested type.
    expected: String,
    /// The payload's actual type.
    actual: String,
    /// Rendering of the offending value.
    value: String,
  },
}

/// Errors produced while building or validating a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
  /// An edge references a node that was never added to the builder.
  #[error("unknown node {0}")]
  UnknownNode(NodeId),
  /// A node declares a parallelism of zero.
  #[error("node '{node}' has invalid parallelism {parallelism}, must be at least 1")]
  InvalidParallelism {
    /// Name of the node.
    node: String,
    /// The declared parallelism.
    parallelism: usize,
  },
  /// The edges form a cycle.
  #[error("graph contains a cycle through: {}", .nodes.join(", "))]
  Cycle {
    /// Names of the nodes that could not be ordered.
    nodes: Vec<String>,
  },
}

/// Errors produced by window managers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
  /// Size or slide is not strictly positive.
  #[error("invalid window config: {0}")]
  InvalidConfig(String),
}

/// Errors produced while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
  /// The configuration document could not be parsed.
  #[error("failed to parse configuration: {0}")]
  Parse(#[from] serde_json::Error),
  /// An environment variable holds a value that cannot be used.
  #[error("invalid value '{value}' for {variable}")]
  InvalidEnv {
    /// Name of the environment variable.
    variable: String,
    /// The value that was found.
    value: String,
  },
  /// A field is out of range.
  #[error("invalid configuration: {0}")]
  Invalid(String),
}

/// Errors reported by operators and by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
  /// A user transformation failed.
  #[error("node '{node}' (replica {replica}) failed: {source}")]
  Node {
    /// Name of the node whose replica failed.
    node: String,
    /// Index of the failing replica.
    replica: usize,
    /// The error returned by the transformation.
    source: NodeError,
  },
  /// A value reached an operator without a decoration the operator requires.
  #[error("node '{node}' received a value without a {decoration} decoration")]
  MissingDecoration {
    /// Name of the receiving node.
    node: String,
    /// The missing decoration.
    decoration: Decoration,
  },
  /// A replica worker panicked.
  #[error("node '{node}' (replica {replica}) panicked")]
  WorkerPanicked {
    /// Name of the node whose replica panicked.
    node: String,
    /// Index of the replica.
    replica: usize,
  },
  /// The thread for a replica worker could not be started.
  #[error("failed to start node '{node}' (replica {replica}): {source}")]
  Spawn {
    /// Name of the node.
    node: String,
    /// Index of the replica.
    replica: usize,
    /// The error reported by the operating system.
    source: std::io::Error,
  },
  /// The partition pump in front of a node panicked, most likely in its key
  /// selector.
  #[error("partition pump of node '{node}' panicked")]
  PumpPanicked {
    /// Name of the node the pump feeds.
    node: String,
  },
  /// The graph could not be compiled.
  #[error(transparent)]
  Graph(#[from] GraphError),
  /// The engine configuration is invalid.
  #[error(transparent)]
  Config(#[from] ConfigError),
}
