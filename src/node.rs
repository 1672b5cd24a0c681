//! # Nodes
//!
//! A [`Node`] is a transformation template. The engine never runs the
//! template itself: every operator replica keeps one clone per key it has
//! observed, created lazily through [`Node::clone_node`] the first time the key
//! shows up. Clones must not share mutable state with the template or with
//! each other, which is what keeps per-key state isolated under parallelism.
//!
//! Node code is synchronous. It receives one value at a time and emits any
//! number of values through the [`Collector`] it is handed; emitting may block
//! when the downstream buffer is full.
//!
//! ## Node kinds
//!
//! - **Source**: a node without inbound edges. Its `process` is called exactly
//!   once with a null placeholder and emits the whole input.
//! - **Transform**: a node with inbound and outbound edges.
//! - **Sink**: a node without outbound edges; whatever it emits is discarded.
//!
//! Built-ins: [`FnNode`] (stateless closure), [`StatefulNode`] (closure plus
//! per-key state), [`TimestampNode`] (assigns event time) and [`LogSink`]
//! (records everything it receives into a shared [`Log`]).
//!
//! ## Example
//!
//! ```rust
//! use slipstream::collector::Collector;
//! use slipstream::node::{Log, Node, NodeBuilderExt, StatefulNode};
//! use slipstream::value::Value;
//!
//! let mut sum = StatefulNode::new(0i64, |acc: &mut i64, out: &dyn Collector, v: Value| {
//!   *acc += v.as_i64()?;
//!   out.collect(Value::from(*acc));
//!   Ok(())
//! })
//! .named("sum");
//!
//! let log = Log::new();
//! sum.process(&log, Value::from(2i64)).unwrap();
//! sum.process(&log, Value::from(3i64)).unwrap();
//! assert_eq!(log.int64s(), vec![2, 5]);
//! assert_eq!(sum.name(), "sum");
//! ```

use crate::collector::Collector;
use crate::error::NodeError;
use crate::time::Timestamp;
use crate::value::Value;
use std::sync::{Arc, Mutex, MutexGuard};

/// Name and declared parallelism shared by every node kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeMeta {
  name: String,
  parallelism: usize,
}

impl NodeMeta {
  /// Creates metadata with the given default name and a parallelism of 1.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      parallelism: 1,
    }
  }
}

/// A transformation template executed per key by operators.
pub trait Node: Send + 'static {
  /// Handles one value, emitting results into `out`.
  ///
  /// An error ends the replica that runs this node.
  fn process(&mut self, out: &dyn Collector, value: Value) -> Result<(), NodeError>;

  /// Returns an independent copy carrying the template's initial state.
  fn clone_node(&self) -> Box<dyn Node>;

  /// Returns the node metadata.
  fn meta(&self) -> &NodeMeta;

  /// Returns the node metadata mutably.
  fn meta_mut(&mut self) -> &mut NodeMeta;

  /// Returns the node name.
  fn name(&self) -> &str {
    &self.meta().name
  }

  /// Sets the node name.
  fn set_name(&mut self, name: &str) {
    self.meta_mut().name = name.to_string();
  }

  /// Returns the number of replicas the node runs with.
  fn parallelism(&self) -> usize {
    self.meta().parallelism
  }

  /// Sets the number of replicas the node runs with.
  fn set_parallelism(&mut self, parallelism: usize) {
    self.meta_mut().parallelism = parallelism;
  }
}

/// Builder-style setters for every sized node.
pub trait NodeBuilderExt: Node + Sized {
  /// Sets the name and returns the node.
  fn named(mut self, name: &str) -> Self {
    self.set_name(name);
    self
  }

  /// Sets the parallelism and returns the node.
  fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.set_parallelism(parallelism);
    self
  }
}

impl<N: Node> NodeBuilderExt for N {}

type ProcessFn = dyn Fn(&dyn Collector, Value) -> Result<(), NodeError> + Send + Sync;

/// A stateless node backed by a closure.
#[derive(Clone)]
pub struct FnNode {
  meta: NodeMeta,
  f: Arc<ProcessFn>,
}

impl FnNode {
  /// Wraps `f` as a node.
  pub fn new<F>(f: F) -> Self
  where
    F: Fn(&dyn Collector, Value) -> Result<(), NodeError> + Send + Sync + 'static,
  {
    Self {
      meta: NodeMeta::new("node"),
      f: Arc::new(f),
    }
  }
}

impl Node for FnNode {
  fn process(&mut self, out: &dyn Collector, value: Value) -> Result<(), NodeError> {
    (self.f)(out, value)
  }

  fn clone_node(&self) -> Box<dyn Node> {
    Box::new(self.clone())
  }

  fn meta(&self) -> &NodeMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut NodeMeta {
    &mut self.meta
  }
}

type StatefulFn<S> = dyn Fn(&mut S, &dyn Collector, Value) -> Result<(), NodeError> + Send + Sync;

/// A node carrying per-key state.
///
/// Each clone starts from a copy of the template's initial state, so `S`
/// must deep-copy on [`Clone`].
pub struct StatefulNode<S> {
  meta: NodeMeta,
  state: S,
  f: Arc<StatefulFn<S>>,
}

impl<S> StatefulNode<S>
where
  S: Clone + Send + 'static,
{
  /// Creates a node with initial state `state` updated by `f`.
  pub fn new<F>(state: S, f: F) -> Self
  where
    F: Fn(&mut S, &dyn Collector, Value) -> Result<(), NodeError> + Send + Sync + 'static,
  {
    Self {
      meta: NodeMeta::new("stateful"),
      state,
      f: Arc::new(f),
    }
  }

  /// Returns the current state.
  pub fn state(&self) -> &S {
    &self.state
  }
}

impl<S: Clone> Clone for StatefulNode<S> {
  fn clone(&self) -> Self {
    Self {
      meta: self.meta.clone(),
      state: self.state.clone(),
      f: Arc::clone(&self.f),
    }
  }
}

impl<S> Node for StatefulNode<S>
where
  S: Clone + Send + 'static,
{
  fn process(&mut self, out: &dyn Collector, value: Value) -> Result<(), NodeError> {
    (self.f)(&mut self.state, out, value)
  }

  fn clone_node(&self) -> Box<dyn Node> {
    Box::new(self.clone())
  }

  fn meta(&self) -> &NodeMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut NodeMeta {
    &mut self.meta
  }
}

/// Extracts `(timestamp, watermark)` from a value.
pub trait TimestampExtractor: Send + Sync {
  /// Returns the event timestamp and the watermark to attach to `value`.
  fn extract_time(&self, value: &Value) -> (Timestamp, Timestamp);
}

impl<F> TimestampExtractor for F
where
  F: Fn(&Value) -> (Timestamp, Timestamp) + Send + Sync,
{
  fn extract_time(&self, value: &Value) -> (Timestamp, Timestamp) {
    self(value)
  }
}

/// Decorates every value with the time returned by an extractor.
#[derive(Clone)]
pub struct TimestampNode {
  meta: NodeMeta,
  extractor: Arc<dyn TimestampExtractor>,
}

impl TimestampNode {
  /// Creates a node assigning time with `extractor`.
  pub fn new<E: TimestampExtractor + 'static>(extractor: E) -> Self {
    Self {
      meta: NodeMeta::new("timestamp"),
      extractor: Arc::new(extractor),
    }
  }
}

impl Node for TimestampNode {
  fn process(&mut self, out: &dyn Collector, mut value: Value) -> Result<(), NodeError> {
    let (ts, wm) = self.extractor.extract_time(&value);
    value.set_time(ts, wm);
    out.collect(value);
    Ok(())
  }

  fn clone_node(&self) -> Box<dyn Node> {
    Box::new(self.clone())
  }

  fn meta(&self) -> &NodeMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut NodeMeta {
    &mut self.meta
  }
}

/// A shared, append-only record of values.
///
/// Clones share the same storage. A `Log` is also a [`Collector`] that
/// records every collected value.
#[derive(Clone, Debug, Default)]
pub struct Log {
  values: Arc<Mutex<Vec<Value>>>,
}

impl Log {
  /// Creates an empty log.
  pub fn new() -> Self {
    Self::default()
  }

  /// Appends a value.
  pub fn push(&self, value: Value) {
    self.lock().push(value);
  }

  /// Returns a snapshot of the recorded values in arrival order.
  pub fn values(&self) -> Vec<Value> {
    self.lock().clone()
  }

  /// Returns the integer payloads, skipping values of other types.
  pub fn int64s(&self) -> Vec<i64> {
    self.lock().iter().filter_map(|v| v.as_i64().ok()).collect()
  }

  /// Returns the string payloads, skipping values of other types.
  pub fn strings(&self) -> Vec<String> {
    self
      .lock()
      .iter()
      .filter_map(|v| v.as_str().ok().map(str::to_string))
      .collect()
  }

  /// Number of recorded values.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  /// Returns `true` if nothing was recorded.
  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Value>> {
    self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl Collector for Log {
  fn collect(&self, value: Value) {
    self.push(value);
  }
}

/// A sink recording every value it receives into a [`Log`].
///
/// All clones, and therefore all keys and replicas, share the log.
#[derive(Clone)]
pub struct LogSink {
  meta: NodeMeta,
  log: Log,
}

impl LogSink {
  /// Creates a sink and the log it writes to.
  pub fn new() -> (Self, Log) {
    let log = Log::new();
    let sink = Self {
      meta: NodeMeta::new("log"),
      log: log.clone(),
    };
    (sink, log)
  }
}

impl Node for LogSink {
  fn process(&mut self, _out: &dyn Collector, value: Value) -> Result<(), NodeError> {
    self.log.push(value);
    Ok(())
  }

  fn clone_node(&self) -> Box<dyn Node> {
    Box::new(self.clone())
  }

  fn meta(&self) -> &NodeMeta {
    &self.meta
  }

  fn meta_mut(&mut self) -> &mut NodeMeta {
    &mut self.meta
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collector::DiscardCollector;

  #[test]
  fn test_fn_node_emits() {
    let mut upper = FnNode::new(|out: &dyn Collector, v: Value| {
      out.collect(Value::from(v.as_str()?.to_uppercase()));
      Ok(())
    });
    let log = Log::new();
    for w in ["hello", "ssp"] {
      upper.process(&log, Value::from(w)).unwrap();
    }
    assert_eq!(log.strings(), vec!["HELLO", "SSP"]);
  }

  #[test]
  fn test_fn_node_error_propagates() {
    let mut n = FnNode::new(|_out: &dyn Collector, v: Value| {
      v.as_i64()?;
      Ok(())
    });
    let err = n.process(&DiscardCollector, Value::from("x")).unwrap_err();
    assert!(err.to_string().contains("expected int64"));
  }

  #[test]
  fn test_stateful_clones_are_disjoint() {
    let template = StatefulNode::new(Vec::<i64>::new(), |seen: &mut Vec<i64>, out: &dyn Collector, v: Value| {
      seen.push(v.as_i64()?);
      out.collect(Value::from(seen.len() as i64));
      Ok(())
    });

    let mut a = template.clone_node();
    let mut b = template.clone_node();
    let log = Log::new();
    a.process(&log, Value::from(1i64)).unwrap();
    a.process(&log, Value::from(2i64)).unwrap();
    b.process(&log, Value::from(3i64)).unwrap();

    assert_eq!(log.int64s(), vec![1, 2, 1]);
    assert!(template.state().is_empty());
  }

  #[test]
  fn test_meta_setters() {
    let n = FnNode::new(|_: &dyn Collector, _: Value| Ok(()))
      .named("upper")
      .with_parallelism(3);
    assert_eq!(n.name(), "upper");
    assert_eq!(n.parallelism(), 3);

    let clone = n.clone_node();
    assert_eq!(clone.name(), "upper");
    assert_eq!(clone.parallelism(), 3);
  }

  #[test]
  fn test_timestamp_node() {
    let mut n = TimestampNode::new(|v: &Value| {
      let ts = Timestamp::new(v.as_i64().unwrap_or(0));
      (ts, Timestamp::new(ts.as_i64() - 1))
    });
    let log = Log::new();
    n.process(&log, Value::from(10i64)).unwrap();
    let time = log.values()[0].time().unwrap();
    assert_eq!(time.timestamp, Timestamp::new(10));
    assert_eq!(time.watermark, Timestamp::new(9));
  }

  #[test]
  fn test_log_sink_clones_share_log() {
    let (sink, log) = LogSink::new();
    let mut a = sink.clone_node();
    let mut b = sink.clone_node();
    a.process(&DiscardCollector, Value::from(1i64)).unwrap();
    b.process(&DiscardCollector, Value::from(2i64)).unwrap();
    assert_eq!(log.len(), 2);
    assert!(!log.is_empty());
  }
}
