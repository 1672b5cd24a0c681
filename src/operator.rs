//! # Operators
//!
//! The runtime that executes nodes.
//!
//! An [`Operator`] is one sequential worker running one node template. It
//! reads key-decorated values from its input, keeps one clone of the template
//! per key it has seen, and hands each value to the clone owning its key.
//! Clones are created on first sight of a key and live until the operator
//! finishes. An operator without input is a source: it calls the template
//! once with a null placeholder and finishes.
//!
//! A [`ParallelOperator`] runs `N` operator replicas of one node. A
//! [`PartitionedStream`] in front of them merges all inbound streams and
//! routes each value to replica `key mod N`. Behind them a
//! [`SharedCollector`] over a [`BroadcastCollector`] fans their output out to
//! every downstream edge, forwarding a single close once all `N` replicas
//! are done.
//!
//! ## Termination
//!
//! Whatever way a replica ends, by exhausting its input, by a node error or
//! by a panic, it signals close to its output exactly once. A failing replica
//! stops reading its input; its siblings run to their natural end.
//!
//! Every replica runs on a thread of its own, so node code may block freely
//! and the number of replicas is not bounded by a pool size. Nodes only see
//! a [`Collector`](crate::collector::Collector); the close towards
//! downstream is signalled by the worker when it ends.
//! [`ParallelOperator::open`] spawns the partition pump as a task and must be
//! called from within a tokio runtime.

use crate::collector::{
  BroadcastCollector, DiscardCollector, NodeCollector, Output, SharedCollector,
};
use crate::error::{Decoration, EngineError, EngineResult};
use crate::key::{KeySelector, round_robin};
use crate::node::Node;
use crate::partition::PartitionedStream;
use crate::stream::StreamReader;
use crate::value::{Key, Value};
use scopeguard::ScopeGuard;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, warn};

/// An output that is closed when dropped, unwinding included.
type ClosingOutput = ScopeGuard<Box<dyn Output>, fn(Box<dyn Output>)>;

fn close_output(output: Box<dyn Output>) {
  output.close();
}

enum Worker {
  Running(oneshot::Receiver<EngineResult<()>>),
  NotStarted(EngineError),
}

/// One sequential worker running clones of a node template.
pub struct Operator {
  name: String,
  replica: usize,
  template: Option<Box<dyn Node>>,
  input: Option<StreamReader>,
  output: Option<Box<dyn Output>>,
  worker: Option<Worker>,
}

impl Operator {
  /// Creates an operator for `template`.
  pub fn new(template: Box<dyn Node>) -> Self {
    Self {
      name: template.name().to_string(),
      replica: 0,
      template: Some(template),
      input: None,
      output: None,
      worker: None,
    }
  }

  /// Sets the replica index used in logs and errors.
  pub fn with_replica(mut self, replica: usize) -> Self {
    self.replica = replica;
    self
  }

  /// Name of the node this operator runs.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Replica index.
  pub fn replica(&self) -> usize {
    self.replica
  }

  /// Sets the stream the operator reads from. Without one it is a source.
  pub fn connect_input(&mut self, input: StreamReader) {
    self.input = Some(input);
  }

  /// Sets where the operator emits. Without one output is discarded.
  pub fn connect_output(&mut self, output: Box<dyn Output>) {
    self.output = Some(output);
  }

  /// Starts the worker on a dedicated thread.
  ///
  /// If the thread cannot be started the output is closed right away and
  /// [`Operator::close`] reports [`EngineError::Spawn`].
  pub fn open(&mut self) {
    let Some(template) = self.template.take() else {
      warn!(node = %self.name, replica = self.replica, "operator already opened");
      return;
    };
    let input = self.input.take();
    let output: Box<dyn Output> = self
      .output
      .take()
      .unwrap_or_else(|| Box::new(DiscardCollector));
    let output: ClosingOutput = scopeguard::guard(output, close_output as fn(Box<dyn Output>));
    let (tx, rx) = oneshot::channel();
    let (name, replica) = (self.name.clone(), self.replica);
    let spawned = std::thread::Builder::new()
      .name(format!("{}-{}", self.name, replica).replace('\0', ""))
      .spawn(move || {
        let result = run_worker(&name, replica, template, input, output);
        if tx.send(result).is_err() {
          debug!(node = %name, replica, "operator dropped before its worker finished");
        }
      });
    self.worker = Some(match spawned {
      Ok(_) => Worker::Running(rx),
      Err(source) => {
        error!(node = %self.name, replica, %source, "failed to start replica");
        Worker::NotStarted(EngineError::Spawn {
          node: self.name.clone(),
          replica,
          source,
        })
      }
    });
  }

  /// Waits for the worker to finish and returns its error, if any.
  ///
  /// Returns `Ok(())` for an operator that was never opened.
  pub async fn close(&mut self) -> EngineResult<()> {
    let rx = match self.worker.take() {
      None => return Ok(()),
      Some(Worker::NotStarted(e)) => return Err(e),
      Some(Worker::Running(rx)) => rx,
    };
    match rx.await {
      Ok(result) => result,
      // the sender only goes away without a result when the worker unwinds
      Err(_) => {
        error!(node = %self.name, replica = self.replica, "replica panicked");
        Err(EngineError::WorkerPanicked {
          node: self.name.clone(),
          replica: self.replica,
        })
      }
    }
  }
}

fn run_worker(
  name: &str,
  replica: usize,
  mut template: Box<dyn Node>,
  input: Option<StreamReader>,
  output: ClosingOutput,
) -> EngineResult<()> {
  let _span = debug_span!("operator", node = %name, replica).entered();
  let out = NodeCollector::new(&**output);
  let out = &out;

  let node_error = |source| EngineError::Node {
    node: name.to_string(),
    replica,
    source,
  };

  let Some(mut input) = input else {
    debug!("source started");
    let result = template.process(out, Value::null()).map_err(node_error);
    if let Err(e) = &result {
      error!(error = %e, "source failed");
    }
    return result;
  };

  debug!("replica started");
  let mut instances: HashMap<Key, Box<dyn Node>> = HashMap::new();
  let mut processed = 0u64;
  while let Some(value) = input.blocking_next() {
    let Some(key) = value.key() else {
      error!(%value, "value reached operator without a key");
      return Err(EngineError::MissingDecoration {
        node: name.to_string(),
        decoration: Decoration::Key,
      });
    };
    let instance = instances
      .entry(key)
      .or_insert_with(|| template.clone_node());
    if let Err(source) = instance.process(out, value) {
      let e = node_error(source);
      error!(error = %e, "replica failed");
      return Err(e);
    }
    processed += 1;
  }
  debug!(processed, keys = instances.len(), "replica finished");
  Ok(())
}

/// `N` replicas of one node sharing a partitioned input and a merged output.
pub struct ParallelOperator {
  name: String,
  replicas: Vec<Operator>,
  pump: Option<PartitionedStream>,
  pump_handle: Option<JoinHandle<u64>>,
}

impl ParallelOperator {
  /// Creates `template.parallelism()` replicas of `template`.
  ///
  /// A parallelism of zero is raised to one.
  pub fn new(template: Box<dyn Node>) -> Self {
    let parallelism = template.parallelism().max(1);
    let replicas = (0..parallelism)
      .map(|replica| Operator::new(template.clone_node()).with_replica(replica))
      .collect();
    Self {
      name: template.name().to_string(),
      replicas,
      pump: None,
      pump_handle: None,
    }
  }

  /// Name of the node.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Number of replicas.
  pub fn parallelism(&self) -> usize {
    self.replicas.len()
  }

  /// Merges `inputs` and partitions them across the replicas.
  ///
  /// Values are keyed by `selector`, or round-robin over the replicas when
  /// none is given. Each replica stream buffers up to `capacity` items.
  pub fn connect_inputs(
    &mut self,
    inputs: Vec<StreamReader>,
    selector: Option<Box<dyn KeySelector>>,
    capacity: usize,
  ) {
    let n = self.replicas.len();
    let selector = selector.unwrap_or_else(|| Box::new(round_robin(n)));
    let (pump, readers) = PartitionedStream::new(inputs, selector, n, capacity);
    for (replica, reader) in self.replicas.iter_mut().zip(readers) {
      replica.connect_input(reader);
    }
    self.pump = Some(pump);
  }

  /// Sends the output of every replica to all of `outputs`, closing each of
  /// them once after the last replica finishes.
  pub fn connect_outputs(&mut self, outputs: Vec<Box<dyn Output>>) {
    let shared = SharedCollector::new(
      Box::new(BroadcastCollector::new(outputs)),
      self.replicas.len(),
    );
    for replica in &mut self.replicas {
      replica.connect_output(Box::new(shared.clone()));
    }
  }

  /// Starts the partition pump and every replica.
  ///
  /// # Panics
  ///
  /// Panics if called outside a tokio runtime.
  pub fn open(&mut self) {
    if let Some(pump) = self.pump.take() {
      self.pump_handle = Some(pump.spawn());
    }
    debug!(node = %self.name, parallelism = self.replicas.len(), "opening operator");
    for replica in &mut self.replicas {
      replica.open();
    }
  }

  /// Waits for every replica and the pump to finish.
  ///
  /// Returns the error of the highest-indexed failing replica, if any.
  pub async fn close(&mut self) -> EngineResult<()> {
    let mut result = Ok(());
    for replica in &mut self.replicas {
      if let Err(e) = replica.close().await {
        result = Err(e);
      }
    }
    if let Some(handle) = self.pump_handle.take() {
      if let Err(join_error) = handle.await {
        error!(node = %self.name, %join_error, "partition pump panicked");
        result = Err(EngineError::PumpPanicked {
          node: self.name.clone(),
        });
      }
    }
    debug!(node = %self.name, ok = result.is_ok(), "operator closed");
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collector::Collector;
  use crate::key::hash_by;
  use crate::node::{FnNode, NodeBuilderExt, StatefulNode};
  use crate::stream::{buffered, stream_from_values};
  use crate::value::Key;

  fn upper() -> Box<dyn Node> {
    Box::new(
      FnNode::new(|out: &dyn Collector, v: Value| {
        out.collect(Value::from(v.as_str()?.to_uppercase()));
        Ok(())
      })
      .named("upper"),
    )
  }

  async fn drain(reader: &mut StreamReader) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(v) = reader.next().await {
      out.push(v.to_string());
    }
    out
  }

  #[tokio::test]
  async fn test_operator_processes_keyed_values() {
    let words = ["hello", "this", "is", "ssp"];
    let mut op = Operator::new(upper());
    op.connect_input(stream_from_values(
      words.iter().map(|w| Value::from(*w).with_key(Key(0))),
    ));
    let (writer, mut reader) = buffered(10);
    op.connect_output(Box::new(writer));
    op.open();

    assert_eq!(drain(&mut reader).await, vec!["HELLO", "THIS", "IS", "SSP"]);
    op.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_source_runs_once() {
    let source = FnNode::new(|out: &dyn Collector, v: Value| {
      assert!(v.is_null());
      for i in 0..3i64 {
        out.collect(Value::from(i));
      }
      Ok(())
    });
    let mut op = Operator::new(Box::new(source));
    let (writer, mut reader) = buffered(10);
    op.connect_output(Box::new(writer));
    op.open();
    assert_eq!(drain(&mut reader).await, vec!["0", "1", "2"]);
    op.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_unkeyed_value_is_rejected() {
    let mut op = Operator::new(upper());
    op.connect_input(stream_from_values(vec![Value::from("x")]));
    let (writer, mut reader) = buffered(4);
    op.connect_output(Box::new(writer));
    op.open();

    assert!(drain(&mut reader).await.is_empty());
    assert!(matches!(
      op.close().await,
      Err(EngineError::MissingDecoration {
        decoration: Decoration::Key,
        ..
      })
    ));
  }

  #[tokio::test]
  async fn test_node_error_closes_output() {
    let mut op = Operator::new(upper()).with_replica(3);
    op.connect_input(stream_from_values(vec![
      Value::from("ok").with_key(Key(0)),
      Value::from(1i64).with_key(Key(0)),
      Value::from("never").with_key(Key(0)),
    ]));
    let (writer, mut reader) = buffered(4);
    op.connect_output(Box::new(writer));
    op.open();

    assert_eq!(drain(&mut reader).await, vec!["OK"]);
    let err = op.close().await.unwrap_err();
    assert!(matches!(err, EngineError::Node { replica: 3, .. }));
    assert!(err.to_string().starts_with("node 'upper' (replica 3) failed"));
  }

  #[tokio::test]
  async fn test_panic_is_reported_and_closes_output() {
    let boom = FnNode::new(|_out: &dyn Collector, _v: Value| panic!("boom")).named("boom");
    let mut op = Operator::new(Box::new(boom));
    let (writer, mut reader) = buffered(4);
    op.connect_output(Box::new(writer));
    op.open();

    assert!(drain(&mut reader).await.is_empty());
    assert!(reader.is_done());
    assert!(matches!(
      op.close().await,
      Err(EngineError::WorkerPanicked { replica: 0, .. })
    ));
  }

  #[test]
  fn test_operator_runs_without_runtime() {
    let mut op = Operator::new(upper()).with_replica(1);
    op.connect_input(stream_from_values(vec![Value::from("a").with_key(Key(1))]));
    let (writer, mut reader) = buffered(4);
    op.connect_output(Box::new(writer));
    op.open();

    assert_eq!(reader.blocking_next(), Some(Value::from("A")));
    assert_eq!(reader.blocking_next(), None);
    tokio_test::block_on(op.close()).unwrap();
  }

  #[tokio::test]
  async fn test_close_without_open() {
    let mut op = Operator::new(upper());
    op.close().await.unwrap();
  }

  #[tokio::test]
  async fn test_parallel_word_count() {
    let words = [
      "hello", "this", "is", "ssp", "hello", "this", "is", "sparta", "sparta", "is", "leonida",
    ];
    let counter = StatefulNode::new(0i64, |count: &mut i64, out: &dyn Collector, v: Value| {
      *count += 1;
      out.collect(Value::from(format!("{}: {}", v.as_str()?, count)));
      Ok(())
    })
    .named("wordCounter")
    .with_parallelism(4);

    let mut op = ParallelOperator::new(Box::new(counter));
    assert_eq!(op.parallelism(), 4);
    op.connect_inputs(
      vec![stream_from_values(words.iter().map(|w| Value::from(*w)))],
      Some(Box::new(hash_by(|v: &Value| v.payload().to_string()))),
      16,
    );
    let (writer, mut reader) = buffered(32);
    op.connect_outputs(vec![Box::new(writer)]);
    op.open();

    // a single close reaches the reader after all four replicas finish
    let mut got = drain(&mut reader).await;
    op.close().await.unwrap();
    got.sort();
    assert_eq!(
      got,
      vec![
        "hello: 1", "hello: 2", "is: 1", "is: 2", "is: 3", "leonida: 1", "sparta: 1", "sparta: 2",
        "ssp: 1", "this: 1", "this: 2",
      ]
    );
  }

  #[tokio::test]
  async fn test_parallel_reports_last_error() {
    let failing = FnNode::new(|_out: &dyn Collector, v: Value| Err(format!("failed on {v}").into()))
      .named("failing")
      .with_parallelism(3);
    let mut op = ParallelOperator::new(Box::new(failing));
    op.connect_inputs(
      vec![stream_from_values((0..3i64).map(Value::from))],
      None,
      4,
    );
    op.connect_outputs(Vec::new());
    op.open();

    match op.close().await {
      Err(EngineError::Node { replica, source, .. }) => {
        assert_eq!(replica, 2);
        assert_eq!(source.to_string(), "failed on 2 {key: 2, source: 0}");
      }
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_broadcast_to_several_outputs() {
    let mut op = ParallelOperator::new(upper());
    op.connect_inputs(vec![stream_from_values(vec![Value::from("a")])], None, 4);
    let (w1, mut r1) = buffered(4);
    let (w2, mut r2) = buffered(4);
    op.connect_outputs(vec![Box::new(w1), Box::new(w2)]);
    op.open();
    assert_eq!(drain(&mut r1).await, vec!["A"]);
    assert_eq!(drain(&mut r2).await, vec!["A"]);
    op.close().await.unwrap();
  }
}
