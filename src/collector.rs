//! # Collectors
//!
//! A [`Collector`] is where a node emits its output. It only accepts values:
//! ending a stream is the runtime's job, never a node's.
//!
//! Behind the collector a node sees, operators wire every replica to an
//! [`Output`] built from the pieces in this module:
//!
//! ```text
//!   replica 0 ─┐
//!   replica 1 ─┼─> SharedCollector ─> BroadcastCollector ─┬─> edge to consumer A
//!   replica 2 ─┘    (close once)       (fan-out)          └─> edge to consumer B
//! ```
//!
//! Every replica signals close on its output when it finishes. The
//! [`SharedCollector`] swallows all but the last of them, so each downstream
//! edge observes exactly one close per producing node regardless of its
//! parallelism.
//!
//! Outputs are synchronous: writing into a full edge buffer blocks the
//! calling thread. They are meant to be used from operator worker threads.

use crate::stream::StreamWriter;
use crate::value::{StreamItem, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{trace, warn};

/// Receives the output of a node.
///
/// A collector cannot end the stream it feeds:
///
/// ```compile_fail
/// use slipstream::collector::Collector;
///
/// fn finish(out: &dyn Collector) {
///   out.close();
/// }
/// ```
pub trait Collector: Send + Sync {
  /// Emits one value downstream.
  fn collect(&self, value: Value);
}

/// The runtime side of a node's output: values plus the end-of-stream
/// signal.
///
/// Nodes never get hold of an `Output`; the operator running them hands out
/// a [`Collector`] view and signals close itself once the worker ends.
pub trait Output: Send + Sync {
  /// Emits one value downstream.
  fn collect(&self, value: Value);

  /// Signals that the emitting worker has finished.
  fn close(&self);
}

impl<O: Output + ?Sized> Output for Arc<O> {
  fn collect(&self, value: Value) {
    (**self).collect(value)
  }

  fn close(&self) {
    (**self).close()
  }
}

impl<O: Output + ?Sized> Output for Box<O> {
  fn collect(&self, value: Value) {
    (**self).collect(value)
  }

  fn close(&self) {
    (**self).close()
  }
}

impl Output for StreamWriter {
  fn collect(&self, value: Value) {
    if self.blocking_send(StreamItem::Data(value)).is_err() {
      warn!("dropping value, downstream reader is gone");
    }
  }

  fn close(&self) {
    if self.blocking_send(StreamItem::Close).is_err() {
      warn!("dropping close signal, downstream reader is gone");
    }
  }
}

/// The collect-only view of an [`Output`] handed to node code.
pub(crate) struct NodeCollector<'a> {
  output: &'a dyn Output,
}

impl<'a> NodeCollector<'a> {
  pub(crate) fn new(output: &'a dyn Output) -> Self {
    Self { output }
  }
}

impl Collector for NodeCollector<'_> {
  fn collect(&self, value: Value) {
    self.output.collect(value);
  }
}

/// Ignores everything. Used for nodes without downstream consumers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardCollector;

impl Collector for DiscardCollector {
  fn collect(&self, _value: Value) {}
}

impl Output for DiscardCollector {
  fn collect(&self, _value: Value) {}

  fn close(&self) {}
}

/// Forwards every value and close to all of its targets.
#[derive(Default)]
pub struct BroadcastCollector {
  targets: Vec<Box<dyn Output>>,
}

impl BroadcastCollector {
  /// Creates a broadcast collector over `targets`.
  pub fn new(targets: Vec<Box<dyn Output>>) -> Self {
    Self { targets }
  }

  /// Adds a target.
  pub fn push(&mut self, target: Box<dyn Output>) {
    self.targets.push(target);
  }

  /// Number of targets.
  pub fn len(&self) -> usize {
    self.targets.len()
  }

  /// Returns `true` if there are no targets.
  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }
}

impl Output for BroadcastCollector {
  fn collect(&self, value: Value) {
    if let Some((last, rest)) = self.targets.split_last() {
      for target in rest {
        target.collect(value.clone());
      }
      last.collect(value);
    }
  }

  fn close(&self) {
    for target in &self.targets {
      target.close();
    }
  }
}

struct SharedInner {
  target: Box<dyn Output>,
  open: AtomicUsize,
}

/// A collector shared by `n` writers that forwards close only once all of
/// them have closed.
///
/// Values pass straight through. Closes beyond the `n`-th are ignored.
#[derive(Clone)]
pub struct SharedCollector {
  inner: Arc<SharedInner>,
}

impl SharedCollector {
  /// Creates a collector expecting `writers` closes before forwarding one.
  pub fn new(target: Box<dyn Output>, writers: usize) -> Self {
    Self {
      inner: Arc::new(SharedInner {
        target,
        open: AtomicUsize::new(writers),
      }),
    }
  }

  /// Number of writers that have not closed yet.
  pub fn open_writers(&self) -> usize {
    self.inner.open.load(Ordering::Acquire)
  }
}

impl Output for SharedCollector {
  fn collect(&self, value: Value) {
    self.inner.target.collect(value);
  }

  fn close(&self) {
    let previous = self
      .inner
      .open
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    match previous {
      Ok(1) => self.inner.target.close(),
      Ok(remaining) => trace!(remaining = remaining - 1, "writer closed"),
      Err(_) => warn!("close received after all writers closed"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stream::buffered;

  #[test]
  fn test_shared_collector_closes_once() {
    let (writer, mut reader) = buffered(16);
    let shared = SharedCollector::new(Box::new(writer), 3);

    let handles: Vec<_> = (0..3)
      .map(|i| {
        let c = shared.clone();
        std::thread::spawn(move || {
          c.collect(Value::from(i as i64));
          c.close();
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }
    // an extra close must not produce a second sentinel
    shared.close();
    assert_eq!(shared.open_writers(), 0);

    let mut seen = Vec::new();
    while let Some(v) = reader.blocking_next() {
      seen.push(v.as_i64().unwrap());
    }
    seen.sort();
    assert_eq!(seen, vec![0, 1, 2]);

    // exactly one close was written: nothing else is buffered behind it
    drop(shared);
    let mut raw = reader.into_item_stream().into_inner();
    assert_eq!(raw.blocking_recv(), None);
  }

  #[test]
  fn test_broadcast_collector_fans_out() {
    let (w1, mut r1) = buffered(8);
    let (w2, mut r2) = buffered(8);
    let broadcast = BroadcastCollector::new(vec![Box::new(w1), Box::new(w2)]);
    assert_eq!(broadcast.len(), 2);

    for i in 0..3i64 {
      broadcast.collect(Value::from(i));
    }
    broadcast.close();

    for reader in [&mut r1, &mut r2] {
      let mut seen = Vec::new();
      while let Some(v) = reader.blocking_next() {
        seen.push(v.as_i64().unwrap());
      }
      assert_eq!(seen, vec![0, 1, 2]);
    }
  }

  #[test]
  fn test_empty_broadcast_discards() {
    let broadcast = BroadcastCollector::default();
    assert!(broadcast.is_empty());
    broadcast.collect(Value::null());
    broadcast.close();
  }

  #[test]
  fn test_node_collector_only_forwards_values() {
    let (writer, mut reader) = buffered(4);
    let shared = SharedCollector::new(Box::new(writer), 1);
    {
      let out = NodeCollector::new(&shared);
      let out: &dyn Collector = &out;
      out.collect(Value::from(1i64));
      out.collect(Value::from(2i64));
    }
    assert_eq!(shared.open_writers(), 1);
    shared.close();

    let mut seen = Vec::new();
    while let Some(v) = reader.blocking_next() {
      seen.push(v.as_i64().unwrap());
    }
    assert_eq!(seen, vec![1, 2]);
  }

  #[test]
  fn test_collect_after_reader_dropped() {
    let (writer, reader) = buffered(1);
    drop(reader);
    writer.collect(Value::null());
    writer.close();
  }
}
