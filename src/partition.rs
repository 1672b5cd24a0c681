//! # Partitioning
//!
//! A [`PartitionedStream`] pumps a merged input into one buffered stream per
//! operator replica. Every value has its previous key stripped, is re-keyed
//! by the edge's [`KeySelector`] and is routed to replica `key mod N`. When
//! the merged input ends, one close is sent to every replica.
//!
//! Records with equal keys therefore always land on the same replica, in
//! arrival order.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::key::key_fn;
//! use slipstream::partition::PartitionedStream;
//! use slipstream::stream::stream_from_values;
//! use slipstream::value::{Key, Value};
//!
//! # tokio_test::block_on(async {
//! let input = vec![stream_from_values((0..4i64).map(Value::from))];
//! let by_parity = key_fn(|v: &Value| Key(v.as_i64().unwrap_or(0) as u64));
//! let (pump, mut replicas) = PartitionedStream::new(input, Box::new(by_parity), 2, 8);
//! pump.run().await;
//!
//! assert_eq!(replicas[1].next().await.unwrap().as_i64().unwrap(), 1);
//! assert_eq!(replicas[1].next().await.unwrap().as_i64().unwrap(), 3);
//! assert_eq!(replicas[1].next().await, None);
//! # });
//! ```

use crate::key::KeySelector;
use crate::merge::MergedStream;
use crate::stream::{StreamReader, StreamWriter, buffered};
use crate::value::StreamItem;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Re-keys a merged input and routes it to replica streams.
pub struct PartitionedStream {
  input: MergedStream,
  selector: Box<dyn KeySelector>,
  outputs: Vec<StreamWriter>,
}

impl PartitionedStream {
  /// Creates a pump over `inputs` feeding `replicas` new streams of
  /// `capacity` items each, and returns the replica readers alongside it.
  pub fn new(
    inputs: Vec<StreamReader>,
    selector: Box<dyn KeySelector>,
    replicas: usize,
    capacity: usize,
  ) -> (Self, Vec<StreamReader>) {
    let (outputs, readers): (Vec<_>, Vec<_>) = (0..replicas).map(|_| buffered(capacity)).unzip();
    let pump = Self {
      input: MergedStream::new(inputs),
      selector,
      outputs,
    };
    (pump, readers)
  }

  /// Number of replica streams.
  pub fn replicas(&self) -> usize {
    self.outputs.len()
  }

  /// Runs the pump to completion and returns the number of values routed.
  pub async fn run(mut self) -> u64 {
    let replicas = self.outputs.len();
    let mut gone = vec![false; replicas];
    let mut routed = 0u64;
    while let Some(mut value) = self.input.next().await {
      if replicas == 0 {
        continue;
      }
      value.clear_key();
      let key = self.selector.get_key(&value);
      value.set_key(key);
      let target = key.partition(replicas);
      if gone[target] {
        continue;
      }
      if self.outputs[target].send(StreamItem::Data(value)).await.is_err() {
        // a failed replica stops reading; its share of the input is dropped
        warn!(replica = target, "replica stream is gone, dropping its values");
        gone[target] = true;
        continue;
      }
      routed += 1;
    }
    for (replica, output) in self.outputs.iter().enumerate() {
      if !gone[replica] && output.send(StreamItem::Close).await.is_err() {
        warn!(replica, "replica stream is gone before close");
      }
    }
    debug!(routed, replicas, selector = self.selector.name(), "partition pump finished");
    routed
  }

  /// Spawns the pump onto the current tokio runtime.
  pub fn spawn(self) -> JoinHandle<u64> {
    tokio::spawn(self.run())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key::{key_fn, round_robin};
  use crate::stream::stream_from_values;
  use crate::value::{Key, Value};
  use proptest::prelude::*;

  async fn drain(reader: &mut StreamReader) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(v) = reader.next().await {
      out.push(v);
    }
    out
  }

  #[tokio::test]
  async fn test_partition_by_parity() {
    let input = vec![stream_from_values((0..10i64).map(Value::from))];
    let selector = key_fn(|v: &Value| Key(v.as_i64().unwrap() as u64 % 2));
    let (pump, mut readers) = PartitionedStream::new(input, Box::new(selector), 2, 16);
    assert_eq!(pump.replicas(), 2);
    assert_eq!(pump.spawn().await.unwrap(), 10);

    let even = drain(&mut readers[0]).await;
    let odd = drain(&mut readers[1]).await;
    assert_eq!(
      even.iter().map(|v| v.as_i64().unwrap()).collect::<Vec<_>>(),
      vec![0, 2, 4, 6, 8]
    );
    assert!(even.iter().all(|v| v.key() == Some(Key(0))));
    assert_eq!(
      odd.iter().map(|v| v.as_i64().unwrap()).collect::<Vec<_>>(),
      vec![1, 3, 5, 7, 9]
    );
  }

  #[tokio::test]
  async fn test_previous_key_is_replaced() {
    let input = vec![stream_from_values(vec![Value::from(1i64).with_key(Key(7))])];
    let (pump, mut readers) = PartitionedStream::new(input, Box::new(round_robin(3)), 3, 4);
    pump.run().await;
    let values = drain(&mut readers[0]).await;
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].key(), Some(Key(0)));
    assert!(drain(&mut readers[1]).await.is_empty());
  }

  #[tokio::test]
  async fn test_every_replica_gets_close_on_empty_input() {
    let (pump, mut readers) =
      PartitionedStream::new(vec![stream_from_values(Vec::new())], Box::new(round_robin(4)), 4, 1);
    pump.run().await;
    for reader in readers.iter_mut() {
      assert_eq!(reader.next().await, None);
      assert!(reader.is_done());
    }
  }

  proptest! {
    #[test]
    fn test_equal_keys_never_split(keys in prop::collection::vec(0u64..20, 1..50), replicas in 1usize..6) {
      let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
      let owners = rt.block_on(async {
        let values: Vec<Value> = keys.iter().map(|k| Value::from(*k as i64)).collect();
        let selector = key_fn(|v: &Value| Key(v.as_i64().unwrap() as u64));
        let (pump, mut readers) =
          PartitionedStream::new(vec![stream_from_values(values)], Box::new(selector), replicas, keys.len() + 1);
        pump.run().await;
        let mut owners = std::collections::HashMap::new();
        for (replica, reader) in readers.iter_mut().enumerate() {
          for v in drain(reader).await {
            owners.entry(v.as_i64().unwrap()).or_insert_with(Vec::new).push(replica);
          }
        }
        owners
      });
      for (key, replicas_seen) in owners {
        prop_assert!(replicas_seen.iter().all(|r| *r == replicas_seen[0]), "key {} split", key);
      }
    }
  }
}
