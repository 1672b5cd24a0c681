//! # Buffered Streams
//!
//! A buffered stream is a bounded single-consumer queue of [`StreamItem`]s
//! connecting one producer stage to one consumer stage. Writing into a full
//! buffer suspends the writer until the reader makes room; this is the only
//! back-pressure mechanism in the engine.
//!
//! The producer ends the stream by writing [`StreamItem::Close`]. Readers
//! surface it as end-of-stream: [`StreamReader::next`] and
//! [`StreamReader::blocking_next`] return `None` from the close onwards, and
//! never deliver the sentinel itself.
//!
//! Both halves offer an async and a blocking API. Operator replicas run user
//! code on dedicated threads and use the blocking calls, while the merge and
//! partition pumps are async tasks. Blocking calls must not be made from
//! within an async task.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::stream::stream_from_values;
//! use slipstream::value::Value;
//!
//! let mut reader = stream_from_values(vec![Value::from(1i64), Value::from(2i64)]);
//! assert_eq!(reader.blocking_next(), Some(Value::from(1i64)));
//! assert_eq!(reader.blocking_next(), Some(Value::from(2i64)));
//! assert_eq!(reader.blocking_next(), None);
//! ```

use crate::value::{StreamItem, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// The reading half of the stream has been dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stream reader has been dropped")]
pub struct Disconnected;

/// Creates a buffered stream holding at most `capacity` items.
///
/// A `capacity` of zero is raised to one.
pub fn buffered(capacity: usize) -> (StreamWriter, StreamReader) {
  let (tx, rx) = mpsc::channel(capacity.max(1));
  (StreamWriter { tx }, StreamReader { rx, done: false })
}

/// Creates a reader pre-loaded with `values` followed by a close.
pub fn stream_from_values<I>(values: I) -> StreamReader
where
  I: IntoIterator<Item = Value>,
{
  let items: Vec<StreamItem> = values
    .into_iter()
    .map(StreamItem::Data)
    .chain(std::iter::once(StreamItem::Close))
    .collect();
  let (writer, reader) = buffered(items.len());
  for item in items {
    let sent = writer.tx.try_send(item);
    debug_assert!(sent.is_ok(), "pre-sized stream rejected an item");
  }
  reader
}

/// The writing half of a buffered stream.
#[derive(Clone, Debug)]
pub struct StreamWriter {
  tx: mpsc::Sender<StreamItem>,
}

impl StreamWriter {
  /// Sends an item, waiting for buffer space.
  pub async fn send(&self, item: StreamItem) -> Result<(), Disconnected> {
    self.tx.send(item).await.map_err(|_| Disconnected)
  }

  /// Sends an item, blocking the current thread while the buffer is full.
  ///
  /// # Panics
  ///
  /// Panics when called from within an asynchronous execution context.
  pub fn blocking_send(&self, item: StreamItem) -> Result<(), Disconnected> {
    self.tx.blocking_send(item).map_err(|_| Disconnected)
  }

  /// Returns `true` if the reader has been dropped.
  pub fn is_disconnected(&self) -> bool {
    self.tx.is_closed()
  }
}

/// The reading half of a buffered stream.
#[derive(Debug)]
pub struct StreamReader {
  rx: mpsc::Receiver<StreamItem>,
  done: bool,
}

impl StreamReader {
  /// Returns the next value, or `None` once the stream has closed.
  pub async fn next(&mut self) -> Option<Value> {
    if self.done {
      return None;
    }
    let item = self.rx.recv().await;
    self.accept(item)
  }

  /// Blocking form of [`StreamReader::next`].
  ///
  /// # Panics
  ///
  /// Panics when called from within an asynchronous execution context.
  pub fn blocking_next(&mut self) -> Option<Value> {
    if self.done {
      return None;
    }
    let item = self.rx.blocking_recv();
    self.accept(item)
  }

  /// Returns the next raw item, including the close sentinel.
  ///
  /// Returns `None` only when every writer has been dropped.
  pub async fn recv_item(&mut self) -> Option<StreamItem> {
    self.rx.recv().await
  }

  /// Converts the reader into a [`Stream`](futures::Stream) of raw items.
  pub fn into_item_stream(self) -> ReceiverStream<StreamItem> {
    ReceiverStream::new(self.rx)
  }

  /// Returns `true` once the close has been observed.
  pub fn is_done(&self) -> bool {
    self.done
  }

  fn accept(&mut self, item: Option<StreamItem>) -> Option<Value> {
    match item {
      Some(StreamItem::Data(value)) => Some(value),
      Some(StreamItem::Close) => {
        self.done = true;
        None
      }
      None => {
        tracing::warn!("stream ended without a close signal");
        self.done = true;
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_async_send_and_next() {
    let (writer, mut reader) = buffered(4);
    writer.send(Value::from(1i64).into()).await.unwrap();
    writer.send(StreamItem::Close).await.unwrap();
    // items after close are never observed
    writer.send(Value::from(2i64).into()).await.unwrap();

    assert_eq!(reader.next().await, Some(Value::from(1i64)));
    assert_eq!(reader.next().await, None);
    assert!(reader.is_done());
    assert_eq!(reader.next().await, None);
  }

  #[tokio::test]
  async fn test_dropped_writer_ends_stream() {
    let (writer, mut reader) = buffered(1);
    drop(writer);
    assert_eq!(reader.next().await, None);
  }

  #[tokio::test]
  async fn test_send_to_dropped_reader() {
    let (writer, reader) = buffered(1);
    drop(reader);
    assert!(writer.is_disconnected());
    assert_eq!(writer.send(StreamItem::Close).await, Err(Disconnected));
  }

  #[test]
  fn test_blocking_roundtrip() {
    let (writer, mut reader) = buffered(2);
    let producer = std::thread::spawn(move || {
      for i in 0..10i64 {
        writer.blocking_send(Value::from(i).into()).unwrap();
      }
      writer.blocking_send(StreamItem::Close).unwrap();
    });
    let mut seen = Vec::new();
    while let Some(v) = reader.blocking_next() {
      seen.push(v.as_i64().unwrap());
    }
    producer.join().unwrap();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
  }

  #[test]
  fn test_stream_from_values_keeps_every_item() {
    let mut reader = stream_from_values((0..1000i64).map(Value::from));
    let mut seen = Vec::new();
    while let Some(v) = reader.blocking_next() {
      seen.push(v.as_i64().unwrap());
    }
    assert!(reader.is_done());
    assert_eq!(seen, (0..1000).collect::<Vec<_>>());
  }

  #[test]
  fn test_stream_from_empty() {
    let mut reader = stream_from_values(Vec::new());
    assert_eq!(reader.blocking_next(), None);
  }
}
