//! # Source Merge
//!
//! [`MergedStream`] fans `K` upstream readers into one. Whichever upstream has
//! an item ready may produce next; the underlying
//! [`StreamMap`](tokio_stream::StreamMap) starts polling from a random
//! position on every call so no source is starved.
//!
//! Each value is tagged with the index of the source it came from and passed
//! through a [`Watermarker`]. A close from a source removes that source from
//! selection. The merged stream ends once every source has closed, so the
//! consumer sees a single end-of-stream no matter how many sources feed it.

use crate::stream::StreamReader;
use crate::value::{Source, StreamItem, Value};
use crate::watermark::Watermarker;
use tokio_stream::StreamExt;
use tokio_stream::StreamMap;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

/// Fair fan-in of several readers with source tagging and watermark merging.
pub struct MergedStream {
  streams: StreamMap<usize, ReceiverStream<StreamItem>>,
  open: usize,
  watermarker: Watermarker,
}

impl MergedStream {
  /// Merges `readers`; the reader at index `i` is tagged as source `i`.
  pub fn new(readers: Vec<StreamReader>) -> Self {
    let open = readers.len();
    let mut streams = StreamMap::with_capacity(open);
    for (i, reader) in readers.into_iter().enumerate() {
      streams.insert(i, reader.into_item_stream());
    }
    Self {
      streams,
      open,
      watermarker: Watermarker::new(open),
    }
  }

  /// Returns the next value from any source, or `None` once all have closed.
  pub async fn next(&mut self) -> Option<Value> {
    while self.open > 0 {
      match self.streams.next().await {
        Some((i, StreamItem::Data(mut value))) => {
          let source = Source(i);
          value.set_source(source);
          self.watermarker.observe(source, &mut value);
          return Some(value);
        }
        Some((i, StreamItem::Close)) => {
          self.streams.remove(&i);
          self.watermarker.retire(Source(i));
          self.open -= 1;
          debug!(source = i, remaining = self.open, "merge source closed");
        }
        None => {
          error!(
            remaining = self.open,
            "merge sources ended without closing"
          );
          self.open = 0;
        }
      }
    }
    None
  }

  /// Number of sources that have not closed yet.
  pub fn open_sources(&self) -> usize {
    self.open
  }

  /// The current global watermark.
  pub fn watermark(&self) -> crate::time::Timestamp {
    self.watermarker.current()
  }
}
