//! # Watermarks
//!
//! The [`Watermarker`] sits on top of a merge of `K` sources. It keeps the
//! highest watermark seen from each source and rewrites the watermark of
//! every time-decorated value to the minimum across the table, so the
//! downstream watermark only advances as fast as the slowest live source.
//!
//! All `K` sources are registered up front at [`Timestamp::MIN`]. A source
//! that has not produced a watermark yet therefore holds the global
//! watermark at the minimum, which keeps the emitted sequence non-decreasing
//! for every interleaving. A source that closes is retired and no longer
//! holds the minimum back.
//!
//! A watermark lower than the one already recorded for its source is ignored
//! for the table. The value's own timestamp is never altered.

use crate::time::Timestamp;
use crate::value::{Source, Value};
use tracing::{trace, warn};

/// Per-source high-watermark table.
#[derive(Clone, Debug)]
pub struct Watermarker {
  marks: Vec<Option<Timestamp>>,
  current: Timestamp,
}

impl Watermarker {
  /// Creates a watermarker over `sources` merged inputs.
  pub fn new(sources: usize) -> Self {
    Self {
      marks: vec![Some(Timestamp::MIN); sources],
      current: Timestamp::MIN,
    }
  }

  /// Updates the table with `value`'s watermark and rewrites it to the
  /// global minimum. Values without a time decoration pass through.
  pub fn observe(&mut self, source: Source, value: &mut Value) {
    let Some(time) = value.time() else {
      return;
    };
    match self.marks.get_mut(source.0) {
      Some(Some(mark)) => {
        if time.watermark > *mark {
          *mark = time.watermark;
          self.recompute();
        }
      }
      Some(None) => warn!(%source, "value from a retired source"),
      None => warn!(%source, "value from an unknown source"),
    }
    value.set_time(time.timestamp, self.current);
  }

  /// Removes `source` from the table once it has closed.
  pub fn retire(&mut self, source: Source) {
    if let Some(mark) = self.marks.get_mut(source.0) {
      *mark = None;
      self.recompute();
    }
  }

  /// The global watermark: the minimum over live sources.
  pub fn current(&self) -> Timestamp {
    self.current
  }

  /// The recorded high watermark of `source`, or `None` once retired.
  pub fn source_watermark(&self, source: Source) -> Option<Timestamp> {
    self.marks.get(source.0).copied().flatten()
  }

  fn recompute(&mut self) {
    let Some(min) = self.marks.iter().flatten().min().copied() else {
      return;
    };
    if min > self.current {
      trace!(from = %self.current, to = %min, "watermark advanced");
      self.current = min;
    }
  }
}
