//! Event time for records and watermarks.
//!
//! This module provides [`Timestamp`], the nanosecond-scale event time carried
//! by values, and [`EventTime`], the `(timestamp, watermark)` pair that the
//! time decoration attaches to a value.
//!
//! ## Event time and watermarks
//!
//! - **Timestamp**: when the event occurred. Windows assign elements by
//!   timestamp, so arrival order does not matter.
//! - **Watermark**: a bound asserting that no record with a smaller
//!   timestamp will arrive anymore. Windows close once the watermark passes
//!   their `stop` bound.
//!
//! The watermark attached by a source is a per-source claim. When several
//! sources are merged, the [`Watermarker`](crate::watermark::Watermarker)
//! rewrites it to the minimum across sources so that it only advances as fast
//! as the slowest live source.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::time::{EventTime, Timestamp};
//!
//! let t = EventTime::new(Timestamp::new(7), Timestamp::new(5));
//! assert!(t.timestamp > t.watermark);
//! assert_eq!(Timestamp::new(3).max(Timestamp::MIN), Timestamp::new(3));
//! ```

use chrono::{DateTime, Utc};
use std::fmt;

/// Event time in nanoseconds since the Unix epoch.
///
/// Totally ordered. [`Timestamp::MIN`] sits below any valid timestamp and is
/// the initial watermark of every watermark table and window manager.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
  /// The smallest representable timestamp.
  pub const MIN: Timestamp = Timestamp(i64::MIN);

  /// The largest representable timestamp.
  pub const MAX: Timestamp = Timestamp(i64::MAX);

  /// Creates a timestamp from a raw nanosecond value.
  #[inline]
  pub const fn new(nanos: i64) -> Self {
    Self(nanos)
  }

  /// Returns the raw nanosecond value.
  #[inline]
  pub const fn as_i64(self) -> i64 {
    self.0
  }

  /// Converts a wall-clock instant into a timestamp.
  ///
  /// Instants outside the range representable in nanoseconds saturate.
  pub fn from_datetime(dt: DateTime<Utc>) -> Self {
    match dt.timestamp_nanos_opt() {
      Some(nanos) => Self(nanos),
      None if dt.timestamp() < 0 => Self::MIN,
      None => Self::MAX,
    }
  }

  /// Converts the timestamp into a wall-clock instant.
  pub fn to_datetime(self) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(self.0)
  }
}

impl From<i64> for Timestamp {
  fn from(nanos: i64) -> Self {
    Self(nanos)
  }
}

impl fmt::Display for Timestamp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Timestamp::MIN => write!(f, "-inf"),
      Timestamp::MAX => write!(f, "+inf"),
      ts => write!(
        f,
        "{}",
        ts.to_datetime()
          .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
      ),
    }
  }
}

/// The time decoration of a value: its event timestamp and the watermark
/// known when it was emitted.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventTime {
  /// When the event occurred.
  pub timestamp: Timestamp,
  /// No record with a timestamp below this bound is expected anymore.
  pub watermark: Timestamp,
}

impl EventTime {
  /// Creates a new time decoration.
  #[inline]
  pub const fn new(timestamp: Timestamp, watermark: Timestamp) -> Self {
    Self {
      timestamp,
      watermark,
    }
  }
}
