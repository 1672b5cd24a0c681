//! # Values
//!
//! The data model flowing through the engine.
//!
//! A [`Value`] is an envelope around a typed [`Payload`]. The envelope carries
//! three optional decorations that the runtime attaches as records move
//! between stages:
//!
//! - **key** ([`Key`]): set by the partitioner on every value entering an
//!   operator, used to route the value to a replica and to select the per-key
//!   node clone.
//! - **source** ([`Source`]): set by the merge stage to the index of the
//!   inbound edge the value arrived on.
//! - **time** ([`EventTime`]): the event timestamp and watermark, set by a
//!   timestamp-assigning node and rewritten by the watermarker.
//!
//! Setting a decoration on a value that already carries it replaces it in
//! place. [`Value::unwrap`] returns the undecorated base value.
//!
//! The end of a stream is signalled in-band by [`StreamItem::Close`], which is
//! never delivered to user transformations.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::value::{Key, Value};
//!
//! let mut v = Value::from("hello");
//! v.set_key(Key(3));
//! v.set_key(Key(4));
//! assert_eq!(v.key(), Some(Key(4)));
//! assert_eq!(v.unwrap().key(), None);
//! assert_eq!(v.as_str().unwrap(), "hello");
//! ```

use crate::error::{Decoration, ValueError};
use crate::time::{EventTime, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition identifier derived from a value by a key selector.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(pub u64);

impl Key {
  /// Returns the replica index owning this key among `replicas` replicas.
  ///
  /// # Panics
  ///
  /// Panics if `replicas` is zero.
  #[inline]
  pub fn partition(self, replicas: usize) -> usize {
    (self.0 % replicas as u64) as usize
  }
}

impl From<u64> for Key {
  fn from(k: u64) -> Self {
    Self(k)
  }
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Index of the inbound edge a merged value arrived on.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Source(pub usize);

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Type tag of a payload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum ValueType {
  /// Absence of a more specific type.
  Null,
  /// A boolean.
  Bool,
  /// A signed 64-bit integer.
  Int64,
  /// A 64-bit float.
  Float64,
  /// A UTF-8 string.
  String,
  /// A list of payloads.
  List,
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ValueType::Null => "null",
      ValueType::Bool => "bool",
      ValueType::Int64 => "int64",
      ValueType::Float64 => "float64",
      ValueType::String => "string",
      ValueType::List => "list",
    };
    f.write_str(name)
  }
}

/// A typed payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
  /// A missing value of the given type.
  Null(ValueType),
  /// A boolean.
  Bool(bool),
  /// A signed 64-bit integer.
  Int64(i64),
  /// A 64-bit float.
  Float64(f64),
  /// A UTF-8 string.
  String(String),
  /// A list of payloads.
  List(Vec<Payload>),
}

impl Payload {
  /// Returns the type tag of the payload. Nulls report their declared type.
  pub fn value_type(&self) -> ValueType {
    match self {
      Payload::Null(t) => *t,
      Payload::Bool(_) => ValueType::Bool,
      Payload::Int64(_) => ValueType::Int64,
      Payload::Float64(_) => ValueType::Float64,
      Payload::String(_) => ValueType::String,
      Payload::List(_) => ValueType::List,
    }
  }
}

impl fmt::Display for Payload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Payload::Null(_) => f.write_str("null"),
      Payload::Bool(b) => write!(f, "{b}"),
      Payload::Int64(i) => write!(f, "{i}"),
      Payload::Float64(x) => write!(f, "{x}"),
      Payload::String(s) => f.write_str(s),
      Payload::List(items) => {
        f.write_str("[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{item}")?;
        }
        f.write_str("]")
      }
    }
  }
}

/// A payload plus its optional key, source and time decorations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Value {
  payload: Payload,
  key: Option<Key>,
  source: Option<Source>,
  time: Option<EventTime>,
}

impl Value {
  /// Creates an undecorated value.
  pub fn new(payload: Payload) -> Self {
    Self {
      payload,
      key: None,
      source: None,
      time: None,
    }
  }

  /// Creates an untyped null value, the placeholder passed to source nodes.
  pub fn null() -> Self {
    Self::new(Payload::Null(ValueType::Null))
  }

  /// Creates a null value of the given type.
  pub fn null_of(value_type: ValueType) -> Self {
    Self::new(Payload::Null(value_type))
  }

  /// Returns the payload.
  pub fn payload(&self) -> &Payload {
    &self.payload
  }

  /// Consumes the value and returns its payload, dropping decorations.
  pub fn into_payload(self) -> Payload {
    self.payload
  }

  /// Returns the type tag of the payload.
  pub fn value_type(&self) -> ValueType {
    self.payload.value_type()
  }

  /// Returns `true` if the payload is a null of any type.
  pub fn is_null(&self) -> bool {
    matches!(self.payload, Payload::Null(_))
  }

  /// Returns the undecorated base value.
  pub fn unwrap(&self) -> Value {
    Value::new(self.payload.clone())
  }

  /// Returns `true` if any decoration is present.
  pub fn is_decorated(&self) -> bool {
    self.key.is_some() || self.source.is_some() || self.time.is_some()
  }

  /// Sets the key decoration, replacing any previous key.
  pub fn set_key(&mut self, key: Key) {
    self.key = Some(key);
  }

  /// Builder form of [`Value::set_key`].
  pub fn with_key(mut self, key: Key) -> Self {
    self.set_key(key);
    self
  }

  /// Returns the key decoration, if any.
  pub fn key(&self) -> Option<Key> {
    self.key
  }

  /// Returns the key decoration or an error if the value is not keyed.
  pub fn require_key(&self) -> Result<Key, ValueError> {
    self.key.ok_or_else(|| self.missing(Decoration::Key))
  }

  /// Removes the key decoration.
  pub fn clear_key(&mut self) {
    self.key = None;
  }

  /// Sets the source decoration, replacing any previous source.
  pub fn set_source(&mut self, source: Source) {
    self.source = Some(source);
  }

  /// Builder form of [`Value::set_source`].
  pub fn with_source(mut self, source: Source) -> Self {
    self.set_source(source);
    self
  }

  /// Returns the source decoration, if any.
  pub fn source(&self) -> Option<Source> {
    self.source
  }

  /// Returns the source decoration or an error if the value has none.
  pub fn require_source(&self) -> Result<Source, ValueError> {
    self.source.ok_or_else(|| self.missing(Decoration::Source))
  }

  /// Sets the time decoration, replacing any previous one.
  pub fn set_time(&mut self, timestamp: Timestamp, watermark: Timestamp) {
    self.time = Some(EventTime::new(timestamp, watermark));
  }

  /// Builder form of [`Value::set_time`].
  pub fn with_time(mut self, timestamp: Timestamp, watermark: Timestamp) -> Self {
    self.set_time(timestamp, watermark);
    self
  }

  /// Returns the time decoration, if any.
  pub fn time(&self) -> Option<EventTime> {
    self.time
  }

  /// Returns the time decoration or an error if the value has none.
  pub fn require_time(&self) -> Result<EventTime, ValueError> {
    self.time.ok_or_else(|| self.missing(Decoration::Time))
  }

  /// Returns the boolean payload.
  pub fn as_bool(&self) -> Result<bool, ValueError> {
    match self.payload {
      Payload::Bool(b) => Ok(b),
      _ => Err(self.mismatch(ValueType::Bool)),
    }
  }

  /// Returns the integer payload.
  pub fn as_i64(&self) -> Result<i64, ValueError> {
    match self.payload {
      Payload::Int64(i) => Ok(i),
      _ => Err(self.mismatch(ValueType::Int64)),
    }
  }

  /// Returns the float payload.
  pub fn as_f64(&self) -> Result<f64, ValueError> {
    match self.payload {
      Payload::Float64(x) => Ok(x),
      _ => Err(self.mismatch(ValueType::Float64)),
    }
  }

  /// Returns the string payload.
  pub fn as_str(&self) -> Result<&str, ValueError> {
    match &self.payload {
      Payload::String(s) => Ok(s),
      _ => Err(self.mismatch(ValueType::String)),
    }
  }

  /// Returns the list payload.
  pub fn as_list(&self) -> Result<&[Payload], ValueError> {
    match &self.payload {
      Payload::List(items) => Ok(items),
      _ => Err(self.mismatch(ValueType::List)),
    }
  }

  fn missing(&self, decoration: Decoration) -> ValueError {
    ValueError::MissingDecoration {
      decoration,
      value: self.to_string(),
    }
  }

  fn mismatch(&self, expected: ValueType) -> ValueError {
    ValueError::TypeMismatch {
      expected: expected.to_string(),
      actual: self.value_type().to_string(),
      value: self.to_string(),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.payload)?;
    if !self.is_decorated() {
      return Ok(());
    }
    f.write_str(" {")?;
    let mut sep = "";
    if let Some(key) = self.key {
      write!(f, "key: {key}")?;
      sep = ", ";
    }
    if let Some(source) = self.source {
      write!(f, "{sep}source: {source}")?;
      sep = ", ";
    }
    if let Some(time) = self.time {
      write!(f, "{sep}ts: {}, wm: {}", time.timestamp, time.watermark)?;
    }
    f.write_str("}")
  }
}

impl From<Payload> for Value {
  fn from(payload: Payload) -> Self {
    Value::new(payload)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Value::new(Payload::Bool(b))
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::new(Payload::Int64(i))
  }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self {
    Value::new(Payload::Int64(i64::from(i)))
  }
}

impl From<f64> for Value {
  fn from(x: f64) -> Self {
    Value::new(Payload::Float64(x))
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Value::new(Payload::String(s))
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Value::new(Payload::String(s.to_string()))
  }
}

impl From<Vec<Payload>> for Value {
  fn from(items: Vec<Payload>) -> Self {
    Value::new(Payload::List(items))
  }
}

/// An element of a stream: either a record or the end-of-stream sentinel.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
  /// A record.
  Data(Value),
  /// The producer has finished; no further items follow from it.
  Close,
}

impl StreamItem {
  /// Returns `true` for the close sentinel.
  pub fn is_close(&self) -> bool {
    matches!(self, StreamItem::Close)
  }
}

impl From<Value> for StreamItem {
  fn from(value: Value) -> Self {
    StreamItem::Data(value)
  }
}
