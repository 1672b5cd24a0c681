//! # Value Test Suite
//!
//! Tests for the value envelope: decoration set/get/clear semantics, the
//! unwrap operation, payload accessors and their type errors.

use crate::error::{Decoration, ValueError};
use crate::time::Timestamp;
use crate::value::{Key, Payload, Source, StreamItem, Value, ValueType};

#[test]
fn test_set_key_roundtrip() {
  for k in [0u64, 1, 7, u64::MAX] {
    let mut v = Value::from(42i64);
    v.set_key(Key(k));
    assert_eq!(v.key(), Some(Key(k)));
    assert_eq!(v.as_i64().unwrap(), 42);
  }
}

#[test]
fn test_set_key_overwrites_in_place() {
  let mut v = Value::from("word");
  v.set_key(Key(1));
  v.set_key(Key(2));
  v.set_key(Key(3));
  assert_eq!(v.key(), Some(Key(3)));

  // a single unwrap always reaches the base value
  let base = v.unwrap();
  assert!(!base.is_decorated());
  assert_eq!(base, Value::from("word"));
}

#[test]
fn test_clear_key() {
  let mut v = Value::from(1i64).with_key(Key(5));
  v.clear_key();
  assert_eq!(v.key(), None);
  assert!(matches!(
    v.require_key(),
    Err(ValueError::MissingDecoration {
      decoration: Decoration::Key,
      ..
    })
  ));
}

#[test]
fn test_decorations_are_independent() {
  let v = Value::from(true)
    .with_key(Key(9))
    .with_source(Source(2))
    .with_time(Timestamp::new(10), Timestamp::new(4));

  assert_eq!(v.key(), Some(Key(9)));
  assert_eq!(v.source(), Some(Source(2)));
  let time = v.require_time().unwrap();
  assert_eq!(time.timestamp, Timestamp::new(10));
  assert_eq!(time.watermark, Timestamp::new(4));

  let mut v = v;
  v.set_time(Timestamp::new(11), Timestamp::new(5));
  assert_eq!(v.key(), Some(Key(9)));
  assert_eq!(v.time().unwrap().timestamp, Timestamp::new(11));
}

#[test]
fn test_require_time_on_undecorated_value() {
  let err = Value::from(3i64).require_time().unwrap_err();
  assert_eq!(err.to_string(), "value 3 is not decorated with a time");
}

#[test]
fn test_type_mismatch() {
  let err = Value::from("abc").as_i64().unwrap_err();
  assert_eq!(
    err,
    ValueError::TypeMismatch {
      expected: "int64".to_string(),
      actual: "string".to_string(),
      value: "abc".to_string(),
    }
  );
}

#[test]
fn test_typed_null() {
  let v = Value::null_of(ValueType::String);
  assert!(v.is_null());
  assert_eq!(v.value_type(), ValueType::String);
  assert!(v.as_str().is_err());
  assert_eq!(Value::null().value_type(), ValueType::Null);
}

#[test]
fn test_display() {
  assert_eq!(Value::from(5i64).to_string(), "5");
  assert_eq!(Value::from(5i64).with_key(Key(1)).to_string(), "5 {key: 1}");
  assert_eq!(
    Value::from(vec![Payload::Int64(1), Payload::String("a".into())]).to_string(),
    "[1, a]"
  );
  assert_eq!(
    Value::from("x")
      .with_source(Source(0))
      .with_time(Timestamp::MIN, Timestamp::MIN)
      .to_string(),
    "x {source: 0, ts: -inf, wm: -inf}"
  );
}

#[test]
fn test_key_partition() {
  assert_eq!(Key(0).partition(4), 0);
  assert_eq!(Key(5).partition(4), 1);
  assert_eq!(Key(u64::MAX).partition(2), 1);
}

#[test]
fn test_stream_item() {
  assert!(StreamItem::Close.is_close());
  assert!(!StreamItem::from(Value::null()).is_close());
}
