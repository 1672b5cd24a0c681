//! # Key Selector Test Suite
//!
//! Tests for the built-in key selectors and partition stability.

use crate::key::{KeySelector, fixed, hash_by, hash_key, key_fn, round_robin};
use crate::value::{Key, Value};
use proptest::prelude::*;

#[test]
fn test_fixed_selector() {
  let mut s = fixed();
  assert_eq!(s.get_key(&Value::from(1i64)), Key(0));
  assert_eq!(s.get_key(&Value::from("x")), Key(0));
  assert_eq!(s.name(), "fixed");
}

#[test]
fn test_round_robin_rotates() {
  let mut s = round_robin(3);
  let v = Value::null();
  let keys: Vec<u64> = (0..7).map(|_| s.get_key(&v).0).collect();
  assert_eq!(keys, vec![0, 1, 2, 0, 1, 2, 0]);
}

#[test]
fn test_round_robin_zero_behaves_as_one() {
  let mut s = round_robin(0);
  let v = Value::null();
  assert_eq!(s.get_key(&v), Key(0));
  assert_eq!(s.get_key(&v), Key(0));
}

#[test]
fn test_fn_selector() {
  let mut s = key_fn(|v: &Value| Key(v.as_i64().unwrap_or(0) as u64 % 2));
  assert_eq!(s.get_key(&Value::from(3i64)), Key(1));
  assert_eq!(s.get_key(&Value::from(4i64)), Key(0));
}

#[test]
fn test_hash_key_is_stable() {
  // first eight bytes of sha256("") read big-endian
  assert_eq!(hash_key(b""), Key(0xe3b0c44298fc1c14));
}

#[test]
fn test_boxed_selector_delegates() {
  let mut s: Box<dyn KeySelector> = Box::new(round_robin(2));
  assert_eq!(s.name(), "round-robin");
  assert_eq!(s.get_key(&Value::null()), Key(0));
  assert_eq!(s.get_key(&Value::null()), Key(1));
}

proptest! {
  #[test]
  fn test_equal_values_route_to_same_replica(word in "[a-z]{1,12}", replicas in 1usize..16) {
    let mut s = hash_by(|v: &Value| v.to_string());
    let first = s.get_key(&Value::from(word.as_str())).partition(replicas);
    let second = s.get_key(&Value::from(word.as_str())).partition(replicas);
    prop_assert_eq!(first, second);
    prop_assert!(first < replicas);
  }
}
