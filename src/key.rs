//! # Key Selectors
//!
//! A [`KeySelector`] derives a partition [`Key`] from a value. The partitioner
//! in front of every operator calls it once per record and routes the record
//! to replica `key mod parallelism`, so all records sharing a key are handled
//! by the same replica and the same per-key node clone.
//!
//! Built-ins:
//!
//! - [`FixedKeySelector`]: always key 0, for unpartitioned consumers.
//! - [`RoundRobinKeySelector`]: rotates over `0..n`; the default for edges
//!   that declare no selector. Its counter is mutated on every call and is
//!   not reproducible across runs.
//! - [`FnKeySelector`]: any closure from value to key.
//! - [`HashKeySelector`]: stable hash of a string projection of the value.
//!
//! ## Example
//!
//! ```rust
//! use slipstream::key::{hash_by, KeySelector};
//! use slipstream::value::Value;
//!
//! let mut by_word = hash_by(|v: &Value| v.to_string());
//! let a = by_word.get_key(&Value::from("sparta"));
//! let b = by_word.get_key(&Value::from("sparta"));
//! assert_eq!(a, b);
//! ```

use crate::value::{Key, Value};
use sha2::{Digest, Sha256};

/// Derives a partition key from a value.
pub trait KeySelector: Send {
  /// Returns the key for `value`.
  fn get_key(&mut self, value: &Value) -> Key;

  /// Short description used in logs and graph rendering.
  fn name(&self) -> &str {
    "custom"
  }
}

impl<K: KeySelector + ?Sized> KeySelector for Box<K> {
  fn get_key(&mut self, value: &Value) -> Key {
    (**self).get_key(value)
  }

  fn name(&self) -> &str {
    (**self).name()
  }
}

/// Always returns key 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedKeySelector;

impl KeySelector for FixedKeySelector {
  fn get_key(&mut self, _value: &Value) -> Key {
    Key(0)
  }

  fn name(&self) -> &str {
    "fixed"
  }
}

/// Assigns keys `0, 1, .., n-1, 0, ..` in arrival order.
#[derive(Clone, Debug)]
pub struct RoundRobinKeySelector {
  n: u64,
  next: u64,
}

impl RoundRobinKeySelector {
  /// Creates a selector rotating over `n` keys. `n` of zero is treated as one.
  pub fn new(n: usize) -> Self {
    Self {
      n: (n as u64).max(1),
      next: 0,
    }
  }
}

impl KeySelector for RoundRobinKeySelector {
  fn get_key(&mut self, _value: &Value) -> Key {
    let key = Key(self.next);
    self.next = (self.next + 1) % self.n;
    key
  }

  fn name(&self) -> &str {
    "round-robin"
  }
}

/// Key selector backed by a closure.
pub struct FnKeySelector<F> {
  f: F,
}

impl<F> FnKeySelector<F>
where
  F: FnMut(&Value) -> Key + Send,
{
  /// Wraps `f` as a key selector.
  pub fn new(f: F) -> Self {
    Self { f }
  }
}

impl<F> KeySelector for FnKeySelector<F>
where
  F: FnMut(&Value) -> Key + Send,
{
  fn get_key(&mut self, value: &Value) -> Key {
    (self.f)(value)
  }

  fn name(&self) -> &str {
    "fn"
  }
}

/// Keys values by the SHA-256 digest of a string projection.
///
/// The key is the first eight bytes of the digest read big-endian, so it is
/// stable across processes and platforms.
pub struct HashKeySelector<F> {
  projection: F,
}

impl<F> HashKeySelector<F>
where
  F: Fn(&Value) -> String + Send,
{
  /// Creates a selector hashing the string returned by `projection`.
  pub fn new(projection: F) -> Self {
    Self { projection }
  }
}

impl<F> KeySelector for HashKeySelector<F>
where
  F: Fn(&Value) -> String + Send,
{
  fn get_key(&mut self, value: &Value) -> Key {
    hash_key((self.projection)(value).as_bytes())
  }

  fn name(&self) -> &str {
    "hash"
  }
}

/// Hashes `bytes` into a key.
pub fn hash_key(bytes: &[u8]) -> Key {
  let digest = Sha256::digest(bytes);
  let mut prefix = [0u8; 8];
  prefix.copy_from_slice(&digest[..8]);
  Key(u64::from_be_bytes(prefix))
}

/// Shorthand for [`FixedKeySelector`].
pub fn fixed() -> FixedKeySelector {
  FixedKeySelector
}

/// Shorthand for [`RoundRobinKeySelector::new`].
pub fn round_robin(n: usize) -> RoundRobinKeySelector {
  RoundRobinKeySelector::new(n)
}

/// Shorthand for [`FnKeySelector::new`].
pub fn key_fn<F>(f: F) -> FnKeySelector<F>
where
  F: FnMut(&Value) -> Key + Send,
{
  FnKeySelector::new(f)
}

/// Shorthand for [`HashKeySelector::new`].
pub fn hash_by<F>(projection: F) -> HashKeySelector<F>
where
  F: Fn(&Value) -> String + Send,
{
  HashKeySelector::new(projection)
}
