//! Engine configuration.
//!
//! [`EngineConfig`] can be built in code, parsed from JSON or read from the
//! environment. Missing JSON fields and unset variables fall back to the
//! defaults.
//!
//! ```rust
//! use slipstream::config::EngineConfig;
//!
//! let config = EngineConfig::from_json(r#"{"buffer_size": 16}"#).unwrap();
//! assert_eq!(config.buffer_size, 16);
//! assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default capacity of every edge buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Environment variable overriding [`EngineConfig::buffer_size`].
pub const BUFFER_SIZE_VAR: &str = "SLIPSTREAM_BUFFER_SIZE";

/// Runtime settings of an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Capacity of every edge buffer and every replica input buffer
  /// (default: 1024). A full buffer blocks its producer.
  pub buffer_size: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      buffer_size: DEFAULT_BUFFER_SIZE,
    }
  }
}

impl EngineConfig {
  /// Sets the buffer size.
  #[must_use]
  pub fn with_buffer_size(mut self, size: usize) -> Self {
    self.buffer_size = size;
    self
  }

  /// Parses a JSON document.
  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads the configuration from the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();
    if let Some(raw) = lookup(BUFFER_SIZE_VAR) {
      config.buffer_size = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        variable: BUFFER_SIZE_VAR.to_string(),
        value: raw.clone(),
      })?;
    }
    config.validate()?;
    Ok(config)
  }

  /// Checks that every field is in range.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.buffer_size == 0 {
      return Err(ConfigError::Invalid(
        "buffer_size must be greater than 0".to_string(),
      ));
    }
    Ok(())
  }
}
