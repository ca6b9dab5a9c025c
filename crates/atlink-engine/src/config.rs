//! Engine configuration.
//!
//! Every field has a default; a YAML file only needs the keys it changes. The
//! stock sizing is three instances, a 2 KiB accumulation buffer, ten response
//! slots and twenty URC handlers per instance.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default command timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// What to do with an in-flight command when the accumulation buffer overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the buffered bytes, warn, and keep waiting. A multi-chunk response
    /// cut this way usually ends in a timeout.
    #[default]
    DropOldest,
    /// Drop the buffered bytes and fail the pending command immediately.
    FailInFlight,
}

/// Sizing and behavior of an [`AtRegistry`](crate::AtRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of independent AT instances.
    pub instances: u8,
    /// Accumulation buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Depth of the response slot ring.
    pub response_slots: usize,
    /// URC handlers per instance.
    pub max_urc_handlers: usize,
    /// Maximum URC header length in bytes.
    pub max_header_len: usize,
    /// Maximum number of silenced command prefixes.
    pub max_silent_prefixes: usize,
    /// Default command timeout, in milliseconds.
    pub default_timeout_ms: u64,
    /// Overflow handling for in-flight commands.
    pub overflow_policy: OverflowPolicy,
    /// Commands sent once after opening an instance, each expected to return OK.
    pub init_commands: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            instances: 3,
            buffer_capacity: 2048,
            response_slots: 10,
            max_urc_handlers: 20,
            max_header_len: 31,
            max_silent_prefixes: 20,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            overflow_policy: OverflowPolicy::DropOldest,
            init_commands: vec!["ATE0".to_string()],
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from YAML text and validate it.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Reject sizes that would make the engine unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.instances == 0, "instances must be at least 1"),
            (self.buffer_capacity == 0, "buffer_capacity must be at least 1"),
            (self.response_slots == 0, "response_slots must be at least 1"),
            (self.max_header_len == 0, "max_header_len must be at least 1"),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, msg)) => Err(ConfigError::Invalid((*msg).to_string())),
            None => Ok(()),
        }
    }

    /// The default command timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
