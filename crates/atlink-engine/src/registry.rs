//! The set of AT instances sharing one transport and one log policy.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{AtError, AtResult};
use crate::instance::Instance;
use crate::policy::LogPolicy;
use crate::transport::Transport;

/// Owns a fixed number of [`Instance`]s, numbered from zero.
///
/// Instances are created up front but their channels are opened lazily, by
/// the first command sent through each of them.
#[derive(Debug)]
pub struct AtRegistry {
    policy: Arc<LogPolicy>,
    instances: Vec<Arc<Instance>>,
}

impl AtRegistry {
    /// Create `config.instances` instances on top of `transport`.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Self {
        let config = Arc::new(config);
        let policy = Arc::new(LogPolicy::new(config.max_silent_prefixes));
        let instances = (0..config.instances)
            .map(|id| {
                Instance::new(
                    id,
                    Arc::clone(&config),
                    Arc::clone(&transport),
                    Arc::clone(&policy),
                )
            })
            .collect();
        debug!("Created AT registry with {} instances", config.instances);

        AtRegistry {
            policy,
            instances,
        }
    }

    /// The instance numbered `id`.
    pub fn instance(&self, id: u8) -> AtResult<Arc<Instance>> {
        self.instances
            .get(id as usize)
            .cloned()
            .ok_or(AtError::UnknownInstance {
                requested: id,
                available: self.instances.len(),
            })
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the registry has no instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Keep commands starting with `prefix` out of the log on every instance.
    pub fn disable_logs_for_prefix(&self, prefix: &str) -> AtResult<()> {
        self.policy.disable_prefix(prefix)?;
        info!("Silenced AT commands starting with '{}'", prefix);
        Ok(())
    }

    /// Keep every command out of the log.
    pub fn disable_all_logs(&self) {
        self.policy.disable_all();
        info!("Silenced all AT commands");
    }

    /// Close every instance. Failures are collected; the first is returned.
    pub fn close_all(&self) -> AtResult<()> {
        let mut first_err = None;
        for instance in &self.instances {
            if let Err(e) = instance.close() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
