//! Quiet-mode policy for command logging.
//!
//! High-frequency polling commands drown the log, so commands can be
//! silenced by prefix, or all at once. Silencing only affects the
//! transmit/response trail; warnings and errors are always logged, and
//! [`Instance::send_command_and_log`](crate::Instance::send_command_and_log)
//! forces the exchange into the log regardless.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{AtError, AtResult};

/// Which commands have their exchange logged.
#[derive(Debug)]
pub struct LogPolicy {
    all_silenced: AtomicBool,
    prefixes: RwLock<Vec<String>>,
    max_prefixes: usize,
}

impl LogPolicy {
    /// Create a policy that logs everything and accepts up to `max_prefixes`
    /// silenced prefixes.
    pub fn new(max_prefixes: usize) -> Self {
        LogPolicy {
            all_silenced: AtomicBool::new(false),
            prefixes: RwLock::new(Vec::with_capacity(max_prefixes)),
            max_prefixes,
        }
    }

    /// Silence every command.
    pub fn disable_all(&self) {
        self.all_silenced.store(true, Ordering::Relaxed);
    }

    /// Whether every command is silenced.
    pub fn all_disabled(&self) -> bool {
        self.all_silenced.load(Ordering::Relaxed)
    }

    /// Silence commands whose text starts with `prefix`, e.g. `AT#GPIO=`.
    pub fn disable_prefix(&self, prefix: &str) -> AtResult<()> {
        let mut prefixes = self.prefixes.write();
        if prefixes.iter().any(|p| p == prefix) {
            return Ok(());
        }
        if prefixes.len() >= self.max_prefixes {
            return Err(AtError::SilentPrefixTableFull {
                prefix: prefix.to_string(),
                capacity: self.max_prefixes,
            });
        }
        prefixes.push(prefix.to_string());
        Ok(())
    }

    /// Whether the exchange for `cmd` should stay out of the log.
    pub fn is_silent(&self, cmd: &str) -> bool {
        self.all_disabled() || self.prefixes.read().iter().any(|p| cmd.starts_with(p.as_str()))
    }
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self::new(20)
    }
}
