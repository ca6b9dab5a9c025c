//! Optional process-wide registry.
//!
//! Applications that want a single AT engine reachable from anywhere install
//! a registry once at startup and shut it down on exit. The free functions
//! here forward to the installed registry and fail with
//! [`AtError::NoRegistry`] when nothing is installed.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{AtError, AtResult};
use crate::instance::Instance;
use crate::registry::AtRegistry;

static REGISTRY: RwLock<Option<Arc<AtRegistry>>> = parking_lot::const_rwlock(None);

/// Install `registry` as the process-wide registry, returning the previous one.
pub fn install(registry: AtRegistry) -> Option<Arc<AtRegistry>> {
    let previous = REGISTRY.write().replace(Arc::new(registry));
    if previous.is_some() {
        warn!("Replaced the installed AT registry");
    }
    debug!("Installed AT registry");
    previous
}

/// The installed registry.
pub fn registry() -> AtResult<Arc<AtRegistry>> {
    REGISTRY.read().clone().ok_or(AtError::NoRegistry)
}

/// Uninstall the registry and close all of its instances.
pub fn shutdown() -> AtResult<()> {
    let registry = REGISTRY.write().take().ok_or(AtError::NoRegistry)?;
    debug!("Shutting down AT registry");
    registry.close_all()
}

fn instance(id: u8) -> AtResult<Arc<Instance>> {
    registry()?.instance(id)
}

/// [`Instance::send_command`] on instance `id`.
pub fn send_command(id: u8, timeout: Duration, cmd: &str) -> AtResult<String> {
    instance(id)?.send_command(timeout, cmd)
}

/// [`Instance::send_command_expect_ok`] on instance `id`. False when no
/// registry is installed.
pub fn send_command_expect_ok(id: u8, timeout: Duration, cmd: &str) -> bool {
    match instance(id) {
        Ok(instance) => instance.send_command_expect_ok(timeout, cmd),
        Err(e) => {
            warn!("Unable to send '{}': {}", cmd, e);
            false
        }
    }
}

/// [`Instance::send_command_binary`] on instance `id`.
pub fn send_command_binary(id: u8, timeout: Duration, cmd: &str) -> AtResult<Bytes> {
    instance(id)?.send_command_binary(timeout, cmd)
}

/// [`Instance::send_command_and_log`] on instance `id`.
pub fn send_command_and_log(id: u8, timeout: Duration, cmd: &str) -> AtResult<String> {
    instance(id)?.send_command_and_log(timeout, cmd)
}

/// Register a URC handler on instance 0, which receives URCs by default.
pub fn add_urc_handler<F>(header: &str, callback: F) -> AtResult<()>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    instance(0)?.add_urc_handler(header, callback)
}

/// [`AtRegistry::disable_logs_for_prefix`] on the installed registry.
pub fn disable_logs_for_prefix(prefix: &str) -> AtResult<()> {
    registry()?.disable_logs_for_prefix(prefix)
}

/// [`AtRegistry::disable_all_logs`] on the installed registry.
pub fn disable_all_logs() -> AtResult<()> {
    registry()?.disable_all_logs();
    Ok(())
}

/// Close instance `id`. It reopens on its next command.
pub fn close(id: u8) -> AtResult<()> {
    instance(id)?.close()
}
