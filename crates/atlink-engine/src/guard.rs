//! Re-entrancy guard for URC callbacks.
//!
//! URC callbacks run on the receiving thread with the instance lock held.
//! Any call from such a callback back into the same instance would block on
//! that lock forever, so the receive path marks the instance as dispatching
//! for the current thread and the public entry points refuse to run while
//! the mark is set.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static DISPATCHING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Allocate a process-unique key identifying one instance.
pub(crate) fn next_instance_key() -> u64 {
    NEXT_KEY.fetch_add(1, Ordering::Relaxed)
}

/// Whether the current thread is dispatching for the instance `key`.
pub(crate) fn is_dispatching(key: u64) -> bool {
    DISPATCHING.with(|d| d.borrow().contains(&key))
}

/// Marks the current thread as dispatching for one instance until dropped.
pub(crate) struct DispatchGuard {
    key: u64,
}

impl DispatchGuard {
    pub(crate) fn enter(key: u64) -> Self {
        DISPATCHING.with(|d| d.borrow_mut().push(key));
        DispatchGuard { key }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| {
            let mut keys = d.borrow_mut();
            if let Some(pos) = keys.iter().rposition(|&k| k == self.key) {
                keys.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_scopes_to_thread_and_key() {
        let key = next_instance_key();
        let other = next_instance_key();
        assert!(!is_dispatching(key));
        {
            let _guard = DispatchGuard::enter(key);
            assert!(is_dispatching(key));
            assert!(!is_dispatching(other));
            std::thread::spawn(move || assert!(!is_dispatching(key)))
                .join()
                .unwrap();
        }
        assert!(!is_dispatching(key));
    }
}
