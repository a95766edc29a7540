//! Named per-stack locks for transitions that must not interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stackflow_id::StackId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::locked;

type LockKey = (&'static str, StackId);
type LockTable = Mutex<HashMap<LockKey, LockEntry>>;

#[derive(Debug)]
struct LockEntry {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters.
    users: usize,
}

/// Lock table keyed by `(operation, stack id)`.
///
/// Entries are created on first use and removed when the last holder or
/// waiter lets go, including waiters whose `acquire` was dropped, so the
/// table only holds keys that are in use.
#[derive(Debug, Clone, Default)]
pub struct FlowLocks {
    table: Arc<LockTable>,
}

impl FlowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the lock of `operation` on `stack_id`.
    pub async fn acquire(&self, operation: &'static str, stack_id: StackId) -> FlowLockGuard {
        let key = (operation, stack_id);
        let mutex = {
            let mut table = locked(&self.table);
            let entry = table.entry(key).or_insert_with(|| LockEntry {
                mutex: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            entry.users += 1;
            entry.mutex.clone()
        };
        // Counts this caller as a user until it lets go, whether it gets the
        // lock or stops waiting.
        let registration = Registration {
            table: self.table.clone(),
            key,
        };

        let guard = mutex.lock_owned().await;
        debug!(operation, %stack_id, "lock acquired");
        FlowLockGuard {
            _guard: guard,
            registration,
        }
    }

    pub fn is_locked(&self, operation: &'static str, stack_id: StackId) -> bool {
        locked(&self.table)
            .get(&(operation, stack_id))
            .is_some_and(|entry| entry.mutex.try_lock().is_err())
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        locked(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Registration {
    table: Arc<LockTable>,
    key: LockKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut table = locked(&self.table);
        let last = match table.get_mut(&self.key) {
            Some(entry) => {
                entry.users = entry.users.saturating_sub(1);
                entry.users == 0
            }
            None => false,
        };
        if last {
            table.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("operation", &self.key.0)
            .field("stack_id", &self.key.1)
            .finish()
    }
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct FlowLockGuard {
    // Field order matters: the mutex is released before the entry is
    // unregistered.
    _guard: OwnedMutexGuard<()>,
    registration: Registration,
}

impl Drop for FlowLockGuard {
    fn drop(&mut self) {
        let (operation, stack_id) = self.registration.key;
        debug!(operation, %stack_id, "lock released");
    }
}
