//! Per-account execution locks.
//!
//! Every account key maps to one `RwLock`. Writes take it exclusively, reads
//! share it. Locks are created on first use and kept for the lifetime of the
//! process; the set of accounts is small and bounded by registered numbers.
//!
//! Tokio's `RwLock` is fair: waiters are served in arrival order, so writes
//! against one account run first-come-first-served and a steady stream of
//! readers cannot starve a writer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

use crate::error::GatewayError;

/// How an operation holds the account lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Concurrent with other shared holders, never with an exclusive one.
    Shared,
    /// Sole holder.
    Exclusive,
}

/// Held account lock. Dropping it releases the lock.
#[derive(Debug)]
pub enum AccountGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

impl AccountGuard {
    pub fn mode(&self) -> LockMode {
        match self {
            AccountGuard::Shared(_) => LockMode::Shared,
            AccountGuard::Exclusive(_) => LockMode::Exclusive,
        }
    }
}

/// Registry of per-account locks.
///
/// The map has its own sharded locking (DashMap) which is only held while
/// looking up or inserting a lock handle, never while an account lock is
/// awaited.
#[derive(Clone, Default)]
pub struct AccountLocks {
    locks: Arc<DashMap<String, Arc<RwLock<()>>>>,
    acquire_timeout: Option<Duration>,
}

impl AccountLocks {
    pub fn new(acquire_timeout: Option<Duration>) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            acquire_timeout,
        }
    }

    /// Lock handle for `key`, created on first use.
    pub fn get(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Acquire the lock for `key` in `mode`.
    ///
    /// Fails with `Busy` when an acquisition timeout is configured and
    /// expires first.
    pub async fn acquire(&self, key: &str, mode: LockMode) -> Result<AccountGuard, GatewayError> {
        let lock = self.get(key);
        let acquire = async move {
            match mode {
                LockMode::Shared => AccountGuard::Shared(lock.read_owned().await),
                LockMode::Exclusive => AccountGuard::Exclusive(lock.write_owned().await),
            }
        };

        let guard = match self.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(account = %key, ?mode, "Account lock acquisition timed out");
                    return Err(GatewayError::Busy(key.to_string()));
                }
            },
            None => acquire.await,
        };

        debug!(account = %key, ?mode, "Account lock acquired");
        Ok(guard)
    }

    /// Number of accounts that have a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
