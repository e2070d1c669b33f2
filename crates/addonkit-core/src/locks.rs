//! Process-wide named locks.
//!
//! Locks are created on first use and kept for the life of the table. Each
//! one is a `tokio::sync::Mutex`, so waiters acquire in FIFO order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Name of a lock in the [`NamedLocks`] table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Held while a profile's manager is looked up or constructed.
    LoadProfile(String),
    /// Held across a profile configuration rewrite and the manager unload.
    ModifyProfile(String),
    /// Held while the global configuration is rewritten.
    UpdateGlobalConfig,
    /// Held while a device authorization flow is started.
    InitiateAuthFlow,
    /// Serialises installs, updates, removals and pins within a profile.
    MutatePkgs(String),
    /// One download per URL at a time.
    DownloadPkg(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::LoadProfile(p) => write!(f, "load profile {}", p),
            LockKey::ModifyProfile(p) => write!(f, "modify profile {}", p),
            LockKey::UpdateGlobalConfig => f.write_str("update global config"),
            LockKey::InitiateAuthFlow => f.write_str("initiate auth flow"),
            LockKey::MutatePkgs(p) => write!(f, "mutate pkgs {}", p),
            LockKey::DownloadPkg(url) => write!(f, "download {}", url),
        }
    }
}

/// Table of lazily created async locks.
#[derive(Default)]
pub struct NamedLocks {
    locks: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl NamedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &LockKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for and take the named lock.
    pub async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let lock = self.get(&key);
        debug!("Acquiring lock: {}", key);
        lock.lock_owned().await
    }

    /// Take the named lock if it is free.
    pub fn try_acquire(&self, key: LockKey) -> Option<OwnedMutexGuard<()>> {
        self.get(&key).try_lock_owned().ok()
    }
}
