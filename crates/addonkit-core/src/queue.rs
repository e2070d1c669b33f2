//! Per-profile work queue.
//!
//! Submitted operations are dequeued in submission order by a single
//! dispatch loop, which spawns each one as its own task. A task holds the
//! profile's `LoadProfile` lock only while it looks up or constructs the
//! profile's [`PkgManager`], then runs the operation without it. Callers
//! that need a sequence of operations to be exclusive take a named lock of
//! their own.
//!
//! Shutting the queue down stops dispatch. Items still waiting in the queue
//! fail with [`AddonkitError::QueueClosed`]; tasks already spawned run to
//! completion.

use crate::config::ProfileConfig;
use crate::context::AppContext;
use crate::db::PkgDatabase;
use crate::error::{AddonkitError, Result};
use crate::locks::{LockKey, NamedLocks};
use crate::manager::PkgManager;
use crate::resolvers::Resolvers;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builds the manager for a profile on first use.
#[async_trait]
pub trait ProfileLoader: Send + Sync {
    async fn load(&self, profile: &str) -> Result<PkgManager>;
}

/// Builds the resolver registry for a profile.
pub type ResolverFactory = Arc<dyn Fn(&ProfileConfig) -> Resolvers + Send + Sync>;

/// Loads profiles from their configuration files.
pub struct ConfigProfileLoader {
    ctx: Arc<AppContext>,
    resolvers: Option<ResolverFactory>,
}

impl ConfigProfileLoader {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            resolvers: None,
        }
    }

    /// Register resolvers from `factory` instead of the built-in ones.
    pub fn with_resolvers(mut self, factory: ResolverFactory) -> Self {
        self.resolvers = Some(factory);
        self
    }
}

#[async_trait]
impl ProfileLoader for ConfigProfileLoader {
    async fn load(&self, profile: &str) -> Result<PkgManager> {
        let config = ProfileConfig::read(self.ctx.global_config().await, profile)?;
        match &self.resolvers {
            Some(factory) => {
                let db = PkgDatabase::open(&config.db_file())?;
                let resolvers = factory(&config);
                Ok(PkgManager::new(self.ctx.clone(), config, db, resolvers))
            }
            None => PkgManager::load(self.ctx.clone(), config).await,
        }
    }
}

// ========================================
// Manager registry
// ========================================

/// Lifecycle state of a profile's manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileState {
    Unloaded,
    Loading,
    Loaded,
}

enum Slot {
    Loading,
    Loaded(Arc<PkgManager>),
}

/// Loaded profile managers.
///
/// A manager is only dropped by an explicit [`ManagerRegistry::unload`] or
/// [`ManagerRegistry::unload_all`], which close its database first.
pub struct ManagerRegistry {
    loader: Arc<dyn ProfileLoader>,
    locks: Arc<NamedLocks>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ManagerRegistry {
    pub fn new(loader: Arc<dyn ProfileLoader>, locks: Arc<NamedLocks>) -> Self {
        Self {
            loader,
            locks,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, profile: &str) -> ProfileState {
        match self.slots().get(profile) {
            None => ProfileState::Unloaded,
            Some(Slot::Loading) => ProfileState::Loading,
            Some(Slot::Loaded(_)) => ProfileState::Loaded,
        }
    }

    /// Profiles with a loaded manager, sorted.
    pub fn loaded_profiles(&self) -> Vec<String> {
        let mut profiles: Vec<String> = self
            .slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Loaded(_)))
            .map(|(profile, _)| profile.clone())
            .collect();
        profiles.sort();
        profiles
    }

    /// The profile's manager, loading it if needed.
    pub async fn get_or_load(&self, profile: &str) -> Result<Arc<PkgManager>> {
        let _guard = self
            .locks
            .acquire(LockKey::LoadProfile(profile.to_string()))
            .await;

        if let Some(Slot::Loaded(manager)) = self.slots().get(profile) {
            return Ok(manager.clone());
        }

        self.slots().insert(profile.to_string(), Slot::Loading);
        match self.loader.load(profile).await {
            Ok(manager) => {
                let manager = Arc::new(manager);
                self.slots()
                    .insert(profile.to_string(), Slot::Loaded(manager.clone()));
                Ok(manager)
            }
            Err(e) => {
                self.slots().remove(profile);
                Err(e)
            }
        }
    }

    /// Drop the profile's manager, closing its database. Returns whether a
    /// manager was loaded.
    pub async fn unload(&self, profile: &str) -> Result<bool> {
        let _guard = self
            .locks
            .acquire(LockKey::LoadProfile(profile.to_string()))
            .await;
        let removed = self.slots().remove(profile);
        match removed {
            Some(Slot::Loaded(manager)) => {
                manager.close()?;
                info!("Unloaded profile {}", profile);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Unload every profile. Failures to close are logged and skipped.
    pub async fn unload_all(&self) {
        let profiles: Vec<String> = self.slots().keys().cloned().collect();
        for profile in profiles {
            if let Err(e) = self.unload(&profile).await {
                warn!("Failed to unload profile {}: {}", profile, e);
            }
        }
    }
}

// ========================================
// Work queue
// ========================================

type Job = Box<dyn FnOnce(Result<Arc<PkgManager>>) -> BoxFuture<'static, ()> + Send>;

struct WorkItem {
    profile: String,
    job: Job,
}

pub struct ManagerWorkQueue {
    registry: Arc<ManagerRegistry>,
    sender: mpsc::UnboundedSender<WorkItem>,
    stop: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl ManagerWorkQueue {
    /// Start the dispatch loop on the current runtime.
    pub fn start(registry: Arc<ManagerRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(registry.clone(), receiver, stop.clone()));
        Self {
            registry,
            sender,
            stop,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    pub fn registry(&self) -> &Arc<ManagerRegistry> {
        &self.registry
    }

    /// Run `operation` against the profile's manager and wait for its result.
    ///
    /// Errors, including a panic inside `operation`, reach this caller only.
    pub async fn submit<T, F, Fut>(&self, profile: &str, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<PkgManager>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |manager| {
            async move {
                let result = match manager {
                    Ok(manager) => operation(manager).await,
                    Err(e) => Err(e),
                };
                let _ = tx.send(result);
            }
            .boxed()
        });

        self.sender
            .send(WorkItem {
                profile: profile.to_string(),
                job,
            })
            .map_err(|_| AddonkitError::QueueClosed)?;

        rx.await.map_err(|_| AddonkitError::OperationPanicked {
            message: format!("operation on profile {} did not complete", profile),
        })?
    }

    /// Stop dispatching and unload every profile.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!("Work queue dispatcher failed: {}", e);
            }
        }
        self.registry.unload_all().await;
    }
}

async fn dispatch_loop(
    registry: Arc<ManagerRegistry>,
    mut receiver: mpsc::UnboundedReceiver<WorkItem>,
    stop: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = stop.cancelled() => break,
            item = receiver.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        debug!("Dispatching operation for profile {}", item.profile);
        let registry = registry.clone();
        tokio::spawn(async move {
            let manager = registry.get_or_load(&item.profile).await;
            (item.job)(manager).await;
        });
    }

    receiver.close();
    let mut rejected = 0;
    while let Ok(item) = receiver.try_recv() {
        (item.job)(Err(AddonkitError::QueueClosed)).await;
        rejected += 1;
    }
    info!("Work queue stopped, {} queued operations rejected", rejected);
}
