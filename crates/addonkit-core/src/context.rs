//! Process-wide shared state.
//!
//! One [`AppContext`] is built at start-up and handed to the work queue, the
//! profile managers and the auth coordinator. Construction order is
//! configuration, HTTP client, named locks, catalogue source, downloader.
//! Teardown is the reverse and is driven by [`crate::AddonkitApi::shutdown`].

use crate::catalogue::{DynCatalogueSource, RemoteCatalogue};
use crate::config::GlobalConfig;
use crate::error::Result;
use crate::locks::{LockKey, NamedLocks};
use crate::models::Catalogue;
use crate::network::{Downloader, HttpClient};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct AppContext {
    global_config: RwLock<GlobalConfig>,
    pub http: Arc<HttpClient>,
    pub locks: Arc<NamedLocks>,
    pub catalogue: DynCatalogueSource,
    pub downloader: Downloader,
}

impl AppContext {
    pub fn new(
        global_config: GlobalConfig,
        http: Arc<HttpClient>,
        catalogue: DynCatalogueSource,
    ) -> Self {
        let locks = Arc::new(NamedLocks::new());
        let downloader = Downloader::new(http.clone(), locks.clone(), global_config.cache_dir());
        Self {
            global_config: RwLock::new(global_config),
            http,
            locks,
            catalogue,
            downloader,
        }
    }

    /// Context with a fresh HTTP client and the remote catalogue.
    pub fn with_defaults(global_config: GlobalConfig) -> Result<Self> {
        let http = Arc::new(HttpClient::new()?);
        let catalogue = Arc::new(RemoteCatalogue::new(http.clone(), global_config.cache_dir()));
        Ok(Self::new(global_config, http, catalogue))
    }

    /// Snapshot of the global configuration.
    pub async fn global_config(&self) -> GlobalConfig {
        self.global_config.read().await.clone()
    }

    /// Apply `update` to the global configuration and persist it.
    ///
    /// The in-memory copy only changes once the write succeeds.
    pub async fn update_global_config(
        &self,
        update: impl FnOnce(&mut GlobalConfig),
    ) -> Result<GlobalConfig> {
        let _guard = self.locks.acquire(LockKey::UpdateGlobalConfig).await;
        let mut updated = self.global_config().await;
        update(&mut updated);
        updated.write()?;
        *self.global_config.write().await = updated.clone();
        info!("Updated global config");
        Ok(updated)
    }

    /// The catalogue, synchronised if possible.
    ///
    /// Falls back to the last cached listing, then to an empty one.
    pub async fn catalogue(&self) -> Arc<Catalogue> {
        match self.catalogue.synchronise().await {
            Ok(catalogue) => catalogue,
            Err(e) => {
                warn!("Catalogue synchronisation failed: {}", e);
                self.catalogue.cached().unwrap_or_default()
            }
        }
    }
}
