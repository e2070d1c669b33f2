//! Catalogue sources.
//!
//! The catalogue is a read-only, periodically refreshed listing of add-ons
//! across sources. Refresh policy belongs to the source; the reconciliation
//! engine only calls [`CatalogueSource::synchronise`].

use crate::config::CatalogueConfig;
use crate::models::Catalogue;
use crate::network::{retry_async, HttpClient, RetryConfig};
use crate::{AddonkitError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mini_moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Provider of catalogue snapshots.
#[async_trait]
pub trait CatalogueSource: Send + Sync {
    /// Return a fresh-enough snapshot, fetching it if needed.
    async fn synchronise(&self) -> Result<Arc<Catalogue>>;

    /// Return the last snapshot without doing any I/O beyond local disk.
    fn cached(&self) -> Option<Arc<Catalogue>>;
}

/// Shared handle to a catalogue source.
pub type DynCatalogueSource = Arc<dyn CatalogueSource>;

/// A fixed listing.
pub struct StaticCatalogue {
    catalogue: Arc<Catalogue>,
}

impl StaticCatalogue {
    pub fn new(catalogue: Catalogue) -> Self {
        Self {
            catalogue: Arc::new(catalogue),
        }
    }
}

#[async_trait]
impl CatalogueSource for StaticCatalogue {
    async fn synchronise(&self) -> Result<Arc<Catalogue>> {
        Ok(self.catalogue.clone())
    }

    fn cached(&self) -> Option<Arc<Catalogue>> {
        Some(self.catalogue.clone())
    }
}

/// On-disk snapshot with its fetch time.
#[derive(Debug, Serialize, Deserialize)]
struct CatalogueSnapshot {
    last_fetched: String,
    ttl: u64,
    catalogue: Catalogue,
}

impl CatalogueSnapshot {
    fn is_valid(&self) -> bool {
        DateTime::parse_from_rfc3339(&self.last_fetched)
            .map(|fetched| Utc::now().signed_duration_since(fetched).num_seconds() < self.ttl as i64)
            .unwrap_or(false)
    }
}

/// Catalogue fetched over HTTP, cached in memory and on disk.
///
/// Order of operations in `synchronise`:
/// 1. In-memory cache (TTL)
/// 2. Disk snapshot if still valid
/// 3. Network fetch, written back to disk
/// 4. Stale disk snapshot if the fetch fails
pub struct RemoteCatalogue {
    http: Arc<HttpClient>,
    url: String,
    cache_dir: PathBuf,
    ttl: Duration,
    memory_cache: Cache<String, Arc<Catalogue>>,
    fetch_lock: Mutex<()>,
}

impl RemoteCatalogue {
    pub fn new(http: Arc<HttpClient>, cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_url(http, cache_dir, CatalogueConfig::DEFAULT_URL, CatalogueConfig::TTL)
    }

    pub fn with_url(
        http: Arc<HttpClient>,
        cache_dir: impl Into<PathBuf>,
        url: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            cache_dir: cache_dir.into(),
            ttl,
            memory_cache: Cache::builder().time_to_live(ttl).max_capacity(1).build(),
            fetch_lock: Mutex::new(()),
        }
    }

    fn disk_cache_path(&self) -> PathBuf {
        self.cache_dir.join(CatalogueConfig::DISK_CACHE_FILENAME)
    }

    fn read_disk(&self) -> Option<CatalogueSnapshot> {
        let path = self.disk_cache_path();
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Failed to parse catalogue cache {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_disk(&self, catalogue: &Catalogue) -> Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| AddonkitError::io_with_path(e, &self.cache_dir))?;
        let snapshot = CatalogueSnapshot {
            last_fetched: Utc::now().to_rfc3339(),
            ttl: self.ttl.as_secs(),
            catalogue: catalogue.clone(),
        };
        let path = self.disk_cache_path();
        std::fs::write(&path, serde_json::to_string(&snapshot)?)
            .map_err(|e| AddonkitError::io_with_path(e, &path))?;
        Ok(())
    }

    async fn fetch(&self) -> Result<Catalogue> {
        let (result, _) = retry_async(&RetryConfig::new(), || async {
            let response = HttpClient::error_for_status(self.http.get(&self.url, &[]).await?)?;
            let catalogue: Catalogue = response.json().await?;
            Ok::<_, AddonkitError>(catalogue)
        })
        .await;
        result
    }
}

#[async_trait]
impl CatalogueSource for RemoteCatalogue {
    async fn synchronise(&self) -> Result<Arc<Catalogue>> {
        let _guard = self.fetch_lock.lock().await;

        if let Some(catalogue) = self.memory_cache.get(&self.url) {
            return Ok(catalogue);
        }

        let snapshot = self.read_disk();
        if let Some(snapshot) = snapshot.as_ref().filter(|s| s.is_valid()) {
            debug!("Using catalogue snapshot from {}", snapshot.last_fetched);
            let catalogue = Arc::new(snapshot.catalogue.clone());
            self.memory_cache.insert(self.url.clone(), catalogue.clone());
            return Ok(catalogue);
        }

        match self.fetch().await {
            Ok(catalogue) => {
                info!(
                    "Synchronised catalogue with {} entries",
                    catalogue.entries().len()
                );
                if let Err(e) = self.write_disk(&catalogue) {
                    warn!("Failed to write catalogue cache: {}", e);
                }
                let catalogue = Arc::new(catalogue);
                self.memory_cache.insert(self.url.clone(), catalogue.clone());
                Ok(catalogue)
            }
            Err(e) => match snapshot {
                Some(stale) => {
                    warn!("Catalogue fetch failed ({}), using stale snapshot", e);
                    Ok(Arc::new(stale.catalogue))
                }
                None => Err(e),
            },
        }
    }

    fn cached(&self) -> Option<Arc<Catalogue>> {
        self.memory_cache
            .get(&self.url)
            .or_else(|| self.read_disk().map(|s| Arc::new(s.catalogue)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogueEntry;
    use tempfile::TempDir;

    fn sample_catalogue() -> Catalogue {
        Catalogue::new(
            Catalogue::CURRENT_VERSION,
            vec![CatalogueEntry {
                source: "wowi".into(),
                id: "1".into(),
                slug: "one".into(),
                name: "One".into(),
                url: String::new(),
                game_flavours: Default::default(),
                download_count: 0,
                last_updated: Utc::now(),
                folders: Vec::new(),
                folder_hashes: Vec::new(),
                same_as: Vec::new(),
            }],
        )
    }

    #[tokio::test]
    async fn test_valid_disk_snapshot_skips_network() {
        let temp = TempDir::new().unwrap();
        let remote = RemoteCatalogue::with_url(
            Arc::new(HttpClient::new().unwrap()),
            temp.path(),
            "http://127.0.0.1:9/unreachable.json",
            Duration::from_secs(3600),
        );
        remote.write_disk(&sample_catalogue()).unwrap();

        let catalogue = remote.synchronise().await.unwrap();
        assert!(catalogue.get("wowi", "1").is_some());
        assert!(remote.cached().is_some());
    }

    #[tokio::test]
    async fn test_static_catalogue() {
        let source = StaticCatalogue::new(sample_catalogue());
        assert_eq!(source.synchronise().await.unwrap().entries().len(), 1);
        assert!(source.cached().is_some());
    }

    #[test]
    fn test_expired_snapshot_is_invalid() {
        let snapshot = CatalogueSnapshot {
            last_fetched: "2000-01-01T00:00:00Z".into(),
            ttl: 60,
            catalogue: Catalogue::default(),
        };
        assert!(!snapshot.is_valid());
    }
}
