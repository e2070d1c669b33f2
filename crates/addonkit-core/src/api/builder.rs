//! Builder for configuring AddonkitApi initialization.

use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::{DeviceAuthFlow, DeviceAuthProvider, GithubDeviceAuth};
use crate::catalogue::{DynCatalogueSource, RemoteCatalogue};
use crate::config::{GlobalConfig, ProfileConfig};
use crate::context::AppContext;
use crate::error::Result;
use crate::network::HttpClient;
use crate::queue::{ConfigProfileLoader, ManagerRegistry, ManagerWorkQueue, ResolverFactory};
use crate::resolvers::Resolvers;
use crate::AddonkitApi;

/// Builder for configuring AddonkitApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use addonkit_core::AddonkitApi;
///
/// let api = AddonkitApi::builder()
///     .config_dir("./config")
///     .auto_create_dirs(true)
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct AddonkitApiBuilder {
    config_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    auto_create_dirs: bool,
    catalogue: Option<DynCatalogueSource>,
    resolvers: Option<ResolverFactory>,
    auth_provider: Option<Arc<dyn DeviceAuthProvider>>,
}

impl AddonkitApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding `config.json` and the profiles.
    ///
    /// Default: `ADDONKIT_CONFIG_DIR`, then the platform config directory.
    pub fn config_dir(mut self, config_dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(config_dir.into());
        self
    }

    /// Directory for the download cache and the trash, overriding the
    /// stored configuration.
    pub fn temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Create the configuration, cache and profile directories on build.
    ///
    /// Default: `false`
    pub fn auto_create_dirs(mut self, enable: bool) -> Self {
        self.auto_create_dirs = enable;
        self
    }

    /// Serve the catalogue from `source` instead of the remote listing.
    pub fn catalogue_source(mut self, source: DynCatalogueSource) -> Self {
        self.catalogue = Some(source);
        self
    }

    /// Build each profile's resolvers with `factory` instead of registering
    /// the built-in sources.
    pub fn resolvers(
        mut self,
        factory: impl Fn(&ProfileConfig) -> Resolvers + Send + Sync + 'static,
    ) -> Self {
        self.resolvers = Some(Arc::new(factory));
        self
    }

    /// Use `provider` for device authorization instead of GitHub.
    pub fn auth_provider(mut self, provider: Arc<dyn DeviceAuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Build the AddonkitApi instance and start its work queue.
    ///
    /// Must be called within a tokio runtime.
    pub async fn build(self) -> Result<AddonkitApi> {
        let mut global_config = GlobalConfig::read(self.config_dir)?;
        if let Some(temp_dir) = self.temp_dir {
            global_config.temp_dir = temp_dir;
        }
        if self.auto_create_dirs {
            global_config.ensure_dirs()?;
        }

        let http = Arc::new(HttpClient::new()?);
        let catalogue = match self.catalogue {
            Some(catalogue) => catalogue,
            None => Arc::new(RemoteCatalogue::new(http.clone(), global_config.cache_dir())),
        };
        let ctx = Arc::new(AppContext::new(global_config, http.clone(), catalogue));

        let mut loader = ConfigProfileLoader::new(ctx.clone());
        if let Some(factory) = self.resolvers {
            loader = loader.with_resolvers(factory);
        }
        let registry = Arc::new(ManagerRegistry::new(Arc::new(loader), ctx.locks.clone()));
        let queue = ManagerWorkQueue::start(registry.clone());

        let provider = match self.auth_provider {
            Some(provider) => provider,
            None => Arc::new(GithubDeviceAuth::new(http)),
        };
        let auth = DeviceAuthFlow::new(provider, ctx.clone(), registry);

        tracing::info!(
            "Addonkit started with config dir {}",
            ctx.global_config().await.config_dir.display()
        );
        Ok(AddonkitApi { ctx, queue, auth })
    }
}
