//! Addonkit Core - headless library for managing game add-ons.
//!
//! Add-ons are resolved from pluggable sources, installed into a profile's
//! add-on directory and tracked in a per-profile database. Folders already
//! on disk can be reconciled with the sources they came from.
//!
//! # Example
//!
//! ```rust,ignore
//! use addonkit_core::{AddonkitApi, Defn};
//!
//! #[tokio::main]
//! async fn main() -> addonkit_core::Result<()> {
//!     let api = AddonkitApi::builder().build().await?;
//!
//!     let defns = vec![Defn::new("github", "author/addon")];
//!     let results = api.install("__default__", defns, false).await?;
//!     for (defn, result) in results.iter() {
//!         println!("{}: {:?}", defn, result);
//!     }
//!
//!     api.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod auth;
pub mod catalogue;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod locks;
pub mod manager;
pub mod matchers;
pub mod models;
pub mod network;
pub mod queue;
pub mod resolvers;
pub mod results;
pub mod toc;

mod api;

// Re-export commonly used types
pub use auth::{AuthFlowStatus, DeviceAuthProvider, DeviceCodes, GithubDeviceAuth};
pub use catalogue::{CatalogueSource, DynCatalogueSource, RemoteCatalogue, StaticCatalogue};
pub use config::{Flavour, GlobalConfig, ProfileConfig};
pub use context::AppContext;
pub use error::{AddonkitError, FieldError, Result};
pub use manager::{EquivalentCandidates, PkgManager};
pub use matchers::{AddonFolder, Heuristic, MatchedGroup, Reconciliation};
pub use models::{Catalogue, CatalogueEntry, Defn, Pkg, Strategy, StrategyValues};
pub use queue::{ProfileLoader, ProfileState};
pub use resolvers::{DynResolver, Resolver, Resolvers, SourceMetadata};
pub use results::{DefnResults, PkgError, PkgResult, PkgSuccess, ResultStatus, ResultView};

pub use api::AddonkitApiBuilder;

use auth::DeviceAuthFlow;
use queue::ManagerWorkQueue;
use std::sync::Arc;

/// Main entry point for addon management.
///
/// Every profile-scoped operation is submitted to a work queue which loads
/// the profile's [`PkgManager`] on first use. Operations on different
/// profiles never wait on each other.
pub struct AddonkitApi {
    ctx: Arc<AppContext>,
    queue: ManagerWorkQueue,
    auth: DeviceAuthFlow,
}

impl AddonkitApi {
    /// Create a builder for AddonkitApi.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let api = AddonkitApi::builder()
    ///     .config_dir("./config")
    ///     .temp_dir("./temp")
    ///     .build()
    ///     .await?;
    /// ```
    pub fn builder() -> AddonkitApiBuilder {
        AddonkitApiBuilder::new()
    }

    /// Shared process state.
    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Lifecycle state of a profile's manager.
    pub fn profile_state(&self, profile: &str) -> ProfileState {
        self.queue.registry().state(profile)
    }

    /// Stop accepting work and release every profile.
    ///
    /// Cancels a running device authorization flow, stops the work queue and
    /// closes every loaded profile's database. Operations already running are
    /// left to finish.
    pub async fn shutdown(&self) {
        if self.auth.cancel() {
            self.auth.await_completion().await;
        }
        self.queue.shutdown().await;
        tracing::info!("Addonkit shut down");
    }
}
