//! Package methods on AddonkitApi.
//!
//! Each method runs on the profile's work queue and returns one result per
//! input definition.

use crate::error::Result;
use crate::models::{Defn, Pkg};
use crate::resolvers::SourceMetadata;
use crate::results::{DefnResults, PkgSuccess};
use crate::AddonkitApi;

impl AddonkitApi {
    // ========================================
    // Sources
    // ========================================

    /// Sources registered for a profile, in priority order.
    pub async fn list_sources(&self, profile: &str) -> Result<Vec<SourceMetadata>> {
        self.queue
            .submit(profile, |manager| async move {
                Ok(manager.resolvers().metadata())
            })
            .await
    }

    pub async fn get_changelog(&self, profile: &str, source: &str, uri: &str) -> Result<String> {
        let source = source.to_string();
        let uri = uri.to_string();
        self.queue
            .submit(profile, move |manager| async move {
                manager.get_changelog(&source, &uri).await
            })
            .await
    }

    // ========================================
    // Packages
    // ========================================

    pub async fn list_installed(&self, profile: &str) -> Result<Vec<Pkg>> {
        self.queue
            .submit(profile, |manager| async move { manager.list_installed() })
            .await
    }

    pub async fn resolve(
        &self,
        profile: &str,
        defns: Vec<Defn>,
        with_deps: bool,
    ) -> Result<DefnResults<Pkg>> {
        self.queue
            .submit(profile, move |manager| async move {
                Ok(manager.resolve(&defns, with_deps).await)
            })
            .await
    }

    pub async fn install(
        &self,
        profile: &str,
        defns: Vec<Defn>,
        replace: bool,
    ) -> Result<DefnResults<PkgSuccess>> {
        self.queue
            .submit(profile, move |manager| async move {
                Ok(manager.install(&defns, replace, false).await)
            })
            .await
    }

    /// Update the given packages, or every installed package when `defns`
    /// is empty.
    pub async fn update(
        &self,
        profile: &str,
        defns: Vec<Defn>,
        retain_strategy: bool,
    ) -> Result<DefnResults<PkgSuccess>> {
        self.queue
            .submit(profile, move |manager| async move {
                manager.update(&defns, retain_strategy, false).await
            })
            .await
    }

    pub async fn remove(
        &self,
        profile: &str,
        defns: Vec<Defn>,
        keep_folders: bool,
    ) -> Result<DefnResults<PkgSuccess>> {
        self.queue
            .submit(profile, move |manager| async move {
                Ok(manager.remove(&defns, keep_folders).await)
            })
            .await
    }

    /// Pin packages to the version in each definition's `version_eq`, or
    /// unpin them when it is unset.
    pub async fn pin(&self, profile: &str, defns: Vec<Defn>) -> Result<DefnResults<PkgSuccess>> {
        self.queue
            .submit(profile, move |manager| async move {
                Ok(manager.pin(&defns).await)
            })
            .await
    }
}
