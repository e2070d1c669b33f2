//! Configuration methods on AddonkitApi.

use crate::config::{Flavour, GlobalConfig, ProfileConfig};
use crate::error::Result;
use crate::locks::LockKey;
use crate::AddonkitApi;
use std::path::PathBuf;

impl AddonkitApi {
    // ========================================
    // Profile Configuration
    // ========================================

    /// Validate and persist a profile configuration.
    ///
    /// The profile's manager is unloaded so that the next operation picks up
    /// the new configuration.
    pub async fn write_profile_config(
        &self,
        profile: &str,
        addon_dir: impl Into<PathBuf>,
        game_flavour: Option<Flavour>,
    ) -> Result<ProfileConfig> {
        let _guard = self
            .ctx
            .locks
            .acquire(LockKey::ModifyProfile(profile.to_string()))
            .await;
        let config = ProfileConfig::new(
            self.ctx.global_config().await,
            profile,
            addon_dir,
            game_flavour,
        )?;
        config.write()?;
        self.queue.registry().unload(profile).await?;
        Ok(config)
    }

    pub async fn read_profile_config(&self, profile: &str) -> Result<ProfileConfig> {
        ProfileConfig::read(self.ctx.global_config().await, profile)
    }

    /// Unload a profile and remove its directory, database included.
    pub async fn delete_profile_config(&self, profile: &str) -> Result<()> {
        let _guard = self
            .ctx
            .locks
            .acquire(LockKey::ModifyProfile(profile.to_string()))
            .await;
        let config = ProfileConfig::read(self.ctx.global_config().await, profile)?;
        self.queue.registry().unload(profile).await?;
        config.delete()
    }

    pub async fn list_profiles(&self) -> Result<Vec<String>> {
        self.ctx.global_config().await.list_profiles()
    }

    // ========================================
    // Global Configuration
    // ========================================

    pub async fn read_global_config(&self) -> GlobalConfig {
        self.ctx.global_config().await
    }

    /// Apply `update` to the global configuration, persist it and unload
    /// every profile.
    pub async fn update_global_config(
        &self,
        update: impl FnOnce(&mut GlobalConfig) + Send,
    ) -> Result<GlobalConfig> {
        let updated = self.ctx.update_global_config(update).await?;
        self.queue.registry().unload_all().await;
        Ok(updated)
    }
}
