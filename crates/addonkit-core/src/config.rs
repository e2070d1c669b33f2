//! Configuration for addonkit.
//!
//! Holds the tunable constants used across the crate and the two persisted
//! configuration layers:
//! - [`GlobalConfig`]: directories and access tokens shared by every profile
//! - [`ProfileConfig`]: one add-on directory and its game flavour

use crate::error::{AddonkitError, FieldError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const USER_AGENT: &'static str = concat!("addonkit/", env!("CARGO_PKG_VERSION"));
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DOWNLOAD_RETRY_ATTEMPTS: u32 = 3;
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const GITHUB_API_BASE: &'static str = "https://api.github.com";
    pub const GITHUB_RELEASES_PER_PAGE: u32 = 10;
    pub const WOWI_DETAILS_API_BASE: &'static str =
        "https://api.mmoui.com/v3/game/WOW/filedetails";
    pub const WOWI_LIST_API_URL: &'static str = "https://api.mmoui.com/v3/game/WOW/filelist.json";
    pub const TUKUI_API_BASE: &'static str = "https://tukui-api.acidweb.dev/v1";
    pub const CFCORE_MODS_API_BASE: &'static str = "https://api.curseforge.com/v1/mods";
    pub const CFCORE_CATALOGUE_PAGE_SIZE: u32 = 50;
    /// The search API stops returning results past this offset.
    pub const CFCORE_CATALOGUE_MAX_OFFSET: u32 = 10_000;
}

/// Catalogue synchronisation settings.
pub struct CatalogueConfig;

impl CatalogueConfig {
    pub const DEFAULT_URL: &'static str =
        "https://raw.githubusercontent.com/layday/instawow-data/data/base-catalogue-v7.compact.json";
    pub const TTL: Duration = Duration::from_secs(4 * 3600);
    pub const DISK_CACHE_FILENAME: &'static str = "catalogue.json";
}

/// SQLite settings for the per-profile package database.
pub struct DatabaseConfig;

impl DatabaseConfig {
    pub const FILENAME: &'static str = "db.sqlite";
    pub const BUSY_TIMEOUT_MS: u32 = 5000;
}

/// Device authorization settings.
pub struct AuthConfig;

impl AuthConfig {
    pub const GITHUB_CLIENT_ID: &'static str = "2186b79d4e24b8ee5c1c";
    pub const GITHUB_DEVICE_CODE_URL: &'static str = "https://github.com/login/device/code";
    pub const GITHUB_ACCESS_TOKEN_URL: &'static str =
        "https://github.com/login/oauth/access_token";
    pub const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const APP_DIR_NAME: &'static str = "addonkit";
    pub const CONFIG_FILENAME: &'static str = "config.json";
    pub const PROFILES_DIR_NAME: &'static str = "profiles";
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const TRASH_DIR_NAME: &'static str = "trash";
    pub const LOGS_DIR_NAME: &'static str = "logs";
    pub const ENV_PREFIX: &'static str = "ADDONKIT_";
    pub const DEFAULT_PROFILE: &'static str = "__default__";
}

// ========================================
// Flavour
// ========================================

/// Game variant a profile installs add-ons for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flavour {
    Retail,
    VanillaClassic,
    Classic,
}

impl Flavour {
    pub const ALL: [Flavour; 3] = [Flavour::Retail, Flavour::VanillaClassic, Flavour::Classic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flavour::Retail => "retail",
            Flavour::VanillaClassic => "vanilla_classic",
            Flavour::Classic => "classic",
        }
    }

    /// TOC file name suffixes that target this flavour, most specific first.
    pub fn toc_suffixes(&self) -> &'static [&'static str] {
        match self {
            Flavour::Retail => &["_Mainline", "-Mainline"],
            Flavour::VanillaClassic => &["_Vanilla", "-Vanilla", "_Classic", "-Classic"],
            Flavour::Classic => &["_Wrath", "-Wrath", "_WOTLKC", "-WOTLKC"],
        }
    }

    /// Guess the flavour from the tail of an add-on directory path.
    ///
    /// Only `<installation>/Interface/AddOns` paths are recognised; anything
    /// else is assumed to be retail.
    pub fn infer_from_path(addon_dir: &Path) -> Self {
        let tail: Vec<String> = addon_dir
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_lowercase()),
                _ => None,
            })
            .collect();
        if tail.len() < 3 {
            return Flavour::Retail;
        }
        let tail = &tail[tail.len() - 3..];
        if tail[1] != "interface" || tail[2] != "addons" {
            return Flavour::Retail;
        }
        match tail[0].as_str() {
            "_classic_era_" | "_classic_era_beta_" | "_classic_era_ptr_" => {
                Flavour::VanillaClassic
            }
            "_classic_" | "_classic_beta_" | "_classic_ptr_" => Flavour::Classic,
            _ => Flavour::Retail,
        }
    }
}

impl std::str::FromStr for Flavour {
    type Err = AddonkitError;

    fn from_str(s: &str) -> Result<Self> {
        Flavour::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| AddonkitError::invalid_field(&["game_flavour"], format!("unknown flavour {s:?}")))
    }
}

impl std::fmt::Display for Flavour {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========================================
// Global configuration
// ========================================

/// Access tokens for sources and the device flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessTokens {
    pub github: Option<String>,
    pub cfcore: Option<String>,
    pub wago: Option<String>,
}

impl AccessTokens {
    /// Look up a token by the name a resolver declares it under.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "github" => self.github.as_deref(),
            "cfcore" => self.cfcore.as_deref(),
            "wago" => self.wago.as_deref(),
            _ => None,
        }
    }
}

/// Configuration shared by every profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Directory holding `config.json` and the profiles; never written to the file.
    #[serde(skip)]
    pub config_dir: PathBuf,
    pub temp_dir: PathBuf,
    #[serde(default = "default_true")]
    pub auto_update_check: bool,
    #[serde(default)]
    pub access_tokens: AccessTokens,
}

fn default_true() -> bool {
    true
}

impl GlobalConfig {
    /// Create a configuration rooted at the given directories with defaults.
    pub fn new(config_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            temp_dir: temp_dir.into(),
            auto_update_check: true,
            access_tokens: AccessTokens::default(),
        }
    }

    /// Platform default directories.
    pub fn default_dirs() -> (PathBuf, PathBuf) {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(PathsConfig::APP_DIR_NAME);
        let temp_dir = std::env::temp_dir().join(PathsConfig::APP_DIR_NAME);
        (config_dir, temp_dir)
    }

    /// Read the configuration from the process environment and disk.
    ///
    /// `config_dir` wins over `ADDONKIT_CONFIG_DIR`, which wins over the
    /// platform default. Environment overrides are applied last.
    pub fn read(config_dir: Option<PathBuf>) -> Result<Self> {
        Self::read_with_env(config_dir, |key| std::env::var(key).ok())
    }

    /// [`GlobalConfig::read`] with an explicit environment lookup.
    pub fn read_with_env(
        config_dir: Option<PathBuf>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let (default_config_dir, default_temp_dir) = Self::default_dirs();
        let config_dir = config_dir
            .or_else(|| env(&env_key("CONFIG_DIR")).map(PathBuf::from))
            .unwrap_or(default_config_dir);

        let config_file = config_dir.join(PathsConfig::CONFIG_FILENAME);
        let mut config = if config_file.exists() {
            let contents = std::fs::read_to_string(&config_file)
                .map_err(|e| AddonkitError::io_with_path(e, &config_file))?;
            let mut config: GlobalConfig = serde_json::from_str(&contents)?;
            config.config_dir = config_dir;
            debug!("Loaded global config from {}", config_file.display());
            config
        } else {
            GlobalConfig::new(config_dir, default_temp_dir)
        };

        config.apply_env_overrides(env)?;
        Ok(config)
    }

    /// Apply `ADDONKIT_*` overrides on top of the current values.
    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(temp_dir) = env(&env_key("TEMP_DIR")) {
            self.temp_dir = PathBuf::from(temp_dir);
        }
        if let Some(value) = env(&env_key("AUTO_UPDATE_CHECK")) {
            self.auto_update_check = match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(AddonkitError::invalid_field(
                        &["auto_update_check"],
                        format!("expected a boolean, got {other:?}"),
                    ))
                }
            };
        }
        for (name, slot) in [
            ("GITHUB_ACCESS_TOKEN", &mut self.access_tokens.github),
            ("CFCORE_ACCESS_TOKEN", &mut self.access_tokens.cfcore),
            ("WAGO_ACCESS_TOKEN", &mut self.access_tokens.wago),
        ] {
            if let Some(token) = env(&env_key(name)) {
                *slot = Some(token);
            }
        }
        Ok(())
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(PathsConfig::CONFIG_FILENAME)
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.config_dir.join(PathsConfig::PROFILES_DIR_NAME)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.temp_dir.join(PathsConfig::CACHE_DIR_NAME)
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.temp_dir.join(PathsConfig::TRASH_DIR_NAME)
    }

    /// Create the directories this configuration points to.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.temp_dir, &self.cache_dir(), &self.profiles_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| AddonkitError::io_with_path(e, dir))?;
        }
        Ok(())
    }

    /// Persist to `<config_dir>/config.json`.
    pub fn write(&self) -> Result<()> {
        self.ensure_dirs()?;
        let path = self.config_file();
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| AddonkitError::io_with_path(e, &path))?;
        info!("Wrote global config to {}", path.display());
        Ok(())
    }

    /// Names of every profile with a configuration file, sorted.
    pub fn list_profiles(&self) -> Result<Vec<String>> {
        let profiles_dir = self.profiles_dir();
        if !profiles_dir.exists() {
            return Ok(Vec::new());
        }
        let mut profiles = Vec::new();
        for entry in std::fs::read_dir(&profiles_dir)
            .map_err(|e| AddonkitError::io_with_path(e, &profiles_dir))?
        {
            let entry = entry?;
            if entry.path().join(PathsConfig::CONFIG_FILENAME).is_file() {
                profiles.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        profiles.sort();
        Ok(profiles)
    }
}

fn env_key(name: &str) -> String {
    format!("{}{}", PathsConfig::ENV_PREFIX, name)
}

// ========================================
// Profile configuration
// ========================================

/// On-disk shape of a profile configuration.
#[derive(Debug, Serialize, Deserialize)]
struct StoredProfileConfig {
    profile: String,
    addon_dir: PathBuf,
    game_flavour: Flavour,
}

/// Configuration of a single profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileConfig {
    #[serde(skip)]
    pub global_config: GlobalConfig,
    pub profile: String,
    pub addon_dir: PathBuf,
    pub game_flavour: Flavour,
}

impl ProfileConfig {
    /// Build and validate a profile configuration.
    ///
    /// The flavour is inferred from `addon_dir` when not given.
    pub fn new(
        global_config: GlobalConfig,
        profile: impl Into<String>,
        addon_dir: impl Into<PathBuf>,
        game_flavour: Option<Flavour>,
    ) -> Result<Self> {
        let mut addon_dir: PathBuf = addon_dir.into();
        if addon_dir.is_relative() {
            addon_dir = std::env::current_dir()?.join(addon_dir);
        }
        let game_flavour = game_flavour.unwrap_or_else(|| Flavour::infer_from_path(&addon_dir));
        let config = Self {
            global_config,
            profile: profile.into(),
            addon_dir,
            game_flavour,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every field, collecting all failures.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.profile.trim().is_empty() {
            errors.push(FieldError::new(&["profile"], "must not be empty"));
        } else if self.profile.contains(['/', '\\']) || self.profile == "." || self.profile == ".." {
            errors.push(FieldError::new(&["profile"], "must be a plain directory name"));
        }

        match std::fs::metadata(&self.addon_dir) {
            Ok(meta) if !meta.is_dir() => {
                errors.push(FieldError::new(&["addon_dir"], "not a directory"));
            }
            Ok(meta) if meta.permissions().readonly() => {
                errors.push(FieldError::new(&["addon_dir"], "not writable"));
            }
            Ok(_) => {}
            Err(_) => {
                errors.push(FieldError::new(&["addon_dir"], "not a directory"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AddonkitError::ConfigValidation { errors })
        }
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.global_config.profiles_dir().join(&self.profile)
    }

    pub fn config_file(&self) -> PathBuf {
        self.profile_dir().join(PathsConfig::CONFIG_FILENAME)
    }

    pub fn db_file(&self) -> PathBuf {
        self.profile_dir().join(DatabaseConfig::FILENAME)
    }

    pub fn logging_dir(&self) -> PathBuf {
        self.profile_dir().join(PathsConfig::LOGS_DIR_NAME)
    }

    /// Persist to `<config_dir>/profiles/<profile>/config.json`.
    pub fn write(&self) -> Result<()> {
        let profile_dir = self.profile_dir();
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| AddonkitError::io_with_path(e, &profile_dir))?;
        let stored = StoredProfileConfig {
            profile: self.profile.clone(),
            addon_dir: self.addon_dir.clone(),
            game_flavour: self.game_flavour,
        };
        let path = self.config_file();
        std::fs::write(&path, serde_json::to_string_pretty(&stored)?)
            .map_err(|e| AddonkitError::io_with_path(e, &path))?;
        info!("Wrote profile config for {}", self.profile);
        Ok(())
    }

    /// Load a profile written by [`ProfileConfig::write`].
    pub fn read(global_config: GlobalConfig, profile: &str) -> Result<Self> {
        let path = global_config
            .profiles_dir()
            .join(profile)
            .join(PathsConfig::CONFIG_FILENAME);
        if !path.is_file() {
            return Err(AddonkitError::ProfileNotFound {
                profile: profile.to_string(),
            });
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| AddonkitError::io_with_path(e, &path))?;
        let stored: StoredProfileConfig = serde_json::from_str(&contents)?;
        let config = Self {
            global_config,
            profile: stored.profile,
            addon_dir: stored.addon_dir,
            game_flavour: stored.game_flavour,
        };
        config.validate()?;
        Ok(config)
    }

    /// Remove the profile directory, database included.
    pub fn delete(&self) -> Result<()> {
        let profile_dir = self.profile_dir();
        if profile_dir.exists() {
            std::fs::remove_dir_all(&profile_dir)
                .map_err(|e| AddonkitError::io_with_path(e, &profile_dir))?;
        }
        info!("Deleted profile {}", self.profile);
        Ok(())
    }
}
