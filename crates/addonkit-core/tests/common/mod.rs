//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use addonkit_core::models::{PkgOptions, CatalogueEntry};
use addonkit_core::resolvers::ChangelogFormat;
use addonkit_core::{
    AddonkitApi, Catalogue, Defn, DeviceAuthProvider, DeviceCodes, DynResolver, Pkg, PkgError,
    PkgResult, Resolver, Resolvers, SourceMetadata, StaticCatalogue,
};
use addonkit_core::{AddonkitError, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;
use url::Url;
use zip::write::SimpleFileOptions;

/// Write an add-on zip with one `<folder>/<folder>.toc` per folder.
pub fn write_addon_zip(path: &Path, folders: &[&str]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for folder in folders {
        writer
            .start_file(format!("{0}/{0}.toc", folder), SimpleFileOptions::default())
            .unwrap();
        writeln!(writer, "## Title: {}", folder).unwrap();
        writer
            .start_file(format!("{}/main.lua", folder), SimpleFileOptions::default())
            .unwrap();
        writeln!(writer, "-- {}", folder).unwrap();
    }
    writer.finish().unwrap();
}

/// Resolver serving archives published to a local directory.
pub struct LocalResolver {
    metadata: SourceMetadata,
    releases_dir: PathBuf,
    releases: Mutex<HashMap<String, (String, PathBuf)>>,
}

impl LocalResolver {
    pub fn new(releases_dir: impl Into<PathBuf>) -> Self {
        let releases_dir = releases_dir.into();
        std::fs::create_dir_all(&releases_dir).unwrap();
        Self {
            metadata: SourceMetadata {
                id: "local",
                name: "Local",
                strategies: &[],
                changelog_format: ChangelogFormat::Raw,
                addon_toc_key: None,
                access_token: None,
            },
            releases_dir,
            releases: Mutex::new(HashMap::new()),
        }
    }

    /// Make `version` the latest release of `id`.
    pub fn publish(&self, id: &str, version: &str, folders: &[&str]) {
        let archive = self.releases_dir.join(format!("{}-{}.zip", id, version));
        write_addon_zip(&archive, folders);
        self.releases
            .lock()
            .unwrap()
            .insert(id.to_lowercase(), (version.to_string(), archive));
    }
}

#[async_trait]
impl Resolver for LocalResolver {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    async fn resolve_one(&self, defn: &Defn, _hint: Option<&CatalogueEntry>) -> PkgResult<Pkg> {
        let key = defn.id.as_deref().unwrap_or(&defn.alias).to_lowercase();
        let (version, archive) = self
            .releases
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(PkgError::Nonexistent)?;
        if defn
            .strategies
            .version_eq
            .as_ref()
            .is_some_and(|wanted| *wanted != version)
        {
            return Err(PkgError::FilesNotMatching(defn.strategies.clone()));
        }
        Ok(Pkg {
            source: "local".into(),
            id: key.clone(),
            slug: key.clone(),
            name: key,
            description: String::new(),
            url: String::new(),
            download_url: Url::from_file_path(&archive).unwrap().to_string(),
            date_published: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            version,
            changelog_url: "data:,Released".into(),
            options: PkgOptions::from_strategy_values(&defn.strategies),
            folders: Vec::new(),
            deps: Vec::new(),
        })
    }
}

/// Device-auth provider approved or denied by the test.
#[derive(Default)]
pub struct FakeAuthProvider {
    pub code_requests: AtomicUsize,
    decision: Mutex<Option<Result<String>>>,
    decided: Notify,
}

impl FakeAuthProvider {
    pub fn approve(&self, token: &str) {
        *self.decision.lock().unwrap() = Some(Ok(token.to_string()));
        self.decided.notify_waiters();
    }

    pub fn code_requests(&self) -> usize {
        self.code_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceAuthProvider for FakeAuthProvider {
    async fn get_codes(&self) -> Result<DeviceCodes> {
        let n = self.code_requests.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        Ok(DeviceCodes {
            device_code: format!("device-{}", n),
            user_code: format!("CODE-{}", n),
            verification_uri: "https://github.com/login/device".into(),
            expires_in: 900,
            interval: 5,
        })
    }

    async fn poll(&self, _codes: &DeviceCodes) -> Result<String> {
        loop {
            let notified = self.decided.notified();
            if let Some(decision) = self.decision.lock().unwrap().take() {
                return decision;
            }
            notified.await;
        }
    }
}

/// An API rooted in `temp` with the local resolver and an empty catalogue.
pub async fn build_api(
    temp: &TempDir,
    resolver: Arc<LocalResolver>,
    auth: Arc<FakeAuthProvider>,
) -> AddonkitApi {
    let resolver: DynResolver = resolver;
    AddonkitApi::builder()
        .config_dir(temp.path().join("config"))
        .temp_dir(temp.path().join("temp"))
        .auto_create_dirs(true)
        .catalogue_source(Arc::new(StaticCatalogue::new(Catalogue::default())))
        .resolvers(move |_| Resolvers::new([resolver.clone()]))
        .auth_provider(auth)
        .build()
        .await
        .unwrap()
}

/// Create the add-on directory for `profile` and register it.
pub async fn add_profile(api: &AddonkitApi, temp: &TempDir, profile: &str) -> PathBuf {
    let addon_dir = temp.path().join(profile).join("AddOns");
    std::fs::create_dir_all(&addon_dir).unwrap();
    api.write_profile_config(profile, &addon_dir, None)
        .await
        .unwrap();
    addon_dir
}

pub fn is_queue_closed(result: &Result<impl std::fmt::Debug>) -> bool {
    matches!(result, Err(AddonkitError::QueueClosed))
}
