//! CurseForge, through the CFCore API, as an add-on source.
//!
//! Every API request carries the `cfcore` access token; the registry leaves
//! this source out when the token is not configured.

use super::{ChangelogFormat, Resolver, SourceMetadata};
use crate::config::{Flavour, NetworkConfig};
use crate::models::{CatalogueEntry, Defn, Pkg, PkgDep, PkgOptions, Strategy};
use crate::network::HttpClient;
use crate::results::{PkgError, PkgResult};
use crate::{AddonkitError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use url::Url;

static METADATA: SourceMetadata = SourceMetadata {
    id: "curse",
    name: "CFCore",
    strategies: &[
        Strategy::AnyFlavour,
        Strategy::AnyReleaseType,
        Strategy::VersionEq,
    ],
    changelog_format: ChangelogFormat::Html,
    addon_toc_key: Some("X-Curse-Project-ID"),
    access_token: Some("cfcore"),
};

const RELEASE_TYPE_RELEASE: u8 = 1;
const RELATION_REQUIRED_DEPENDENCY: u8 = 3;
const WOW_GAME_ID: u32 = 1;
const SORT_BY_LAST_UPDATED: u32 = 3;

/// `gameVersionTypeId` of a flavour's game versions.
fn game_version_type_id(flavour: Flavour) -> u32 {
    match flavour {
        Flavour::Retail => 517,
        Flavour::VanillaClassic => 67408,
        Flavour::Classic => 73713,
    }
}

#[derive(Debug, Deserialize)]
struct DataResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfCoreLinks {
    #[serde(default)]
    website_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfCoreSortableGameVersion {
    game_version_type_id: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfCoreDependency {
    mod_id: u64,
    relation_type: u8,
}

#[derive(Debug, Deserialize)]
struct CfCoreModule {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfCoreFile {
    id: u64,
    display_name: String,
    release_type: u8,
    file_date: DateTime<Utc>,
    download_url: Option<String>,
    #[serde(default)]
    expose_as_alternative: Option<bool>,
    #[serde(default)]
    sortable_game_versions: Vec<CfCoreSortableGameVersion>,
    #[serde(default)]
    dependencies: Vec<CfCoreDependency>,
    #[serde(default)]
    modules: Vec<CfCoreModule>,
}

impl CfCoreFile {
    fn is_alternative(&self) -> bool {
        self.expose_as_alternative.unwrap_or(false)
    }

    fn targets(&self, flavour: Flavour) -> bool {
        let type_id = game_version_type_id(flavour);
        self.sortable_game_versions
            .iter()
            .any(|v| v.game_version_type_id == type_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CfCoreMod {
    id: u64,
    name: String,
    slug: String,
    #[serde(default)]
    summary: String,
    links: CfCoreLinks,
    #[serde(default)]
    download_count: f64,
    date_modified: DateTime<Utc>,
    #[serde(default)]
    allow_mod_distribution: Option<bool>,
    #[serde(default)]
    latest_files: Vec<CfCoreFile>,
}

/// Pick the newest file that passes the definition's strategies.
/// File ids increase monotonically so the largest id is the newest.
fn select_file<'a>(files: &'a [CfCoreFile], defn: &Defn, flavour: Flavour) -> Option<&'a CfCoreFile> {
    let strategies = &defn.strategies;
    files
        .iter()
        .filter(|f| !f.is_alternative())
        .filter(|f| strategies.any_flavour || f.targets(flavour))
        .filter(|f| strategies.any_release_type || f.release_type == RELEASE_TYPE_RELEASE)
        .filter(|f| {
            strategies
                .version_eq
                .as_ref()
                .map_or(true, |v| *v == f.display_name)
        })
        .max_by_key(|f| f.id)
}

fn entry_from_mod(item: CfCoreMod) -> CatalogueEntry {
    let game_flavours = Flavour::ALL
        .into_iter()
        .filter(|flavour| {
            item.latest_files
                .iter()
                .any(|f| !f.is_alternative() && f.targets(*flavour))
        })
        .collect();
    let mut folders: Vec<BTreeSet<String>> = Vec::new();
    for file in &item.latest_files {
        let set: BTreeSet<String> = file.modules.iter().map(|m| m.name.clone()).collect();
        if !folders.contains(&set) {
            folders.push(set);
        }
    }
    CatalogueEntry {
        source: METADATA.id.to_string(),
        id: item.id.to_string(),
        slug: item.slug,
        name: item.name,
        url: item.links.website_url,
        game_flavours,
        download_count: item.download_count as u64,
        last_updated: item.date_modified,
        folders,
        folder_hashes: Vec::new(),
        same_as: Vec::new(),
    }
}

/// Resolver for CurseForge project ids and slugs.
pub struct CfCoreResolver {
    http: Arc<HttpClient>,
    access_token: Option<String>,
    flavour: Flavour,
    api_base: String,
}

impl CfCoreResolver {
    pub fn new(http: Arc<HttpClient>, access_token: Option<String>, flavour: Flavour) -> Self {
        Self {
            http,
            access_token,
            flavour,
            api_base: NetworkConfig::CFCORE_MODS_API_BASE.to_string(),
        }
    }

    fn headers(&self) -> Result<Vec<(&'static str, String)>> {
        let token = self.access_token.as_ref().ok_or_else(|| {
            AddonkitError::Other(format!("{} access token is not configured", METADATA.name))
        })?;
        Ok(vec![
            ("Accept", "application/json".to_string()),
            ("x-api-key", token.clone()),
        ])
    }

    /// GET a `{"data": ...}` document. `Ok(None)` on 404.
    async fn get_data<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.http.get(url, &self.headers()?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: DataResponse<T> = HttpClient::error_for_status(response)?.json().await?;
        Ok(Some(body.data))
    }

    /// The numeric project id for a definition. Slugs are looked up in the
    /// catalogue entry the engine found for them.
    fn project_id(defn: &Defn, hint: Option<&CatalogueEntry>) -> Option<String> {
        defn.id
            .clone()
            .or_else(|| hint.map(|entry| entry.id.clone()))
            .or_else(|| Some(defn.alias.clone()))
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
    }

    async fn search_page(&self, offset: u32) -> Result<Vec<CfCoreMod>> {
        let url = format!(
            "{}/search?gameId={}&sortField={}&sortOrder=desc&pageSize={}&index={}",
            self.api_base,
            WOW_GAME_ID,
            SORT_BY_LAST_UPDATED,
            NetworkConfig::CFCORE_CATALOGUE_PAGE_SIZE,
            offset
        );
        debug!("Retrieving {}", url);
        Ok(self.get_data(&url).await?.unwrap_or_default())
    }
}

#[async_trait]
impl Resolver for CfCoreResolver {
    fn metadata(&self) -> &SourceMetadata {
        &METADATA
    }

    fn alias_from_url(&self, url: &Url) -> Option<String> {
        if url.host_str() != Some("www.curseforge.com") {
            return None;
        }
        let segments: Vec<&str> = url.path_segments()?.collect();
        match segments.as_slice() {
            ["wow", "addons", slug, ..] if !slug.is_empty() => Some(slug.to_lowercase()),
            _ => None,
        }
    }

    async fn resolve_one(&self, defn: &Defn, hint: Option<&CatalogueEntry>) -> PkgResult<Pkg> {
        let id = Self::project_id(defn, hint).ok_or(PkgError::Nonexistent)?;
        let item: CfCoreMod = self
            .get_data(&format!("{}/{}", self.api_base, id))
            .await?
            .ok_or(PkgError::Nonexistent)?;

        let files = if defn.strategies.version_eq.is_some() {
            let url = format!(
                "{}/{}/files?gameVersionTypeId={}&pageSize=999",
                self.api_base,
                item.id,
                game_version_type_id(self.flavour)
            );
            self.get_data::<Vec<CfCoreFile>>(&url).await?.unwrap_or_default()
        } else {
            item.latest_files
        };
        if files.is_empty() {
            return Err(PkgError::FilesUnavailable(None));
        }

        let file = select_file(&files, defn, self.flavour)
            .ok_or_else(|| PkgError::FilesNotMatching(defn.strategies.clone()))?;
        let download_url = match (&file.download_url, item.allow_mod_distribution) {
            (Some(url), _) => url.clone(),
            (None, Some(false)) => {
                return Err(PkgError::FilesUnavailable(Some(
                    "package distribution is forbidden".to_string(),
                )))
            }
            (None, _) => return Err(PkgError::FilesUnavailable(None)),
        };

        Ok(Pkg {
            source: METADATA.id.to_string(),
            id: item.id.to_string(),
            slug: item.slug,
            name: item.name,
            description: item.summary,
            url: item.links.website_url,
            download_url,
            date_published: file.file_date,
            version: file.display_name.clone(),
            changelog_url: format!("{}/{}/files/{}/changelog", self.api_base, item.id, file.id),
            options: PkgOptions::from_strategy_values(&defn.strategies),
            folders: Vec::new(),
            deps: file
                .dependencies
                .iter()
                .filter(|d| d.relation_type == RELATION_REQUIRED_DEPENDENCY)
                .map(|d| PkgDep { id: d.mod_id.to_string() })
                .collect(),
        })
    }

    fn catalogue(&self) -> BoxStream<'_, Result<CatalogueEntry>> {
        stream::unfold(Some(0), move |offset| async move {
            let offset = offset?;
            match self.search_page(offset).await {
                Ok(items) if items.is_empty() => None,
                Ok(items) => {
                    let next = offset + NetworkConfig::CFCORE_CATALOGUE_PAGE_SIZE;
                    let next = (next < NetworkConfig::CFCORE_CATALOGUE_MAX_OFFSET).then_some(next);
                    Some((Ok(items), next))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .flat_map(|page| match page {
            Ok(items) => stream::iter(items.into_iter().map(entry_from_mod).map(Ok)).left_stream(),
            Err(e) => stream::iter(vec![Err(e)]).right_stream(),
        })
        .boxed()
    }

    /// Changelogs are HTML wrapped in a `{"data": ...}` document.
    async fn get_changelog(&self, uri: &str) -> Result<String> {
        if let Some(text) = super::read_local_changelog(uri)? {
            return Ok(text);
        }
        self.get_data(uri).await?.ok_or_else(|| AddonkitError::Network {
            message: format!("changelog not found: {}", uri),
            source: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolver(token: Option<&str>) -> CfCoreResolver {
        CfCoreResolver::new(
            Arc::new(HttpClient::new().unwrap()),
            token.map(str::to_string),
            Flavour::Retail,
        )
    }

    fn file(id: u64, name: &str, release_type: u8, type_ids: &[u32]) -> serde_json::Value {
        json!({
            "id": id,
            "displayName": name,
            "releaseType": release_type,
            "fileDate": "2024-01-02T03:04:05Z",
            "downloadUrl": format!("https://edge.forgecdn.net/files/{}/{}.zip", id, name),
            "sortableGameVersions": type_ids
                .iter()
                .map(|t| json!({ "gameVersionTypeId": t }))
                .collect::<Vec<_>>(),
            "dependencies": [
                { "modId": 100, "relationType": 3 },
                { "modId": 200, "relationType": 2 }
            ],
            "modules": [{ "name": name }]
        })
    }

    fn files(values: Vec<serde_json::Value>) -> Vec<CfCoreFile> {
        serde_json::from_value(json!(values)).unwrap()
    }

    #[test]
    fn test_alias_from_url() {
        let resolver = resolver(None);
        let alias = |s: &str| resolver.alias_from_url(&Url::parse(s).unwrap());
        assert_eq!(
            alias("https://www.curseforge.com/wow/addons/Molinari/files"),
            Some("molinari".to_string())
        );
        assert_eq!(alias("https://www.curseforge.com/wow/addons/"), None);
        assert_eq!(alias("https://www.curseforge.com/minecraft/mc-mods/foo"), None);
        assert_eq!(alias("https://curseforge.com/wow/addons/molinari"), None);
    }

    #[test]
    fn test_select_file_honours_strategies() {
        let files = files(vec![
            file(1, "v1", 1, &[517]),
            file(2, "v2-beta", 2, &[517]),
            file(3, "v3-classic", 1, &[73713]),
        ]);
        let mut defn = Defn::new("curse", "molinari");
        assert_eq!(select_file(&files, &defn, Flavour::Retail).map(|f| f.id), Some(1));

        defn.strategies.any_release_type = true;
        assert_eq!(select_file(&files, &defn, Flavour::Retail).map(|f| f.id), Some(2));

        defn.strategies.any_flavour = true;
        assert_eq!(select_file(&files, &defn, Flavour::Retail).map(|f| f.id), Some(3));

        let mut pinned = Defn::new("curse", "molinari");
        pinned.strategies.version_eq = Some("v1".to_string());
        assert_eq!(select_file(&files, &pinned, Flavour::Retail).map(|f| f.id), Some(1));
        assert!(select_file(&files, &pinned, Flavour::VanillaClassic).is_none());
    }

    #[test]
    fn test_alternative_files_are_skipped() {
        let mut alternative = file(9, "v9", 1, &[517]);
        alternative["exposeAsAlternative"] = json!(true);
        let files = files(vec![file(1, "v1", 1, &[517]), alternative]);
        let defn = Defn::new("curse", "molinari");
        assert_eq!(select_file(&files, &defn, Flavour::Retail).map(|f| f.id), Some(1));
    }

    #[test]
    fn test_entry_from_mod() {
        let item: CfCoreMod = serde_json::from_value(json!({
            "id": 20338,
            "name": "Molinari",
            "slug": "molinari",
            "summary": "One-click milling",
            "links": { "websiteUrl": "https://www.curseforge.com/wow/addons/molinari" },
            "downloadCount": 1234.0,
            "dateModified": "2024-01-02T03:04:05Z",
            "latestFiles": [
                file(1, "Molinari", 1, &[517]),
                file(2, "Molinari", 1, &[67408]),
            ]
        }))
        .unwrap();
        let entry = entry_from_mod(item);
        assert_eq!(entry.source, "curse");
        assert_eq!(entry.id, "20338");
        assert_eq!(entry.download_count, 1234);
        assert_eq!(
            entry.game_flavours,
            [Flavour::Retail, Flavour::VanillaClassic].into()
        );
        assert_eq!(entry.folders, vec![BTreeSet::from(["Molinari".to_string()])]);
    }

    #[test]
    fn test_project_id_prefers_numeric_ids() {
        let hint = |id: &str| CatalogueEntry {
            source: "curse".to_string(),
            id: id.to_string(),
            slug: "molinari".to_string(),
            name: "Molinari".to_string(),
            url: String::new(),
            game_flavours: BTreeSet::new(),
            download_count: 0,
            last_updated: Utc::now(),
            folders: Vec::new(),
            folder_hashes: Vec::new(),
            same_as: Vec::new(),
        };
        let by_slug = Defn::new("curse", "molinari");
        assert_eq!(CfCoreResolver::project_id(&by_slug, None), None);
        assert_eq!(
            CfCoreResolver::project_id(&by_slug, Some(&hint("20338"))).as_deref(),
            Some("20338")
        );
        let by_id = Defn::new("curse", "20338");
        assert_eq!(CfCoreResolver::project_id(&by_id, None).as_deref(), Some("20338"));
    }

    #[tokio::test]
    async fn test_requests_need_a_token() {
        assert!(resolver(None).headers().is_err());
        let headers = resolver(Some("secret")).headers().unwrap();
        assert!(headers.contains(&("x-api-key", "secret".to_string())));

        let result = resolver(None).resolve_one(&Defn::new("curse", "20338"), None).await;
        assert!(matches!(result, Err(PkgError::Internal(message)) if message.contains("access token")));
    }

    #[test]
    fn test_metadata_requires_cfcore_token() {
        let resolver = resolver(None);
        assert_eq!(resolver.metadata().access_token, Some("cfcore"));
        assert_eq!(resolver.metadata().addon_toc_key, Some("X-Curse-Project-ID"));
    }
}
