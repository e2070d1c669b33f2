//! Tukui as an add-on source.

use super::{fetch_changelog, ChangelogFormat, Resolver, SourceMetadata};
use crate::config::{Flavour, NetworkConfig};
use crate::models::{CatalogueEntry, Defn, Pkg, PkgOptions};
use crate::network::HttpClient;
use crate::results::{PkgError, PkgResult};
use crate::{AddonkitError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use url::Url;

static METADATA: SourceMetadata = SourceMetadata {
    id: "tukui",
    name: "Tukui",
    strategies: &[],
    changelog_format: ChangelogFormat::Markdown,
    addon_toc_key: Some("X-Tukui-ProjectID"),
    access_token: None,
};

#[derive(Debug, Deserialize)]
struct TukuiAddon {
    id: u64,
    #[serde(default)]
    slug: String,
    name: String,
    /// Download URL.
    url: String,
    version: String,
    #[serde(default)]
    changelog_url: String,
    /// Game versions, e.g. `10.2.0`.
    #[serde(default)]
    patch: Vec<String>,
    /// `YYYY-MM-DD`.
    last_update: String,
    #[serde(default)]
    web_url: String,
    #[serde(default)]
    small_desc: String,
    #[serde(default)]
    directories: Vec<String>,
}

/// Flavour a game version belongs to, by its major number.
fn flavour_for_patch(version: &str) -> Option<Flavour> {
    let major: u32 = version.split('.').next()?.trim().parse().ok()?;
    match major {
        1 => Some(Flavour::VanillaClassic),
        3 => Some(Flavour::Classic),
        10.. => Some(Flavour::Retail),
        _ => None,
    }
}

fn patch_flavours(patch: &[String]) -> BTreeSet<Flavour> {
    patch.iter().filter_map(|p| flavour_for_patch(p)).collect()
}

fn parse_date(value: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or_default()
}

/// The changelog URL is not versioned; the version fragment keeps cached
/// copies apart.
fn versioned_changelog_url(url: &str, version: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(Some(version));
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

fn entry_from_addon(addon: TukuiAddon) -> CatalogueEntry {
    CatalogueEntry {
        source: METADATA.id.to_string(),
        id: addon.id.to_string(),
        slug: addon.slug,
        game_flavours: patch_flavours(&addon.patch),
        name: addon.name,
        url: addon.web_url,
        download_count: 1,
        last_updated: parse_date(&addon.last_update),
        folders: vec![addon.directories.into_iter().collect()],
        folder_hashes: Vec::new(),
        same_as: Vec::new(),
    }
}

/// Resolver for Tukui's own UIs (`tukui`, `elvui`).
pub struct TukuiResolver {
    http: Arc<HttpClient>,
    flavour: Flavour,
    api_base: String,
}

impl TukuiResolver {
    pub fn new(http: Arc<HttpClient>, flavour: Flavour) -> Self {
        Self {
            http,
            flavour,
            api_base: NetworkConfig::TUKUI_API_BASE.to_string(),
        }
    }

    async fn get_addon(&self, alias: &str) -> PkgResult<TukuiAddon> {
        let url = format!("{}/addon/{}", self.api_base, urlencoding::encode(alias));
        let response = self.http.get(&url, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PkgError::Nonexistent);
        }
        Ok(HttpClient::error_for_status(response)?
            .json()
            .await
            .map_err(AddonkitError::from)?)
    }

    async fn list_addons(&self) -> Result<Vec<TukuiAddon>> {
        let url = format!("{}/addons", self.api_base);
        let response = HttpClient::error_for_status(self.http.get(&url, &[]).await?)?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Resolver for TukuiResolver {
    fn metadata(&self) -> &SourceMetadata {
        &METADATA
    }

    fn alias_from_url(&self, url: &Url) -> Option<String> {
        if url.host_str() != Some("www.tukui.org") || url.path() != "/download.php" {
            return None;
        }
        url.query_pairs()
            .find(|(k, _)| k == "ui")
            .map(|(_, v)| v.into_owned())
    }

    async fn resolve_one(&self, defn: &Defn, _hint: Option<&CatalogueEntry>) -> PkgResult<Pkg> {
        let addon = self.get_addon(&defn.alias).await?;

        if !patch_flavours(&addon.patch).contains(&self.flavour) {
            return Err(PkgError::FilesNotMatching(defn.strategies.clone()));
        }

        let slug = if addon.slug.is_empty() {
            defn.alias.to_lowercase()
        } else {
            addon.slug
        };
        Ok(Pkg {
            source: METADATA.id.to_string(),
            id: addon.id.to_string(),
            slug,
            name: addon.name,
            description: addon.small_desc,
            url: addon.web_url,
            download_url: addon.url,
            date_published: parse_date(&addon.last_update),
            changelog_url: versioned_changelog_url(&addon.changelog_url, &addon.version),
            version: addon.version,
            options: PkgOptions::from_strategy_values(&defn.strategies),
            folders: Vec::new(),
            deps: Vec::new(),
        })
    }

    fn catalogue(&self) -> BoxStream<'_, Result<CatalogueEntry>> {
        stream::once(self.list_addons())
            .map(|listing| match listing {
                Ok(addons) => {
                    stream::iter(addons.into_iter().map(entry_from_addon).map(Ok)).left_stream()
                }
                Err(e) => stream::iter(vec![Err(e)]).right_stream(),
            })
            .flatten()
            .boxed()
    }

    async fn get_changelog(&self, uri: &str) -> Result<String> {
        fetch_changelog(&self.http, uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TukuiResolver {
        TukuiResolver::new(Arc::new(HttpClient::new().unwrap()), Flavour::Retail)
    }

    #[test]
    fn test_alias_from_url() {
        let resolver = resolver();
        let alias = |s: &str| resolver.alias_from_url(&Url::parse(s).unwrap());
        assert_eq!(
            alias("https://www.tukui.org/download.php?ui=elvui"),
            Some("elvui".to_string())
        );
        assert_eq!(alias("https://www.tukui.org/download.php"), None);
        assert_eq!(alias("https://www.tukui.org/addons.php?id=1"), None);
        assert_eq!(alias("https://tukui.org/download.php?ui=elvui"), None);
    }

    #[test]
    fn test_flavour_for_patch() {
        assert_eq!(flavour_for_patch("10.2.0"), Some(Flavour::Retail));
        assert_eq!(flavour_for_patch("11.0.2"), Some(Flavour::Retail));
        assert_eq!(flavour_for_patch("3.4.3"), Some(Flavour::Classic));
        assert_eq!(flavour_for_patch("1.15.0"), Some(Flavour::VanillaClassic));
        assert_eq!(flavour_for_patch("4.4.0"), None);
        assert_eq!(flavour_for_patch("beta"), None);
    }

    #[test]
    fn test_entry_from_addon() {
        let addon: TukuiAddon = serde_json::from_value(serde_json::json!({
            "id": 2,
            "slug": "elvui",
            "name": "ElvUI",
            "url": "https://api.tukui.org/v1/download/dev/elvui/main",
            "version": "13.52",
            "changelog_url": "https://api.tukui.org/v1/changelog/elvui",
            "patch": ["10.2.0", "1.15.0"],
            "last_update": "2023-11-20",
            "web_url": "https://tukui.org/elvui",
            "small_desc": "A user interface replacement.",
            "directories": ["ElvUI", "ElvUI_Options", "ElvUI_Libraries"]
        }))
        .unwrap();
        let entry = entry_from_addon(addon);
        assert_eq!(entry.id, "2");
        assert_eq!(entry.slug, "elvui");
        assert_eq!(
            entry.game_flavours,
            [Flavour::Retail, Flavour::VanillaClassic].into()
        );
        assert_eq!(entry.last_updated.format("%Y-%m-%d").to_string(), "2023-11-20");
        assert_eq!(entry.folders[0].len(), 3);
    }

    #[test]
    fn test_changelog_url_carries_version() {
        assert_eq!(
            versioned_changelog_url("https://api.tukui.org/v1/changelog/elvui", "13.52"),
            "https://api.tukui.org/v1/changelog/elvui#13.52"
        );
        assert_eq!(versioned_changelog_url("", "1.0"), "");
    }
}
