//! WoWInterface as an add-on source.

use super::{
    data_changelog_url, fetch_changelog, slugify, ChangelogFormat, Resolver, SourceMetadata,
};
use crate::config::{Flavour, NetworkConfig};
use crate::models::{CatalogueEntry, Defn, Pkg, PkgOptions};
use crate::network::HttpClient;
use crate::results::{PkgError, PkgResult};
use crate::{AddonkitError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use url::Url;

static METADATA: SourceMetadata = SourceMetadata {
    id: "wowi",
    name: "WoWInterface",
    strategies: &[],
    changelog_format: ChangelogFormat::Raw,
    addon_toc_key: Some("X-WoWI-ID"),
    access_token: None,
};

/// Item of the file details API.
#[derive(Debug, Deserialize)]
struct WowiDetailsItem {
    #[serde(rename = "UID")]
    uid: String,
    #[serde(rename = "UIName")]
    name: String,
    #[serde(rename = "UIVersion")]
    version: String,
    /// Milliseconds since the epoch.
    #[serde(rename = "UIDate")]
    date: i64,
    #[serde(rename = "UIDownload")]
    download_url: String,
    #[serde(rename = "UIDescription", default)]
    description: String,
    #[serde(rename = "UIChangeLog", default)]
    changelog: String,
}

/// Item of the file list API.
#[derive(Debug, Deserialize)]
struct WowiListItem {
    #[serde(rename = "UID")]
    uid: String,
    #[serde(rename = "UICATID")]
    category_id: String,
    #[serde(rename = "UIName")]
    name: String,
    #[serde(rename = "UIDate")]
    date: i64,
    #[serde(rename = "UIFileInfoURL")]
    url: String,
    #[serde(rename = "UIDownloadTotal")]
    download_total: String,
    #[serde(rename = "UIDir", default)]
    folders: Vec<String>,
}

fn timestamp_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn page_url(id: &str) -> String {
    format!("https://www.wowinterface.com/downloads/info{}", id)
}

static FILE_NAME_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:download|info)(\d+)").unwrap());

/// Catalogue entry for a list item. Classic categories map to their flavour;
/// TBC Classic add-ons are skipped.
fn entry_from_item(item: WowiListItem) -> Option<CatalogueEntry> {
    let flavour = match item.category_id.as_str() {
        "160" => Flavour::VanillaClassic,
        "161" => return None,
        "162" => Flavour::Classic,
        _ => Flavour::Retail,
    };
    Some(CatalogueEntry {
        source: METADATA.id.to_string(),
        slug: slugify(&format!("{} {}", item.uid, item.name)),
        id: item.uid,
        name: item.name,
        url: item.url,
        game_flavours: [flavour].into(),
        download_count: item.download_total.parse().unwrap_or(0),
        last_updated: timestamp_to_datetime(item.date),
        folders: vec![item.folders.into_iter().collect::<BTreeSet<_>>()],
        folder_hashes: Vec::new(),
        same_as: Vec::new(),
    })
}

/// Resolver for numeric WoWInterface file ids.
pub struct WowiResolver {
    http: Arc<HttpClient>,
    details_api_base: String,
    list_api_url: String,
}

impl WowiResolver {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            details_api_base: NetworkConfig::WOWI_DETAILS_API_BASE.to_string(),
            list_api_url: NetworkConfig::WOWI_LIST_API_URL.to_string(),
        }
    }

    async fn get_details(&self, id: &str) -> PkgResult<WowiDetailsItem> {
        let url = format!("{}/{}.json", self.details_api_base, id);
        let response = self.http.get(&url, &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PkgError::Nonexistent);
        }
        let items: Vec<WowiDetailsItem> = HttpClient::error_for_status(response)?
            .json()
            .await
            .map_err(AddonkitError::from)?;
        items
            .into_iter()
            .find(|item| item.uid == id)
            .ok_or(PkgError::Nonexistent)
    }

    async fn list_items(&self) -> Result<Vec<WowiListItem>> {
        let response =
            HttpClient::error_for_status(self.http.get(&self.list_api_url, &[]).await?)?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Resolver for WowiResolver {
    fn metadata(&self) -> &SourceMetadata {
        &METADATA
    }

    fn alias_from_url(&self, url: &Url) -> Option<String> {
        if !matches!(url.host_str(), Some("wowinterface.com" | "www.wowinterface.com")) {
            return None;
        }
        let segments: Vec<&str> = url.path_segments()?.collect();
        let [directory, name] = segments.as_slice() else {
            return None;
        };
        if *directory != "downloads" {
            return None;
        }
        let query = |key: &str| {
            url.query_pairs()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        };
        match *name {
            "landing.php" => query("fileid"),
            "fileinfo.php" => query("id"),
            _ => FILE_NAME_ID
                .captures(name)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        }
    }

    async fn resolve_one(&self, defn: &Defn, hint: Option<&CatalogueEntry>) -> PkgResult<Pkg> {
        let id: String = defn.alias.chars().take_while(char::is_ascii_digit).collect();
        if id.is_empty() {
            return Err(PkgError::Nonexistent);
        }
        let item = self.get_details(&id).await?;

        if let Some(version) = &defn.strategies.version_eq {
            if *version != item.version {
                return Err(PkgError::FilesNotMatching(defn.strategies.clone()));
            }
        }

        Ok(Pkg {
            source: METADATA.id.to_string(),
            slug: slugify(&format!("{} {}", item.uid, item.name)),
            url: hint
                .map(|entry| entry.url.clone())
                .filter(|url| !url.is_empty())
                .unwrap_or_else(|| page_url(&item.uid)),
            id: item.uid,
            name: item.name,
            description: item.description,
            download_url: item.download_url,
            date_published: timestamp_to_datetime(item.date),
            version: item.version,
            changelog_url: data_changelog_url(&item.changelog),
            options: PkgOptions::from_strategy_values(&defn.strategies),
            folders: Vec::new(),
            deps: Vec::new(),
        })
    }

    fn catalogue(&self) -> BoxStream<'_, Result<CatalogueEntry>> {
        stream::once(self.list_items())
            .map(|listing| match listing {
                Ok(items) => stream::iter(items.into_iter().filter_map(entry_from_item).map(Ok))
                    .left_stream(),
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

    fn resolver() -> WowiResolver {
        WowiResolver::new(Arc::new(HttpClient::new().unwrap()))
    }

    #[test]
    fn test_alias_from_url() {
        let resolver = resolver();
        let alias = |s: &str| resolver.alias_from_url(&Url::parse(s).unwrap());
        assert_eq!(
            alias("https://www.wowinterface.com/downloads/info13188-Molinari.html"),
            Some("13188".to_string())
        );
        assert_eq!(
            alias("https://wowinterface.com/downloads/download13188-Molinari"),
            Some("13188".to_string())
        );
        assert_eq!(
            alias("https://www.wowinterface.com/downloads/fileinfo.php?id=13188"),
            Some("13188".to_string())
        );
        assert_eq!(
            alias("https://www.wowinterface.com/downloads/landing.php?fileid=13188"),
            Some("13188".to_string())
        );
        assert_eq!(alias("https://www.wowinterface.com/forums/13188"), None);
        assert_eq!(alias("https://www.wowinterface.com/downloads/portal.php"), None);
        assert_eq!(alias("https://github.com/downloads/info1"), None);
    }

    #[test]
    fn test_entry_from_list_item() {
        let item: WowiListItem = serde_json::from_value(serde_json::json!({
            "UID": "13188",
            "UICATID": "162",
            "UIName": "Molinari",
            "UIDate": 1_700_000_000_000_i64,
            "UIFileInfoURL": "https://www.wowinterface.com/downloads/info13188",
            "UIDownloadTotal": "1234",
            "UIDir": ["Molinari"]
        }))
        .unwrap();
        let entry = entry_from_item(item).unwrap();
        assert_eq!(entry.slug, "13188-molinari");
        assert_eq!(entry.download_count, 1234);
        assert!(entry.game_flavours.contains(&Flavour::Classic));
        assert_eq!(entry.folders, vec![BTreeSet::from(["Molinari".to_string()])]);
    }

    #[test]
    fn test_tbc_items_are_skipped() {
        let item: WowiListItem = serde_json::from_value(serde_json::json!({
            "UID": "1",
            "UICATID": "161",
            "UIName": "Old",
            "UIDate": 0,
            "UIFileInfoURL": "",
            "UIDownloadTotal": "0"
        }))
        .unwrap();
        assert!(entry_from_item(item).is_none());
    }

    #[tokio::test]
    async fn test_non_numeric_alias_is_nonexistent() {
        let result = resolver().resolve_one(&Defn::new("wowi", "molinari"), None).await;
        assert_eq!(result, Err(PkgError::Nonexistent));
    }
}
