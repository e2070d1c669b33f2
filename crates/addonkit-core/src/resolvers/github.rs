//! GitHub releases as an add-on source.
//!
//! Add-ons are repositories; packages are the zip assets attached to
//! releases.

use super::{data_changelog_url, fetch_changelog, ChangelogFormat, Resolver, SourceMetadata};
use crate::config::{Flavour, NetworkConfig};
use crate::models::{
    CatalogueEntry, Defn, GitHubAsset, GitHubRelease, GitHubRepo, Pkg, PkgOptions, Strategy,
};
use crate::network::HttpClient;
use crate::results::{PkgError, PkgResult};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::debug;
use url::Url;

static METADATA: SourceMetadata = SourceMetadata {
    id: "github",
    name: "GitHub",
    strategies: &[
        Strategy::AnyFlavour,
        Strategy::AnyReleaseType,
        Strategy::VersionEq,
    ],
    changelog_format: ChangelogFormat::Markdown,
    addon_toc_key: None,
    access_token: None,
};

/// Resolver for `owner/repo` aliases.
pub struct GithubResolver {
    http: Arc<HttpClient>,
    access_token: Option<String>,
    flavour: Flavour,
    api_base: String,
}

impl GithubResolver {
    pub fn new(http: Arc<HttpClient>, access_token: Option<String>, flavour: Flavour) -> Self {
        Self {
            http,
            access_token,
            flavour,
            api_base: NetworkConfig::GITHUB_API_BASE.to_string(),
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Accept", "application/vnd.github+json".to_string())];
        if let Some(token) = &self.access_token {
            headers.push(("Authorization", format!("token {}", token)));
        }
        headers
    }

    async fn get_repo(&self, alias: &str) -> PkgResult<GitHubRepo> {
        let url = format!("{}/repos/{}", self.api_base, alias);
        let response = self.http.get(&url, &self.headers()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PkgError::Nonexistent);
        }
        let response = HttpClient::error_for_status(response)?;
        Ok(response.json().await.map_err(crate::AddonkitError::from)?)
    }

    async fn get_releases(
        &self,
        alias: &str,
        version: Option<&str>,
    ) -> PkgResult<Vec<GitHubRelease>> {
        let url = match version {
            Some(tag) => format!(
                "{}/repos/{}/releases/tags/{}",
                self.api_base,
                alias,
                urlencoding::encode(tag)
            ),
            None => format!(
                "{}/repos/{}/releases?per_page={}",
                self.api_base,
                alias,
                NetworkConfig::GITHUB_RELEASES_PER_PAGE
            ),
        };
        let response = self.http.get(&url, &self.headers()).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(PkgError::FilesUnavailable(Some("release not found".to_string())));
        }
        let response = HttpClient::error_for_status(response)?;
        let releases = if version.is_some() {
            vec![response.json::<GitHubRelease>().await.map_err(crate::AddonkitError::from)?]
        } else {
            response.json().await.map_err(crate::AddonkitError::from)?
        };
        Ok(releases)
    }
}

/// Flavour markers as they appear in asset file names, e.g. `wrath`.
fn flavour_markers(flavour: Flavour) -> Vec<String> {
    flavour
        .toc_suffixes()
        .iter()
        .map(|s| s.trim_start_matches(&['-', '_'][..]).to_lowercase())
        .collect()
}

/// Pick the asset to install from a release.
///
/// An asset matches when its name carries a marker of `flavour`. For retail,
/// an asset with no flavour marker at all also matches.
fn select_asset(
    assets: &[GitHubAsset],
    flavour: Flavour,
    any_flavour: bool,
) -> Option<&GitHubAsset> {
    let mut candidates = assets.iter().filter(|a| a.is_addon_zip());
    if any_flavour {
        return candidates.next();
    }

    let own = flavour_markers(flavour);
    let others: Vec<String> = Flavour::ALL
        .into_iter()
        .filter(|f| *f != flavour)
        .flat_map(flavour_markers)
        .collect();

    candidates.find(|asset| {
        let name = asset.name.to_lowercase();
        own.iter().any(|m| name.contains(m.as_str()))
            || (flavour == Flavour::Retail && !others.iter().any(|m| name.contains(m.as_str())))
    })
}

#[async_trait]
impl Resolver for GithubResolver {
    fn metadata(&self) -> &SourceMetadata {
        &METADATA
    }

    fn alias_from_url(&self, url: &Url) -> Option<String> {
        if url.host_str() != Some("github.com") {
            return None;
        }
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        let owner = segments.next()?;
        let repo = segments.next()?;
        Some(format!("{}/{}", owner, repo))
    }

    async fn resolve_one(&self, defn: &Defn, _hint: Option<&CatalogueEntry>) -> PkgResult<Pkg> {
        let repo = self.get_repo(&defn.alias).await?;
        let strategies = &defn.strategies;
        let releases = self
            .get_releases(&defn.alias, strategies.version_eq.as_deref())
            .await?;

        // Drafts are only visible with push access.
        let (release, asset) = releases
            .iter()
            .filter(|r| !r.draft)
            .filter(|r| strategies.any_release_type || !r.prerelease)
            .find_map(|r| {
                select_asset(&r.assets, self.flavour, strategies.any_flavour).map(|a| (r, a))
            })
            .ok_or_else(|| {
                PkgError::FilesUnavailable(Some(format!("no files matching {}", self.flavour)))
            })?;
        debug!("Selected {} from {} {}", asset.name, repo.full_name, release.tag_name);

        let date_published = DateTime::parse_from_rfc3339(&release.published_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(PkgError::internal)?;

        Ok(Pkg {
            source: METADATA.id.to_string(),
            id: repo.full_name.clone(),
            slug: repo.full_name.to_lowercase(),
            name: repo.name,
            description: repo.description.unwrap_or_default(),
            url: repo.html_url,
            download_url: asset.browser_download_url.clone(),
            date_published,
            version: release.tag_name.clone(),
            changelog_url: data_changelog_url(release.body.as_deref().unwrap_or_default()),
            options: PkgOptions::from_strategy_values(strategies),
            folders: Vec::new(),
            deps: Vec::new(),
        })
    }

    async fn get_changelog(&self, uri: &str) -> Result<String> {
        fetch_changelog(&self.http, uri).await
    }
}
