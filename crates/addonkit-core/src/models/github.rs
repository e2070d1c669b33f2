//! GitHub REST API payloads used by the GitHub resolver.

use serde::{Deserialize, Serialize};

/// Repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRepo {
    pub name: String,
    /// `owner/repo`.
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
}

/// Release asset information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    /// `uploaded` once the asset is downloadable.
    #[serde(default)]
    pub state: String,
    pub browser_download_url: String,
}

impl GitHubAsset {
    pub fn is_uploaded(&self) -> bool {
        self.state == "uploaded"
    }

    /// A downloadable zip that is not a library-less build.
    pub fn is_addon_zip(&self) -> bool {
        self.is_uploaded()
            && matches!(
                self.content_type.as_str(),
                "application/zip" | "application/x-zip-compressed"
            )
            && self.name.ends_with(".zip")
            && !self.name.contains("-nolib")
    }
}

/// Release information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    pub published_at: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}
