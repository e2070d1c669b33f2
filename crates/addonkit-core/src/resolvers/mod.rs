//! Source backends and the resolution engine.
//!
//! Each source implements [`Resolver`]. A profile's [`Resolvers`] registry
//! holds them in priority order; the engine in [`engine`] is the only code
//! that calls [`Resolver::resolve_one`].

mod cfcore;
mod engine;
mod github;
mod tukui;
mod wowi;

pub use cfcore::CfCoreResolver;
pub use github::GithubResolver;
pub use tukui::TukuiResolver;
pub use wowi::WowiResolver;

use crate::config::{Flavour, GlobalConfig};
use crate::matchers::AddonFolder;
use crate::models::{Catalogue, CatalogueEntry, Defn, Pkg, Strategy};
use crate::network::{file_url_path, HttpClient};
use crate::results::PkgResult;
use crate::{AddonkitError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// How a source formats its changelogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangelogFormat {
    Html,
    Markdown,
    Bbcode,
    Raw,
}

/// Static description of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMetadata {
    pub id: &'static str,
    pub name: &'static str,
    /// Strategies accepted besides the universal version pin.
    pub strategies: &'static [Strategy],
    pub changelog_format: ChangelogFormat,
    /// TOC key under which add-ons embed their id for this source.
    pub addon_toc_key: Option<&'static str>,
    /// Name of the access token the source cannot work without.
    pub access_token: Option<&'static str>,
}

impl SourceMetadata {
    /// Strategies in `requested` this source does not accept.
    pub fn unsupported_strategies(&self, requested: &BTreeSet<Strategy>) -> BTreeSet<Strategy> {
        requested
            .iter()
            .copied()
            .filter(|s| *s != Strategy::VersionEq && !self.strategies.contains(s))
            .collect()
    }
}

/// A source backend.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn metadata(&self) -> &SourceMetadata;

    /// Extract a definition alias from an add-on page URL. No I/O.
    fn alias_from_url(&self, _url: &Url) -> Option<String> {
        None
    }

    /// Resolve one definition. `hint` is the catalogue entry for the
    /// definition, when the catalogue has one.
    async fn resolve_one(&self, defn: &Defn, hint: Option<&CatalogueEntry>) -> PkgResult<Pkg>;

    /// Every add-on the source lists, for building a catalogue.
    fn catalogue(&self) -> BoxStream<'_, Result<CatalogueEntry>> {
        stream::empty().boxed()
    }

    /// Leftover folders whose content hash matches a catalogued add-on of
    /// this source, with the definition they match.
    async fn folder_hash_matches(
        &self,
        leftovers: &[AddonFolder],
        catalogue: &Catalogue,
    ) -> Vec<(Defn, BTreeSet<String>)> {
        let source = self.metadata().id;
        let mut hashes: Vec<(&str, &AddonFolder)> = Vec::with_capacity(leftovers.len());
        for folder in leftovers {
            match folder.content_hash() {
                Ok(hash) => hashes.push((hash, folder)),
                Err(e) => warn!("Failed to hash {}: {}", folder.path.display(), e),
            }
        }

        catalogue
            .entries()
            .iter()
            .filter(|entry| entry.source == source && !entry.folder_hashes.is_empty())
            .filter_map(|entry| {
                let matched: BTreeSet<String> = hashes
                    .iter()
                    .filter(|(hash, _)| entry.folder_hashes.iter().any(|h| h == hash))
                    .map(|(_, folder)| folder.name.clone())
                    .collect();
                (!matched.is_empty()).then(|| (Defn::new(source, &entry.id), matched))
            })
            .collect()
    }

    /// Retrieve a changelog by URI. Only `data:` and `file:` URIs unless
    /// overridden.
    async fn get_changelog(&self, uri: &str) -> Result<String> {
        read_local_changelog(uri)?.ok_or_else(|| AddonkitError::InvalidParams {
            message: format!("unsupported changelog URI: {}", uri),
        })
    }
}

/// Shared handle to a resolver.
pub type DynResolver = Arc<dyn Resolver>;

// ========================================
// Registry
// ========================================

/// Resolvers of one profile, in priority order.
#[derive(Clone, Default)]
pub struct Resolvers {
    ordered: Vec<DynResolver>,
    by_source: HashMap<&'static str, usize>,
}

impl Resolvers {
    /// Build a registry. Earlier resolvers take priority; a later resolver
    /// with an already registered id is ignored.
    pub fn new(resolvers: impl IntoIterator<Item = DynResolver>) -> Self {
        let mut registry = Self::default();
        for resolver in resolvers {
            let id = resolver.metadata().id;
            if registry.by_source.contains_key(id) {
                warn!("Ignoring duplicate resolver for source {}", id);
                continue;
            }
            registry.by_source.insert(id, registry.ordered.len());
            registry.ordered.push(resolver);
        }
        registry
    }

    /// The built-in sources usable with `global_config`.
    ///
    /// Sources whose required access token is missing are left out.
    pub fn builtin(http: Arc<HttpClient>, global_config: &GlobalConfig, flavour: Flavour) -> Self {
        let candidates: Vec<DynResolver> = vec![
            Arc::new(GithubResolver::new(
                http.clone(),
                global_config.access_tokens.github.clone(),
                flavour,
            )),
            Arc::new(CfCoreResolver::new(
                http.clone(),
                global_config.access_tokens.cfcore.clone(),
                flavour,
            )),
            Arc::new(WowiResolver::new(http.clone())),
            Arc::new(TukuiResolver::new(http, flavour)),
        ];
        Self::new(candidates.into_iter().filter(|r| {
            let available = r
                .metadata()
                .access_token
                .map_or(true, |token| global_config.access_tokens.get(token).is_some());
            if !available {
                debug!("Skipping source {}: no access token", r.metadata().id);
            }
            available
        }))
    }

    pub fn get(&self, source: &str) -> Option<&DynResolver> {
        self.by_source.get(source).map(|&i| &self.ordered[i])
    }

    pub fn contains(&self, source: &str) -> bool {
        self.by_source.contains_key(source)
    }

    /// Position of a source in the priority order. Unknown sources sort last.
    pub fn priority(&self, source: &str) -> usize {
        self.by_source.get(source).copied().unwrap_or(usize::MAX)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DynResolver> {
        self.ordered.iter()
    }

    pub fn metadata(&self) -> Vec<SourceMetadata> {
        self.ordered.iter().map(|r| r.metadata().clone()).collect()
    }

    /// `(toc key, source)` pairs for sources that declare a TOC key.
    pub fn addon_toc_keys(&self) -> Vec<(&'static str, &'static str)> {
        self.ordered
            .iter()
            .filter_map(|r| {
                let metadata = r.metadata();
                metadata.addon_toc_key.map(|key| (key, metadata.id))
            })
            .collect()
    }

    /// First source, by priority, that recognises `value` as an add-on URL,
    /// with the alias it extracted.
    pub fn pair_uri(&self, value: &str) -> Option<(&'static str, String)> {
        let url = Url::parse(value).ok()?;
        self.ordered.iter().find_map(|resolver| {
            resolver
                .alias_from_url(&url)
                .map(|alias| (resolver.metadata().id, alias))
        })
    }
}

// ========================================
// Shared helpers
// ========================================

/// Case-fold, replace punctuation with spaces and join the words with `delim`.
pub fn normalise_name(value: &str, delim: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_punctuation() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(delim)
}

pub fn slugify(value: &str) -> String {
    normalise_name(value, "-")
}

/// Encode plain text as a `data:` URL.
pub fn data_changelog_url(text: &str) -> String {
    format!("data:,{}", urlencoding::encode(text))
}

/// Read a `data:` or `file:` changelog. `Ok(None)` for any other scheme.
pub fn read_local_changelog(uri: &str) -> Result<Option<String>> {
    if let Some(rest) = uri.strip_prefix("data:") {
        let (_, payload) = rest.split_once(',').ok_or_else(|| AddonkitError::InvalidParams {
            message: format!("malformed data URI: {}", uri),
        })?;
        let text = urlencoding::decode(payload).map_err(|e| AddonkitError::InvalidParams {
            message: format!("malformed data URI: {}", e),
        })?;
        return Ok(Some(text.into_owned()));
    }
    if let Some(path) = file_url_path(uri) {
        let text =
            std::fs::read_to_string(&path).map_err(|e| AddonkitError::io_with_path(e, &path))?;
        return Ok(Some(text));
    }
    Ok(None)
}

/// Retrieve a changelog from a `data:`, `file:` or HTTP(S) URI.
pub async fn fetch_changelog(http: &HttpClient, uri: &str) -> Result<String> {
    if let Some(text) = read_local_changelog(uri)? {
        return Ok(text);
    }
    match Url::parse(uri).map(|u| u.scheme().to_string()) {
        Ok(scheme) if scheme == "http" || scheme == "https" => {
            let response = HttpClient::error_for_status(http.get(uri, &[]).await?)?;
            Ok(response.text().await?)
        }
        _ => Err(AddonkitError::InvalidParams {
            message: format!("unsupported changelog URI: {}", uri),
        }),
    }
}
