//! Resolved packages.

use super::defn::{Defn, StrategyValues};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Strategy state recorded with an installed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkgOptions {
    pub any_flavour: bool,
    pub any_release_type: bool,
    /// Whether the package is pinned to its current version.
    pub version_eq: bool,
}

impl PkgOptions {
    pub fn from_strategy_values(values: &StrategyValues) -> Self {
        Self {
            any_flavour: values.any_flavour,
            any_release_type: values.any_release_type,
            version_eq: values.version_eq.is_some(),
        }
    }
}

/// A top-level add-on folder owned by a package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PkgFolder {
    pub name: String,
}

/// A dependency declared by a package, by id within the same source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PkgDep {
    pub id: String,
}

/// A resolved, installable artifact from one source.
///
/// `(source, id)` is the durable identity; `slug` may change between
/// resolutions of the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pkg {
    pub source: String,
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub download_url: String,
    pub date_published: DateTime<Utc>,
    pub version: String,
    pub changelog_url: String,
    #[serde(default)]
    pub options: PkgOptions,
    #[serde(default)]
    pub folders: Vec<PkgFolder>,
    #[serde(default)]
    pub deps: Vec<PkgDep>,
}

impl Pkg {
    pub fn is_pinned(&self) -> bool {
        self.options.version_eq
    }

    /// Definition that resolves back to this package, pin included.
    pub fn to_defn(&self) -> Defn {
        Defn::new(&self.source, &self.slug)
            .with_id(&self.id)
            .with_strategies(StrategyValues {
                any_flavour: self.options.any_flavour,
                any_release_type: self.options.any_release_type,
                version_eq: self.options.version_eq.then(|| self.version.clone()),
            })
    }

    /// `name (source:id)`, as used in conflict messages.
    pub fn label(&self) -> String {
        format!("{} ({}:{})", self.name, self.source, self.id)
    }

    pub fn folder_names(&self) -> impl Iterator<Item = &str> {
        self.folders.iter().map(|f| f.name.as_str())
    }
}
