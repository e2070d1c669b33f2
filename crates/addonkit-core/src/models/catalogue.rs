//! Cross-source add-on catalogue.

use crate::config::Flavour;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Link to the same add-on published on another source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogueSameAs {
    pub source: String,
    pub id: String,
}

/// One add-on as listed by the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub source: String,
    pub id: String,
    #[serde(default)]
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub game_flavours: BTreeSet<Flavour>,
    #[serde(default)]
    pub download_count: u64,
    pub last_updated: DateTime<Utc>,
    /// Folder-name sets, one per published file layout.
    #[serde(default)]
    pub folders: Vec<BTreeSet<String>>,
    /// Content hashes of the add-on's folders.
    #[serde(default)]
    pub folder_hashes: Vec<String>,
    #[serde(default)]
    pub same_as: Vec<CatalogueSameAs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogueData {
    version: u32,
    entries: Vec<CatalogueEntry>,
}

/// Read-only catalogue snapshot with `(source, id)` lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CatalogueData", into = "CatalogueData")]
pub struct Catalogue {
    version: u32,
    entries: Vec<CatalogueEntry>,
    keyed: HashMap<(String, String), usize>,
}

impl From<CatalogueData> for Catalogue {
    fn from(data: CatalogueData) -> Self {
        Catalogue::new(data.version, data.entries)
    }
}

impl From<Catalogue> for CatalogueData {
    fn from(catalogue: Catalogue) -> Self {
        CatalogueData {
            version: catalogue.version,
            entries: catalogue.entries,
        }
    }
}

impl Default for Catalogue {
    fn default() -> Self {
        Catalogue::new(Self::CURRENT_VERSION, Vec::new())
    }
}

impl Catalogue {
    pub const CURRENT_VERSION: u32 = 7;

    pub fn new(version: u32, entries: Vec<CatalogueEntry>) -> Self {
        let keyed = entries
            .iter()
            .enumerate()
            .map(|(i, e)| ((e.source.clone(), e.id.clone()), i))
            .collect();
        Self {
            version,
            entries,
            keyed,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    pub fn get(&self, source: &str, id: &str) -> Option<&CatalogueEntry> {
        self.keyed
            .get(&(source.to_string(), id.to_string()))
            .map(|&i| &self.entries[i])
    }

    /// Entries published for the given flavour.
    pub fn for_flavour(&self, flavour: Flavour) -> impl Iterator<Item = &CatalogueEntry> {
        self.entries
            .iter()
            .filter(move |e| e.game_flavours.contains(&flavour))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_deserialises_and_indexes() {
        let json = r#"{
            "version": 7,
            "entries": [{
                "source": "wowi",
                "id": "12345",
                "name": "Molinari",
                "game_flavours": ["retail"],
                "last_updated": "2024-03-01T00:00:00Z",
                "folders": [["Molinari"]]
            }]
        }"#;
        let catalogue: Catalogue = serde_json::from_str(json).unwrap();
        let entry = catalogue.get("wowi", "12345").unwrap();
        assert_eq!(entry.name, "Molinari");
        assert!(catalogue.get("github", "12345").is_none());
        assert_eq!(catalogue.for_flavour(Flavour::Retail).count(), 1);
        assert_eq!(catalogue.for_flavour(Flavour::Classic).count(), 0);
    }
}
