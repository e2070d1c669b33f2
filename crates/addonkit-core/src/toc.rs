//! Add-on TOC file reading.
//!
//! Only the `## Key: Value` metadata lines are read.

use crate::config::Flavour;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Metadata entries of one TOC file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TocReader {
    entries: HashMap<String, String>,
}

impl TocReader {
    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| line.strip_prefix("##"))
            .filter_map(|line| {
                let (key, value) = line.trim_start_matches('#').split_once(':')?;
                let key = key.trim();
                (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
            })
            .collect();
        Self { entries }
    }

    /// TOC file of the add-on folder at `path`, preferring the flavour-specific one.
    pub fn find_toc_file(path: &Path, flavour: Flavour) -> Option<PathBuf> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        flavour
            .toc_suffixes()
            .iter()
            .copied()
            .chain(std::iter::once(""))
            .map(|suffix| path.join(format!("{}{}.toc", name, suffix)))
            .find(|candidate| candidate.is_file())
    }

    /// Read the TOC file of an add-on folder.
    pub fn from_addon_path(path: &Path, flavour: Flavour) -> Option<Self> {
        let toc_file = Self::find_toc_file(path, flavour)?;
        match std::fs::read(&toc_file) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                Some(Self::parse(contents.trim_start_matches('\u{feff}')))
            }
            Err(e) => {
                warn!("Failed to read {}: {}", toc_file.display(), e);
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// First non-empty value among `keys`.
    pub fn get_any(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .find(|v| !v.is_empty())
    }
}
