//! Unreconciled add-on folders on disk.

use crate::config::Flavour;
use crate::toc::TocReader;
use crate::{AddonkitError, Result};
use blake3::Hasher as Blake3Hasher;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;
use walkdir::WalkDir;

/// An add-on directory not linked to any installed package.
///
/// Equality, ordering and hashing use `name` only.
#[derive(Debug, Clone)]
pub struct AddonFolder {
    pub path: PathBuf,
    pub name: String,
    pub toc: TocReader,
    content_hash: OnceLock<String>,
}

impl AddonFolder {
    pub fn new(path: impl Into<PathBuf>, toc: TocReader) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            toc,
            content_hash: OnceLock::new(),
        }
    }

    /// Read a folder, returning `None` when it has no TOC file for `flavour`.
    pub fn from_addon_path(path: &Path, flavour: Flavour) -> Option<Self> {
        TocReader::from_addon_path(path, flavour).map(|toc| Self::new(path, toc))
    }

    /// Version declared in the TOC file, if any.
    pub fn version(&self) -> &str {
        self.toc
            .get_any(&["Version", "X-Packaged-Version", "X-Curse-Packaged-Version"])
            .unwrap_or_default()
    }

    /// BLAKE3 digest over the folder's files in sorted relative-path order.
    ///
    /// Computed on first use. Blocking.
    pub fn content_hash(&self) -> Result<&str> {
        if let Some(hash) = self.content_hash.get() {
            return Ok(hash);
        }
        let hash = hash_folder(&self.path)?;
        Ok(self.content_hash.get_or_init(|| hash))
    }
}

fn hash_folder(path: &Path) -> Result<String> {
    let mut hasher = Blake3Hasher::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| AddonkitError::Io {
            message: e.to_string(),
            path: Some(path.to_path_buf()),
            source: e.into_io_error(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(path).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        let contents =
            std::fs::read(entry.path()).map_err(|e| AddonkitError::io_with_path(e, entry.path()))?;
        hasher.update(&contents);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

impl PartialEq for AddonFolder {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for AddonFolder {}

impl Hash for AddonFolder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for AddonFolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AddonFolder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// Directories in `addon_dir` with a TOC file that are not in `tracked`,
/// sorted by name.
///
/// Dot-directories and symlinks are skipped.
pub fn leftover_folders(
    addon_dir: &Path,
    flavour: Flavour,
    tracked: &HashSet<String>,
) -> Result<Vec<AddonFolder>> {
    let entries =
        std::fs::read_dir(addon_dir).map_err(|e| AddonkitError::io_with_path(e, addon_dir))?;

    let mut folders = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read entry in {}: {}", addon_dir.display(), e);
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || tracked.contains(&name) {
            continue;
        }
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Some(folder) = AddonFolder::from_addon_path(&entry.path(), flavour) {
            folders.push(folder);
        }
    }
    folders.sort();
    Ok(folders)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Create `<dir>/<name>/<name>.toc` with the given TOC body.
    pub fn make_addon(dir: &Path, name: &str, toc: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(format!("{}.toc", name)), toc).unwrap();
        path
    }
}
