//! Add-on archive handling.
//!
//! An add-on zip holds one or more top-level folders, each carrying a TOC
//! file named after the folder. Everything else at the top level is ignored.

use crate::config::Flavour;
use crate::{AddonkitError, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An opened add-on archive.
pub struct AddonArchive {
    path: PathBuf,
    zip: zip::ZipArchive<File>,
}

impl AddonArchive {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AddonkitError::io_with_path(e, path))?;
        let zip = zip::ZipArchive::new(file).map_err(|e| AddonkitError::Archive {
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            zip,
        })
    }

    /// Top-level add-on folders, i.e. folders containing `<name><suffix>.toc`.
    pub fn addon_folders(&self) -> BTreeSet<String> {
        let suffixes: Vec<&str> = Flavour::ALL
            .iter()
            .flat_map(|f| f.toc_suffixes().iter().copied())
            .chain(std::iter::once(""))
            .collect();

        self.zip
            .file_names()
            .filter_map(|name| {
                let (head, tail) = name.split_once('/')?;
                let stem = tail.strip_suffix(".toc")?.strip_prefix(head)?;
                suffixes.contains(&stem).then(|| head.to_string())
            })
            .collect()
    }

    /// Extract the given top-level folders into `dest`.
    pub fn extract(&mut self, folders: &BTreeSet<String>, dest: &Path) -> Result<()> {
        for index in 0..self.zip.len() {
            let mut entry = self.zip.by_index(index)?;
            let Some(relative) = entry.enclosed_name() else {
                warn!("Skipping unsafe entry {:?} in {}", entry.name(), self.path.display());
                continue;
            };
            let top_level = relative
                .components()
                .next()
                .map(|c| c.as_os_str().to_string_lossy().into_owned());
            if !top_level.is_some_and(|t| folders.contains(&t)) {
                continue;
            }

            let target = dest.join(&relative);
            if entry.is_dir() {
                std::fs::create_dir_all(&target)
                    .map_err(|e| AddonkitError::io_with_path(e, &target))?;
                continue;
            }
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AddonkitError::io_with_path(e, parent))?;
            }
            let mut out =
                File::create(&target).map_err(|e| AddonkitError::io_with_path(e, &target))?;
            std::io::copy(&mut entry, &mut out)
                .map_err(|e| AddonkitError::io_with_path(e, &target))?;
        }
        debug!("Extracted {:?} from {}", folders, self.path.display());
        Ok(())
    }
}

/// Move `paths` into a fresh directory under `trash_dir`.
///
/// Falls back to deleting a path when it cannot be renamed, e.g. across
/// file systems.
pub fn trash(paths: &[PathBuf], trash_dir: &Path) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let bin = trash_dir.join(format!(
        "deleted-{}-{}",
        Utc::now().format("%Y%m%dT%H%M%S%.6f"),
        rand::random::<u32>()
    ));
    std::fs::create_dir_all(&bin).map_err(|e| AddonkitError::io_with_path(e, &bin))?;

    for path in paths.iter().filter(|p| p.exists()) {
        let Some(name) = path.file_name() else {
            continue;
        };
        if std::fs::rename(path, bin.join(name)).is_err() {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            result.map_err(|e| AddonkitError::io_with_path(e, path))?;
        }
    }
    Ok(())
}
