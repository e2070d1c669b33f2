//! Reconciliation of unregistered add-on folders with source packages.
//!
//! A heuristic proposes candidate groups of folders and definitions; the
//! definitions are then resolved and a group is kept only if at least one of
//! them resolves. The kept groups and the unmatched residual partition the
//! leftover folders.

mod folder;
mod heuristics;
mod merge;

pub use folder::{leftover_folders, AddonFolder};
pub use heuristics::{
    match_addon_names, match_folder_hashes, match_folder_name_subsets, match_toc_keys,
    CandidateGroup,
};
pub use merge::merge_intersecting_sets;

#[cfg(test)]
pub(crate) use folder::test_support;

use crate::config::Flavour;
use crate::models::{Catalogue, Defn, Pkg};
use crate::resolvers::Resolvers;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Matching heuristic, in order of increasing guesswork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heuristic {
    /// Source ids embedded in TOC files.
    TocKeys,
    /// Folder names recorded in the catalogue.
    FolderNameSubsets,
    /// Folder content hashes recorded in the catalogue.
    FolderHashes,
    /// Folder names equal to add-on names.
    NameSimilarity,
}

impl Heuristic {
    pub const ALL: [Heuristic; 4] = [
        Heuristic::TocKeys,
        Heuristic::FolderNameSubsets,
        Heuristic::FolderHashes,
        Heuristic::NameSimilarity,
    ];
}

/// Folders matched to the packages they may belong to, best match first.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedGroup {
    pub folders: Vec<AddonFolder>,
    pub pkgs: Vec<Pkg>,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub matched: Vec<MatchedGroup>,
    /// Leftover folders in no matched group, sorted by name.
    pub unmatched: Vec<AddonFolder>,
}

/// Everything a heuristic may consult.
pub struct MatchContext<'a> {
    pub resolvers: &'a Resolvers,
    pub catalogue: &'a Catalogue,
    pub flavour: Flavour,
}

impl MatchContext<'_> {
    /// Run one heuristic over `leftovers` without resolving anything.
    pub async fn candidates(
        &self,
        heuristic: Heuristic,
        leftovers: &[AddonFolder],
    ) -> Vec<CandidateGroup> {
        match heuristic {
            Heuristic::TocKeys => match_toc_keys(leftovers, self.resolvers, self.catalogue),
            Heuristic::FolderNameSubsets => {
                match_folder_name_subsets(leftovers, self.resolvers, self.catalogue, self.flavour)
            }
            Heuristic::FolderHashes => {
                match_folder_hashes(leftovers, self.resolvers, self.catalogue).await
            }
            Heuristic::NameSimilarity => {
                match_addon_names(leftovers, self.resolvers, self.catalogue)
            }
        }
    }

    /// Match `leftovers` with one heuristic and resolve the candidates.
    pub async fn reconcile(&self, heuristic: Heuristic, leftovers: &[AddonFolder]) -> Reconciliation {
        let candidates = self.candidates(heuristic, leftovers).await;

        let mut seen = HashSet::new();
        let defns: Vec<Defn> = candidates
            .iter()
            .flat_map(|c| c.defns.iter())
            .filter(|d| seen.insert(*d))
            .cloned()
            .collect();
        let results = self.resolvers.resolve(&defns, Some(self.catalogue)).await;

        let mut matched = Vec::new();
        let mut claimed: HashSet<String> = HashSet::new();
        for candidate in candidates {
            let mut pkgs: Vec<Pkg> = Vec::new();
            for defn in &candidate.defns {
                if let Some(Ok(pkg)) = results.get(defn) {
                    if !pkgs.iter().any(|p| p.source == pkg.source && p.id == pkg.id) {
                        pkgs.push(pkg.clone());
                    }
                }
            }
            if pkgs.is_empty() {
                continue;
            }
            claimed.extend(candidate.folders.iter().map(|f| f.name.clone()));
            matched.push(MatchedGroup {
                folders: candidate.folders,
                pkgs,
            });
        }

        let mut unmatched: Vec<AddonFolder> = leftovers
            .iter()
            .filter(|f| !claimed.contains(&f.name))
            .cloned()
            .collect();
        unmatched.sort();

        debug!(
            "{:?}: {} matched groups, {} unmatched folders",
            heuristic,
            matched.len(),
            unmatched.len()
        );
        Reconciliation { matched, unmatched }
    }
}
