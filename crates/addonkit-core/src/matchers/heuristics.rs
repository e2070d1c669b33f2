//! Heuristics pairing leftover folders with candidate definitions.
//!
//! Every heuristic returns disjoint candidate groups: no folder appears in
//! two groups. Definitions within a group are ordered by source priority.

use super::folder::AddonFolder;
use super::merge::merge_intersecting_sets;
use crate::config::Flavour;
use crate::models::{Catalogue, CatalogueEntry, Defn};
use crate::resolvers::Resolvers;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Folders and the definitions they may belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    pub folders: Vec<AddonFolder>,
    pub defns: Vec<Defn>,
}

/// Unique definitions sorted by source priority, stable otherwise.
fn by_priority(resolvers: &Resolvers, defns: impl IntoIterator<Item = Defn>) -> Vec<Defn> {
    let mut unique: Vec<Defn> = Vec::new();
    for defn in defns {
        if !unique.contains(&defn) {
            unique.push(defn);
        }
    }
    unique.sort_by_key(|d| resolvers.priority(&d.source));
    unique
}

fn folders_named<'a>(
    leftovers: &'a [AddonFolder],
    names: &'a BTreeSet<String>,
) -> impl Iterator<Item = AddonFolder> + 'a {
    leftovers
        .iter()
        .filter(move |f| names.contains(&f.name))
        .cloned()
}

/// Group `(folders, defn)` matches by overlapping folder sets. Within a
/// group, definitions backed by more folders come first, then by priority.
fn group_by_folders(
    leftovers: &[AddonFolder],
    resolvers: &Resolvers,
    matches: Vec<(BTreeSet<String>, Defn)>,
) -> Vec<CandidateGroup> {
    let merged = merge_intersecting_sets(matches.iter().map(|(f, _)| f.clone()));
    let group_of: HashMap<&str, usize> = merged
        .iter()
        .enumerate()
        .flat_map(|(i, set)| set.iter().map(move |name| (name.as_str(), i)))
        .collect();

    let mut buckets: BTreeMap<usize, Vec<(usize, Defn)>> = BTreeMap::new();
    for (folders, defn) in matches {
        let Some(&group) = folders.iter().next().and_then(|n| group_of.get(n.as_str())) else {
            continue;
        };
        buckets.entry(group).or_default().push((folders.len(), defn));
    }

    buckets
        .into_iter()
        .map(|(group, mut candidates)| {
            candidates.sort_by_key(|(count, defn)| {
                (std::cmp::Reverse(*count), resolvers.priority(&defn.source))
            });
            let mut defns: Vec<Defn> = Vec::new();
            for (_, defn) in candidates {
                if !defns.contains(&defn) {
                    defns.push(defn);
                }
            }
            CandidateGroup {
                folders: folders_named(leftovers, &merged[group]).collect(),
                defns,
            }
        })
        .collect()
}

// ========================================
// (a) TOC keys
// ========================================

/// Match folders that embed a source id in their TOC file, following the
/// catalogue's cross-source links.
pub fn match_toc_keys(
    leftovers: &[AddonFolder],
    resolvers: &Resolvers,
    catalogue: &Catalogue,
) -> Vec<CandidateGroup> {
    let toc_keys = resolvers.addon_toc_keys();

    let mut matches: Vec<(&AddonFolder, BTreeSet<Defn>)> = Vec::new();
    for folder in leftovers {
        let direct: BTreeSet<Defn> = toc_keys
            .iter()
            .filter_map(|(key, source)| {
                folder
                    .toc
                    .get(key)
                    .filter(|id| !id.is_empty())
                    .map(|id| Defn::new(*source, id))
            })
            .collect();
        if direct.is_empty() {
            continue;
        }
        let linked: Vec<Defn> = direct
            .iter()
            .filter_map(|d| catalogue.get(&d.source, &d.alias))
            .flat_map(|entry| entry.same_as.iter())
            .filter(|same_as| resolvers.contains(&same_as.source))
            .map(|same_as| Defn::new(&same_as.source, &same_as.id))
            .collect();
        let mut defns = direct;
        defns.extend(linked);
        matches.push((folder, defns));
    }

    let merged = merge_intersecting_sets(matches.iter().map(|(_, d)| d.clone()));
    let mut buckets: BTreeMap<usize, Vec<AddonFolder>> = BTreeMap::new();
    for (folder, defns) in &matches {
        if let Some(group) = defns
            .iter()
            .next()
            .and_then(|first| merged.iter().position(|set| set.contains(first)))
        {
            buckets.entry(group).or_default().push((*folder).clone());
        }
    }

    buckets
        .into_iter()
        .map(|(group, mut folders)| {
            folders.sort();
            CandidateGroup {
                folders,
                defns: by_priority(resolvers, merged[group].iter().cloned()),
            }
        })
        .collect()
}

// ========================================
// (b) Folder-name subsets
// ========================================

/// Match catalogue entries whose recorded folder sets overlap the leftovers.
pub fn match_folder_name_subsets(
    leftovers: &[AddonFolder],
    resolvers: &Resolvers,
    catalogue: &Catalogue,
    flavour: Flavour,
) -> Vec<CandidateGroup> {
    let names: BTreeSet<String> = leftovers.iter().map(|f| f.name.clone()).collect();

    let matches: Vec<(BTreeSet<String>, Defn)> = catalogue
        .for_flavour(flavour)
        .filter(|entry| resolvers.contains(&entry.source))
        .flat_map(|entry| {
            let names = &names;
            entry.folders.iter().filter_map(move |folders| {
                let overlap: BTreeSet<String> = folders.intersection(names).cloned().collect();
                (!overlap.is_empty()).then(|| (overlap, Defn::new(&entry.source, &entry.id)))
            })
        })
        .collect();

    group_by_folders(leftovers, resolvers, matches)
}

// ========================================
// (c) Folder content hashes
// ========================================

/// Match folders by content hash, delegating the comparison to resolvers.
pub async fn match_folder_hashes(
    leftovers: &[AddonFolder],
    resolvers: &Resolvers,
    catalogue: &Catalogue,
) -> Vec<CandidateGroup> {
    let owned = leftovers.to_vec();
    let hashed = match tokio::task::spawn_blocking(move || {
        for folder in &owned {
            if let Err(e) = folder.content_hash() {
                warn!("Failed to hash {}: {}", folder.path.display(), e);
            }
        }
        owned
    })
    .await
    {
        Ok(hashed) => hashed,
        Err(e) => {
            warn!("Folder hashing task failed: {}", e);
            return Vec::new();
        }
    };

    let per_resolver = join_all(
        resolvers
            .iter()
            .map(|resolver| resolver.folder_hash_matches(&hashed, catalogue)),
    )
    .await;

    let matches: Vec<(BTreeSet<String>, Defn)> = per_resolver
        .into_iter()
        .flatten()
        .map(|(defn, folders)| (folders, defn))
        .collect();
    debug!("Found {} folder hash matches", matches.len());

    group_by_folders(&hashed, resolvers, matches)
        .into_iter()
        .map(|group| CandidateGroup {
            defns: by_priority(resolvers, group.defns),
            ..group
        })
        .collect()
}

// ========================================
// (d) Name similarity
// ========================================

/// Lower-cased ASCII letters and digits only.
fn squash_name(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Match folder names against catalogue entry names after normalisation.
pub fn match_addon_names(
    leftovers: &[AddonFolder],
    resolvers: &Resolvers,
    catalogue: &Catalogue,
) -> Vec<CandidateGroup> {
    let mut entries_by_name: HashMap<String, Vec<&CatalogueEntry>> = HashMap::new();
    for entry in catalogue.entries() {
        if resolvers.contains(&entry.source) {
            entries_by_name
                .entry(squash_name(&entry.name))
                .or_default()
                .push(entry);
        }
    }

    let mut sorted: Vec<&AddonFolder> = leftovers.iter().collect();
    sorted.sort();
    sorted
        .into_iter()
        .filter_map(|folder| {
            let entries = entries_by_name.get(&squash_name(&folder.name))?;
            Some(CandidateGroup {
                folders: vec![folder.clone()],
                defns: by_priority(
                    resolvers,
                    entries.iter().map(|e| Defn::new(&e.source, &e.id)),
                ),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::folder::test_support::make_addon;
    use super::*;
    use crate::models::CatalogueSameAs;
    use crate::resolvers::test_support::StubResolver;
    use crate::resolvers::DynResolver;
    use crate::toc::TocReader;
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(source: &str, id: &str, name: &str, folders: &[&[&str]]) -> CatalogueEntry {
        CatalogueEntry {
            source: source.to_string(),
            id: id.to_string(),
            slug: id.to_lowercase(),
            name: name.to_string(),
            url: String::new(),
            game_flavours: [Flavour::Retail].into(),
            download_count: 0,
            last_updated: Utc::now(),
            folders: folders
                .iter()
                .map(|set| set.iter().map(|s| s.to_string()).collect())
                .collect(),
            folder_hashes: Vec::new(),
            same_as: Vec::new(),
        }
    }

    fn folder(name: &str, toc: &str) -> AddonFolder {
        AddonFolder::new(format!("/addons/{}", name), TocReader::parse(toc))
    }

    fn resolvers() -> Resolvers {
        Resolvers::new([
            Arc::new(StubResolver::new("github", &[])) as DynResolver,
            Arc::new(StubResolver::new("wowi", &[]).with_toc_key("X-WoWI-ID")),
            Arc::new(StubResolver::new("other", &[]).with_toc_key("X-Other-ID")),
        ])
    }

    fn names(group: &CandidateGroup) -> Vec<&str> {
        group.folders.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_toc_keys_follow_same_as_links() {
        let mut wowi = entry("wowi", "1", "Foo", &[]);
        wowi.same_as = vec![
            CatalogueSameAs {
                source: "github".into(),
                id: "foo/foo".into(),
            },
            CatalogueSameAs {
                source: "unregistered".into(),
                id: "x".into(),
            },
        ];
        let catalogue = Catalogue::new(Catalogue::CURRENT_VERSION, vec![wowi]);
        let leftovers = vec![
            folder("Foo", "## X-WoWI-ID: 1\n"),
            folder("Foo_Options", "## X-Other-ID: 9\n## X-WoWI-ID: 1\n"),
            folder("Bar", "## X-Other-ID: 2\n"),
            folder("Plain", "## Title: Plain\n"),
        ];

        let groups = match_toc_keys(&leftovers, &resolvers(), &catalogue);
        assert_eq!(groups.len(), 2);
        let foo = groups.iter().find(|g| names(g).contains(&"Foo")).unwrap();
        assert_eq!(names(foo), vec!["Foo", "Foo_Options"]);
        assert_eq!(
            foo.defns,
            vec![
                Defn::new("github", "foo/foo"),
                Defn::new("wowi", "1"),
                Defn::new("other", "9"),
            ]
        );
        let bar = groups.iter().find(|g| names(g) == vec!["Bar"]).unwrap();
        assert_eq!(bar.defns, vec![Defn::new("other", "2")]);
    }

    #[test]
    fn test_folder_name_subsets_prefer_better_corroborated() {
        let catalogue = Catalogue::new(
            Catalogue::CURRENT_VERSION,
            vec![
                entry("github", "small", "Small", &[&["Foo"]]),
                entry("wowi", "big", "Big", &[&["Foo", "Foo_Config", "Missing"]]),
                entry("wowi", "lone", "Lone", &[&["Lone"]]),
                entry("wowi", "none", "None", &[&["Absent"]]),
            ],
        );
        let leftovers = vec![
            folder("Foo", ""),
            folder("Foo_Config", ""),
            folder("Lone", ""),
            folder("Stray", ""),
        ];

        let groups =
            match_folder_name_subsets(&leftovers, &resolvers(), &catalogue, Flavour::Retail);
        assert_eq!(groups.len(), 2);
        let foo = groups.iter().find(|g| names(g).contains(&"Foo")).unwrap();
        assert_eq!(names(foo), vec!["Foo", "Foo_Config"]);
        assert_eq!(
            foo.defns,
            vec![Defn::new("wowi", "big"), Defn::new("github", "small")]
        );
    }

    #[test]
    fn test_folder_name_subsets_respect_flavour() {
        let mut classic_only = entry("wowi", "1", "Foo", &[&["Foo"]]);
        classic_only.game_flavours = [Flavour::Classic].into();
        let catalogue = Catalogue::new(Catalogue::CURRENT_VERSION, vec![classic_only]);
        let leftovers = vec![folder("Foo", "")];
        assert!(
            match_folder_name_subsets(&leftovers, &resolvers(), &catalogue, Flavour::Retail)
                .is_empty()
        );
    }

    #[test]
    fn test_addon_names_are_normalised() {
        let catalogue = Catalogue::new(
            Catalogue::CURRENT_VERSION,
            vec![
                entry("wowi", "1", "Deadly Boss-Mods", &[]),
                entry("github", "dbm/dbm", "deadly boss mods", &[]),
            ],
        );
        let leftovers = vec![folder("Deadly_Boss_Mods", ""), folder("Other", "")];
        let groups = match_addon_names(&leftovers, &resolvers(), &catalogue);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["Deadly_Boss_Mods"]);
        assert_eq!(
            groups[0].defns,
            vec![Defn::new("github", "dbm/dbm"), Defn::new("wowi", "1")]
        );
    }

    #[test]
    fn test_addon_names_ignore_spacing() {
        let catalogue = Catalogue::new(
            Catalogue::CURRENT_VERSION,
            vec![entry("wowi", "7", "Simple Item Level", &[])],
        );
        let leftovers = vec![folder("SimpleItemLevel", ""), folder("Simple", "")];
        let groups = match_addon_names(&leftovers, &resolvers(), &catalogue);
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["SimpleItemLevel"]);
        assert_eq!(groups[0].defns, vec![Defn::new("wowi", "7")]);
        assert_eq!(squash_name("Élan: Vital_2!"), "lanvital2");
    }

    #[tokio::test]
    async fn test_folder_hashes_use_resolver_matches() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = make_addon(temp.path(), "Foo", "## Title: Foo\n");
        let foo = AddonFolder::new(&path, TocReader::default());
        let hash = foo.content_hash().unwrap().to_string();

        let mut hashed = entry("wowi", "7", "Foo", &[]);
        hashed.folder_hashes = vec![hash];
        let catalogue = Catalogue::new(Catalogue::CURRENT_VERSION, vec![hashed]);

        let leftovers = vec![AddonFolder::new(&path, TocReader::default())];
        let groups = match_folder_hashes(&leftovers, &resolvers(), &catalogue).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(names(&groups[0]), vec!["Foo"]);
        assert_eq!(groups[0].defns, vec![Defn::new("wowi", "7")]);
    }
}
