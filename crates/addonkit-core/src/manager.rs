//! Package manager for a single profile.
//!
//! A [`PkgManager`] owns the profile's configuration, its package database
//! and resolver registry, and borrows everything else from the shared
//! [`AppContext`]. Every batch operation returns one result per input
//! definition; installs, updates, removals and pins of a profile run under
//! its `MutatePkgs` lock.

use crate::archive::{trash, AddonArchive};
use crate::config::ProfileConfig;
use crate::context::AppContext;
use crate::db::PkgDatabase;
use crate::error::{AddonkitError, Result};
use crate::locks::LockKey;
use crate::matchers::{leftover_folders, AddonFolder, Heuristic, MatchContext, Reconciliation};
use crate::models::{Catalogue, Defn, Pkg, PkgFolder, PkgOptions, Strategy};
use crate::resolvers::Resolvers;
use crate::results::{DefnResults, PkgError, PkgResult, PkgSuccess};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Packages from other sources that look like the same add-on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquivalentCandidates {
    pub installed: Pkg,
    pub candidates: Vec<Pkg>,
}

pub struct PkgManager {
    config: ProfileConfig,
    db: PkgDatabase,
    resolvers: Resolvers,
    ctx: Arc<AppContext>,
}

impl PkgManager {
    pub fn new(
        ctx: Arc<AppContext>,
        config: ProfileConfig,
        db: PkgDatabase,
        resolvers: Resolvers,
    ) -> Self {
        Self {
            config,
            db,
            resolvers,
            ctx,
        }
    }

    /// Open the profile's database and register the built-in resolvers
    /// against the current global configuration.
    pub async fn load(ctx: Arc<AppContext>, config: ProfileConfig) -> Result<Self> {
        let db = PkgDatabase::open(&config.db_file())?;
        let global_config = ctx.global_config().await;
        let resolvers = Resolvers::builtin(ctx.http.clone(), &global_config, config.game_flavour);
        info!(
            "Loaded profile {} ({}, {})",
            config.profile,
            config.game_flavour,
            config.addon_dir.display()
        );
        Ok(Self::new(ctx, config, db, resolvers))
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }

    pub fn database(&self) -> &PkgDatabase {
        &self.db
    }

    /// Release the database connection.
    pub fn close(&self) -> Result<()> {
        self.db.close()?;
        info!("Closed profile {}", self.config.profile);
        Ok(())
    }

    async fn lock_mutations(&self) -> OwnedMutexGuard<()> {
        self.ctx
            .locks
            .acquire(LockKey::MutatePkgs(self.config.profile.clone()))
            .await
    }

    fn trash_dir(&self) -> PathBuf {
        self.config.global_config.trash_dir()
    }

    fn folder_paths<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<PathBuf> {
        names
            .into_iter()
            .map(|name| self.config.addon_dir.join(name))
            .collect()
    }

    // ========================================
    // Queries
    // ========================================

    pub fn list_installed(&self) -> Result<Vec<Pkg>> {
        self.db.installed()
    }

    /// Resolve definitions into packages.
    ///
    /// With `with_deps`, dependencies of the resolved packages are resolved
    /// one level deep and appended, keyed by their slug.
    pub async fn resolve(&self, defns: &[Defn], with_deps: bool) -> DefnResults<Pkg> {
        let catalogue = self.ctx.catalogue().await;
        let mut results = self.resolvers.resolve(defns, Some(&catalogue)).await;
        if with_deps {
            let deps = self.resolve_deps(&results, &catalogue).await;
            for (defn, result) in deps {
                if !results.contains(&defn) {
                    results.insert(defn, result);
                }
            }
        }
        results
    }

    async fn resolve_deps(
        &self,
        results: &DefnResults<Pkg>,
        catalogue: &Catalogue,
    ) -> DefnResults<Pkg> {
        let pkgs: Vec<&Pkg> = results.iter().filter_map(|(_, r)| r.as_ref().ok()).collect();
        let resolved: HashSet<(&str, &str)> = pkgs
            .iter()
            .map(|p| (p.source.as_str(), p.id.as_str()))
            .collect();

        let mut dep_defns: Vec<Defn> = Vec::new();
        for pkg in &pkgs {
            for dep in &pkg.deps {
                if resolved.contains(&(pkg.source.as_str(), dep.id.as_str())) {
                    continue;
                }
                let defn = Defn::new(&pkg.source, &dep.id);
                if !dep_defns.contains(&defn) {
                    dep_defns.push(defn);
                }
            }
        }
        if dep_defns.is_empty() {
            return DefnResults::new();
        }
        debug!("Resolving {} dependencies", dep_defns.len());

        self.resolvers
            .resolve(&dep_defns, Some(catalogue))
            .await
            .into_iter()
            .map(|(defn, result)| match &result {
                Ok(pkg) => (Defn::new(&pkg.source, &pkg.slug).with_id(&pkg.id), result),
                Err(_) => (defn, result),
            })
            .collect()
    }

    /// Changelog of a package from `source`.
    pub async fn get_changelog(&self, source: &str, uri: &str) -> Result<String> {
        let resolver = self
            .resolvers
            .get(source)
            .ok_or_else(|| AddonkitError::InvalidParams {
                message: format!("unknown source {:?}", source),
            })?;
        resolver.get_changelog(uri).await
    }

    /// Source and alias for a URL, from the first resolver that accepts it.
    pub fn pair_uri(&self, value: &str) -> Option<(&'static str, String)> {
        self.resolvers.pair_uri(value)
    }

    // ========================================
    // Reconciliation
    // ========================================

    /// Folders in the add-on directory that no installed package owns.
    pub async fn leftover_folders(&self) -> Result<Vec<AddonFolder>> {
        let tracked = self.db.tracked_folder_names()?;
        let addon_dir = self.config.addon_dir.clone();
        let flavour = self.config.game_flavour;
        run_blocking("Folder scan", move || leftover_folders(&addon_dir, flavour, &tracked)).await
    }

    /// Match leftover folders to packages with one heuristic.
    pub async fn reconcile(&self, heuristic: Heuristic) -> Result<Reconciliation> {
        let leftovers = self.leftover_folders().await?;
        let catalogue = self.ctx.catalogue().await;
        let matcher = MatchContext {
            resolvers: &self.resolvers,
            catalogue: &catalogue,
            flavour: self.config.game_flavour,
        };
        let reconciliation = matcher.reconcile(heuristic, &leftovers).await;
        info!(
            "Reconciled {} leftover folders with {:?}: {} groups matched",
            leftovers.len(),
            heuristic,
            reconciliation.matched.len()
        );
        Ok(reconciliation)
    }

    /// Definitions from other sources for each of `pkgs`, by priority.
    ///
    /// Candidates come from catalogue `same_as` links, TOC source keys,
    /// catalogue entries recording the same folder set, and folder hashes.
    pub async fn find_equivalent_pkg_defns(&self, pkgs: &[Pkg]) -> Result<Vec<(Pkg, Vec<Defn>)>> {
        let catalogue = self.ctx.catalogue().await;
        let flavour = self.config.game_flavour;

        let addon_dir = self.config.addon_dir.clone();
        let owned = pkgs.to_vec();
        let folders_per_pkg: Vec<Vec<AddonFolder>> = run_blocking("Folder scan", move || {
            Ok(owned
                .iter()
                .map(|pkg| {
                    pkg.folder_names()
                        .filter_map(|name| AddonFolder::from_addon_path(&addon_dir.join(name), flavour))
                        .inspect(|folder| {
                            if let Err(e) = folder.content_hash() {
                                warn!("Failed to hash {}: {}", folder.path.display(), e);
                            }
                        })
                        .collect()
                })
                .collect())
        })
        .await?;

        let mut hash_matches: Vec<(Defn, BTreeSet<String>)> = Vec::new();
        for resolver in self.resolvers.iter() {
            let source = resolver.metadata().id;
            let candidates: Vec<AddonFolder> = pkgs
                .iter()
                .zip(&folders_per_pkg)
                .filter(|(pkg, _)| pkg.source != source)
                .flat_map(|(_, folders)| folders.iter().cloned())
                .collect();
            if !candidates.is_empty() {
                hash_matches.extend(resolver.folder_hash_matches(&candidates, &catalogue).await);
            }
        }

        let toc_keys = self.resolvers.addon_toc_keys();
        let mut equivalents = Vec::with_capacity(pkgs.len());
        for (pkg, folders) in pkgs.iter().zip(&folders_per_pkg) {
            let is_other = |source: &str| source != pkg.source && self.resolvers.contains(source);
            let pkg_folders: BTreeSet<String> = pkg.folder_names().map(String::from).collect();
            let mut defns: BTreeSet<Defn> = BTreeSet::new();

            if let Some(entry) = catalogue.get(&pkg.source, &pkg.id) {
                defns.extend(
                    entry
                        .same_as
                        .iter()
                        .filter(|same_as| is_other(&same_as.source))
                        .map(|same_as| Defn::new(&same_as.source, &same_as.id)),
                );
            }

            for (key, source) in &toc_keys {
                if *source == pkg.source {
                    continue;
                }
                defns.extend(
                    folders
                        .iter()
                        .filter_map(|folder| folder.toc.get(key))
                        .filter(|id| !id.is_empty())
                        .map(|id| Defn::new(*source, id)),
                );
            }

            if !pkg_folders.is_empty() {
                defns.extend(
                    catalogue
                        .for_flavour(flavour)
                        .filter(|entry| is_other(&entry.source))
                        .filter(|entry| entry.folders.iter().any(|set| *set == pkg_folders))
                        .map(|entry| Defn::new(&entry.source, &entry.id)),
                );
                defns.extend(
                    hash_matches
                        .iter()
                        .filter(|(defn, matched)| is_other(&defn.source) && *matched == pkg_folders)
                        .map(|(defn, _)| defn.clone()),
                );
            }

            let mut defns: Vec<Defn> = defns.into_iter().collect();
            defns.sort_by_key(|defn| self.resolvers.priority(&defn.source));
            equivalents.push((pkg.clone(), defns));
        }
        Ok(equivalents)
    }

    /// Resolved alternatives for each of `pkgs`; unresolvable candidates are
    /// dropped.
    pub async fn find_equivalent_candidates(
        &self,
        pkgs: &[Pkg],
    ) -> Result<Vec<EquivalentCandidates>> {
        let equivalents = self.find_equivalent_pkg_defns(pkgs).await?;
        let all_defns: Vec<Defn> = equivalents
            .iter()
            .flat_map(|(_, defns)| defns.iter().cloned())
            .collect();
        let results = self.resolve(&all_defns, false).await;

        Ok(equivalents
            .into_iter()
            .map(|(installed, defns)| {
                let mut candidates: Vec<Pkg> = Vec::new();
                for defn in &defns {
                    if let Some(Ok(pkg)) = results.get(defn) {
                        if !candidates.iter().any(|c| c.source == pkg.source && c.id == pkg.id) {
                            candidates.push(pkg.clone());
                        }
                    }
                }
                EquivalentCandidates {
                    installed,
                    candidates,
                }
            })
            .collect())
    }

    // ========================================
    // Mutations
    // ========================================

    /// Install packages.
    ///
    /// Dependencies of the requested packages are installed too unless
    /// already present. With `replace`, untracked folders in the way are
    /// moved to the trash instead of failing the install.
    pub async fn install(
        &self,
        defns: &[Defn],
        replace: bool,
        dry_run: bool,
    ) -> DefnResults<PkgSuccess> {
        let _guard = self.lock_mutations().await;

        let mut results: DefnResults<PkgSuccess> = DefnResults::new();
        let mut to_resolve: Vec<Defn> = Vec::new();
        for defn in defns {
            match self.db.get_pkg(defn) {
                Ok(Some(_)) => results.insert(defn.clone(), Err(PkgError::AlreadyInstalled)),
                Ok(None) => to_resolve.push(defn.clone()),
                Err(e) => results.insert(defn.clone(), Err(e.into())),
            }
        }

        let resolved = self.resolve(&to_resolve, true).await;
        let mut pending: Vec<(Defn, Pkg)> = Vec::new();
        for (defn, result) in resolved {
            let requested = to_resolve.contains(&defn);
            match result {
                Ok(pkg) if !requested && self.is_installed(&pkg) => {
                    debug!("Dependency {} is already installed", pkg.label());
                }
                Ok(pkg) if dry_run => {
                    results.insert(defn, Ok(PkgSuccess::Installed { pkg, dry_run: true }));
                }
                Ok(pkg) => pending.push((defn, pkg)),
                Err(e) => results.insert(defn, Err(e)),
            }
        }

        let archives = self.download_all(pending.iter().map(|(_, pkg)| pkg)).await;
        for ((defn, pkg), archive) in pending.into_iter().zip(archives) {
            let outcome = match archive {
                Ok(path) => self
                    .install_archive(pkg, path, replace, None)
                    .await
                    .map(|pkg| PkgSuccess::Installed {
                        pkg,
                        dry_run: false,
                    }),
                Err(e) => Err(e.into()),
            };
            results.insert(defn, outcome);
        }

        results.reordered(defns)
    }

    /// Update installed packages; every installed package when `defns` is
    /// empty.
    ///
    /// With `retain_strategy` the stored strategies are used for the new
    /// resolution, otherwise the ones on each definition.
    pub async fn update(
        &self,
        defns: &[Defn],
        retain_strategy: bool,
        dry_run: bool,
    ) -> Result<DefnResults<PkgSuccess>> {
        let _guard = self.lock_mutations().await;

        let targets: Vec<Defn> = if defns.is_empty() {
            self.db.installed()?.iter().map(Pkg::to_defn).collect()
        } else {
            defns.to_vec()
        };

        let mut results: DefnResults<PkgSuccess> = DefnResults::new();
        let mut installed: Vec<(Defn, Pkg, Defn)> = Vec::new();
        for defn in &targets {
            match self.db.get_pkg(defn) {
                Ok(Some(old_pkg)) => {
                    let strategies = if retain_strategy {
                        old_pkg.to_defn().strategies
                    } else {
                        defn.strategies.clone()
                    };
                    let query = Defn::new(&old_pkg.source, &old_pkg.id)
                        .with_id(&old_pkg.id)
                        .with_strategies(strategies);
                    installed.push((defn.clone(), old_pkg, query));
                }
                Ok(None) => results.insert(defn.clone(), Err(PkgError::NotInstalled)),
                Err(e) => results.insert(defn.clone(), Err(e.into())),
            }
        }

        let queries: Vec<Defn> = installed.iter().map(|(_, _, query)| query.clone()).collect();
        let resolved = self.resolve(&queries, false).await;

        let mut pending: Vec<(Defn, Pkg, Pkg)> = Vec::new();
        for (defn, old_pkg, query) in installed {
            let result = resolved
                .get(&query)
                .cloned()
                .unwrap_or_else(|| Err(PkgError::internal("definition was not resolved")));
            match result {
                Err(e) => results.insert(defn, Err(e)),
                Ok(new_pkg) if new_pkg.version == old_pkg.version => results.insert(
                    defn,
                    Err(PkgError::UpToDate {
                        pinned: new_pkg.is_pinned(),
                    }),
                ),
                Ok(new_pkg) if dry_run => results.insert(
                    defn,
                    Ok(PkgSuccess::Updated {
                        old_pkg,
                        new_pkg,
                        dry_run: true,
                    }),
                ),
                Ok(new_pkg) => pending.push((defn, old_pkg, new_pkg)),
            }
        }

        let archives = self.download_all(pending.iter().map(|(_, _, pkg)| pkg)).await;
        for ((defn, old_pkg, new_pkg), archive) in pending.into_iter().zip(archives) {
            let outcome = match archive {
                Ok(path) => self
                    .install_archive(new_pkg, path, false, Some(&old_pkg))
                    .await
                    .map(|new_pkg| PkgSuccess::Updated {
                        old_pkg,
                        new_pkg,
                        dry_run: false,
                    }),
                Err(e) => Err(e.into()),
            };
            results.insert(defn, outcome);
        }

        Ok(results.reordered(&targets))
    }

    /// Remove installed packages, trashing their folders unless
    /// `keep_folders`.
    pub async fn remove(&self, defns: &[Defn], keep_folders: bool) -> DefnResults<PkgSuccess> {
        let _guard = self.lock_mutations().await;
        let mut results = DefnResults::new();
        for defn in defns {
            let result = self.remove_one(defn, keep_folders).await;
            results.insert(defn.clone(), result);
        }
        results
    }

    async fn remove_one(&self, defn: &Defn, keep_folders: bool) -> PkgResult<PkgSuccess> {
        let pkg = self.db.get_pkg(defn)?.ok_or(PkgError::NotInstalled)?;
        if !keep_folders {
            let paths = self.folder_paths(pkg.folder_names());
            let trash_dir = self.trash_dir();
            run_blocking("Trashing folders", move || trash(&paths, &trash_dir)).await?;
        }
        self.db.delete(&pkg)?;
        info!("Removed {}", pkg.label());
        Ok(PkgSuccess::Removed { old_pkg: pkg })
    }

    /// Pin installed packages to their current version, or unpin them when
    /// the definition carries no version.
    pub async fn pin(&self, defns: &[Defn]) -> DefnResults<PkgSuccess> {
        let _guard = self.lock_mutations().await;
        defns
            .iter()
            .map(|defn| (defn.clone(), self.pin_one(defn)))
            .collect()
    }

    fn pin_one(&self, defn: &Defn) -> PkgResult<PkgSuccess> {
        let resolver = self
            .resolvers
            .get(&defn.source)
            .ok_or(PkgError::SourceInvalid)?;
        if !resolver.metadata().strategies.contains(&Strategy::VersionEq) {
            return Err(PkgError::StrategiesUnsupported([Strategy::VersionEq].into()));
        }

        let pkg = self.db.get_pkg(defn)?.ok_or(PkgError::NotInstalled)?;
        let version = defn.strategies.version_eq.as_deref();
        if version.is_some_and(|v| v != pkg.version) {
            return Err(PkgError::FilesNotMatching(defn.strategies.clone()));
        }

        let pinned = version.is_some();
        self.db.set_version_eq(&pkg, pinned)?;
        info!("{} {}", if pinned { "Pinned" } else { "Unpinned" }, pkg.label());
        let pkg = Pkg {
            options: PkgOptions {
                version_eq: pinned,
                ..pkg.options.clone()
            },
            ..pkg
        };
        Ok(PkgSuccess::Installed {
            pkg,
            dry_run: false,
        })
    }

    fn is_installed(&self, pkg: &Pkg) -> bool {
        matches!(self.db.get_by_id(&pkg.source, &pkg.id), Ok(Some(_)))
    }

    async fn download_all<'a>(&self, pkgs: impl Iterator<Item = &'a Pkg>) -> Vec<Result<PathBuf>> {
        join_all(pkgs.map(|pkg| self.ctx.downloader.download(&pkg.download_url))).await
    }

    /// Unpack `archive` into the add-on directory and record `pkg`.
    ///
    /// `replacing` is the installed package being updated; its folders are
    /// not conflicts and are trashed before extraction.
    async fn install_archive(
        &self,
        pkg: Pkg,
        archive: PathBuf,
        replace: bool,
        replacing: Option<&Pkg>,
    ) -> PkgResult<Pkg> {
        let (archive, folders) = run_blocking("Reading archive", move || {
            let archive = AddonArchive::open(&archive)?;
            let folders = archive.addon_folders();
            Ok((archive, folders))
        })
        .await?;
        if folders.is_empty() {
            return Err(PkgError::FilesUnavailable(Some(
                "archive contains no add-on folders".to_string(),
            )));
        }

        let is_replaced = |p: &Pkg| replacing.is_some_and(|old| old.source == p.source && old.id == p.id);
        let conflicts: Vec<Pkg> = self
            .db
            .folder_conflicts(&folders)?
            .into_iter()
            .filter(|p| !is_replaced(p))
            .collect();
        if !conflicts.is_empty() {
            return Err(PkgError::ConflictsWithInstalled(conflicts));
        }

        let owned: BTreeSet<&str> = replacing
            .map(|old| old.folder_names().collect())
            .unwrap_or_default();
        let unreconciled: BTreeSet<String> = folders
            .iter()
            .filter(|name| !owned.contains(name.as_str()))
            .filter(|name| self.config.addon_dir.join(name).exists())
            .cloned()
            .collect();
        if !unreconciled.is_empty() && !replace {
            return Err(PkgError::ConflictsWithUnreconciled(unreconciled));
        }

        let mut to_trash = self.folder_paths(unreconciled.iter().map(String::as_str));
        to_trash.extend(self.folder_paths(owned.iter().copied()));
        let trash_dir = self.trash_dir();
        let addon_dir = self.config.addon_dir.clone();
        let folders = run_blocking("Extracting archive", move || {
            let mut archive = archive;
            trash(&to_trash, &trash_dir)?;
            archive.extract(&folders, &addon_dir)?;
            Ok(folders)
        })
        .await?;

        let pkg = Pkg {
            folders: folders.into_iter().map(|name| PkgFolder { name }).collect(),
            ..pkg
        };
        if let Some(old) = replacing {
            self.db.delete(old)?;
        }
        self.db.insert(&pkg)?;
        info!("Installed {} {}", pkg.label(), pkg.version);
        Ok(pkg)
    }
}

/// Run filesystem work on the blocking pool.
async fn run_blocking<T, F>(what: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AddonkitError::Other(format!("{} failed: {}", what, e)))?
}
