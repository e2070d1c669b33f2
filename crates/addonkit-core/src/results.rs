//! Per-definition outcomes of package operations.
//!
//! Every batch operation returns one [`PkgResult`] per input definition.
//! Failures are ordinary values here, never propagated as [`crate::AddonkitError`].

use crate::models::{Defn, Pkg, Strategy, StrategyValues};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Coarse classification used by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failure,
    Error,
}

/// A failed operation on a single definition.
///
/// All variants but [`PkgError::Internal`] are expected failures caused by
/// the request or the state of the profile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PkgError {
    #[error("package already installed")]
    AlreadyInstalled,

    #[error("package folders conflict with {}", describe_conflicting_pkgs(.0))]
    ConflictsWithInstalled(Vec<Pkg>),

    #[error("package folders conflict with {}", quote_folders(.0))]
    ConflictsWithUnreconciled(BTreeSet<String>),

    #[error("package does not exist")]
    Nonexistent,

    #[error("{}", files_unavailable(.0))]
    FilesUnavailable(Option<String>),

    #[error("no files found for: {}", describe_strategy_values(.0))]
    FilesNotMatching(StrategyValues),

    #[error("package is not installed")]
    NotInstalled,

    #[error("package source is invalid")]
    SourceInvalid,

    #[error("package is {}", if_pinned(.pinned))]
    UpToDate { pinned: bool },

    #[error("strategies are not valid for source: {}", join_strategies(.0))]
    StrategiesUnsupported(BTreeSet<Strategy>),

    #[error("internal error: \"{0}\"")]
    Internal(String),
}

fn describe_conflicting_pkgs(pkgs: &[Pkg]) -> String {
    let noun = if pkgs.len() > 1 {
        "installed packages"
    } else {
        "installed package"
    };
    let labels: Vec<String> = pkgs.iter().map(Pkg::label).collect();
    format!("{} {}", noun, labels.join(", "))
}

fn files_unavailable(reason: &Option<String>) -> &str {
    reason
        .as_deref()
        .unwrap_or("no files are available for download")
}

fn describe_strategy_values(values: &StrategyValues) -> String {
    values.describe().join("; ")
}

fn if_pinned(pinned: &bool) -> &'static str {
    if *pinned {
        "pinned"
    } else {
        "up to date"
    }
}

fn quote_folders(folders: &BTreeSet<String>) -> String {
    folders
        .iter()
        .map(|f| format!("'{}'", f))
        .collect::<Vec<_>>()
        .join(", ")
}

fn join_strategies(strategies: &BTreeSet<Strategy>) -> String {
    strategies
        .iter()
        .map(Strategy::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl PkgError {
    /// Wrap an unexpected error.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        PkgError::Internal(err.to_string())
    }

    pub fn status(&self) -> ResultStatus {
        match self {
            PkgError::Internal(_) => ResultStatus::Error,
            _ => ResultStatus::Failure,
        }
    }
}

impl From<crate::error::AddonkitError> for PkgError {
    fn from(err: crate::error::AddonkitError) -> Self {
        PkgError::internal(err)
    }
}

/// Result of resolving or operating on one definition.
pub type PkgResult<T> = std::result::Result<T, PkgError>;

/// One result per distinct definition, in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub struct DefnResults<T> {
    entries: Vec<(Defn, PkgResult<T>)>,
    index: HashMap<Defn, usize>,
}

impl<T> Default for DefnResults<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> DefnResults<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, replacing any earlier one for the same definition.
    pub fn insert(&mut self, defn: Defn, result: PkgResult<T>) {
        match self.index.get(&defn) {
            Some(&position) => self.entries[position].1 = result,
            None => {
                self.index.insert(defn.clone(), self.entries.len());
                self.entries.push((defn, result));
            }
        }
    }

    pub fn get(&self, defn: &Defn) -> Option<&PkgResult<T>> {
        self.index.get(defn).map(|&position| &self.entries[position].1)
    }

    pub fn contains(&self, defn: &Defn) -> bool {
        self.index.contains_key(defn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Defn, &PkgResult<T>)> {
        self.entries.iter().map(|(d, r)| (d, r))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Defn> {
        self.entries.iter().map(|(d, _)| d)
    }

    /// The same results with the definitions of `order` first, in that
    /// order. The rest keep their relative order.
    pub fn reordered(self, order: &[Defn]) -> Self {
        let Self { entries, index } = self;
        let mut slots: Vec<Option<(Defn, PkgResult<T>)>> = entries.into_iter().map(Some).collect();
        let mut reordered = Self::new();
        for defn in order {
            if let Some((defn, result)) = index.get(defn).and_then(|&i| slots[i].take()) {
                reordered.insert(defn, result);
            }
        }
        for (defn, result) in slots.into_iter().flatten() {
            reordered.insert(defn, result);
        }
        reordered
    }
}

impl<T> FromIterator<(Defn, PkgResult<T>)> for DefnResults<T> {
    fn from_iter<I: IntoIterator<Item = (Defn, PkgResult<T>)>>(iter: I) -> Self {
        let mut results = Self::new();
        for (defn, result) in iter {
            results.insert(defn, result);
        }
        results
    }
}

impl<T> IntoIterator for DefnResults<T> {
    type Item = (Defn, PkgResult<T>);
    type IntoIter = std::vec::IntoIter<(Defn, PkgResult<T>)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A successful mutation of one package.
#[derive(Debug, Clone, PartialEq)]
pub enum PkgSuccess {
    Installed { pkg: Pkg, dry_run: bool },
    Updated { old_pkg: Pkg, new_pkg: Pkg, dry_run: bool },
    Removed { old_pkg: Pkg },
}

impl PkgSuccess {
    pub fn message(&self) -> String {
        match self {
            PkgSuccess::Installed { pkg, dry_run } => {
                let verb = if *dry_run { "would have installed" } else { "installed" };
                format!("{} {}", verb, pkg.version)
            }
            PkgSuccess::Updated {
                old_pkg,
                new_pkg,
                dry_run,
            } => {
                let verb = if *dry_run { "would have updated" } else { "updated" };
                let mut message = format!("{} {} to {}", verb, old_pkg.version, new_pkg.version);
                if old_pkg.slug != new_pkg.slug {
                    message.push_str(&format!(" with new slug '{}'", new_pkg.slug));
                }
                if old_pkg.options != new_pkg.options {
                    let old = old_pkg.to_defn().strategies.describe();
                    let changed: Vec<String> = new_pkg
                        .to_defn()
                        .strategies
                        .describe()
                        .into_iter()
                        .filter(|s| !old.contains(s))
                        .collect();
                    message.push_str(" with new strategies: ");
                    message.push_str(&changed.join("; "));
                }
                message
            }
            PkgSuccess::Removed { .. } => "removed".to_string(),
        }
    }
}

/// Transport-facing view of a single result.
#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addon: Option<Pkg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_addon: Option<Pkg>,
    pub message: String,
}

impl From<&PkgResult<PkgSuccess>> for ResultView {
    fn from(result: &PkgResult<PkgSuccess>) -> Self {
        match result {
            Ok(success) => {
                let (addon, old_addon) = match success {
                    PkgSuccess::Installed { pkg, .. } => (Some(pkg.clone()), None),
                    PkgSuccess::Updated {
                        old_pkg, new_pkg, ..
                    } => (Some(new_pkg.clone()), Some(old_pkg.clone())),
                    PkgSuccess::Removed { old_pkg } => (None, Some(old_pkg.clone())),
                };
                ResultView {
                    status: ResultStatus::Success,
                    addon,
                    old_addon,
                    message: success.message(),
                }
            }
            Err(err) => ResultView::from_error(err),
        }
    }
}

impl From<&PkgResult<Pkg>> for ResultView {
    fn from(result: &PkgResult<Pkg>) -> Self {
        match result {
            Ok(pkg) => ResultView {
                status: ResultStatus::Success,
                addon: Some(pkg.clone()),
                old_addon: None,
                message: String::new(),
            },
            Err(err) => ResultView::from_error(err),
        }
    }
}

impl ResultView {
    fn from_error(err: &PkgError) -> Self {
        ResultView {
            status: err.status(),
            addon: None,
            old_addon: None,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::sample_pkg;

    #[test]
    fn test_failure_messages() {
        assert_eq!(PkgError::UpToDate { pinned: true }.to_string(), "package is pinned");
        assert_eq!(
            PkgError::UpToDate { pinned: false }.to_string(),
            "package is up to date"
        );
        assert_eq!(
            PkgError::FilesUnavailable(None).to_string(),
            "no files are available for download"
        );
        assert_eq!(
            PkgError::FilesUnavailable(Some("release not found".into())).to_string(),
            "release not found"
        );
        assert_eq!(
            PkgError::StrategiesUnsupported(
                [Strategy::AnyFlavour, Strategy::AnyReleaseType].into_iter().collect()
            )
            .to_string(),
            "strategies are not valid for source: any_flavour, any_release_type"
        );
        assert_eq!(
            PkgError::ConflictsWithUnreconciled(
                ["Bar".to_string(), "Foo".to_string()].into_iter().collect()
            )
            .to_string(),
            "package folders conflict with 'Bar', 'Foo'"
        );
        assert_eq!(
            PkgError::Internal("boom".into()).to_string(),
            "internal error: \"boom\""
        );
    }

    #[test]
    fn test_conflicts_with_installed_message() {
        let one = PkgError::ConflictsWithInstalled(vec![sample_pkg("wowi", "1", "1.0")]);
        assert_eq!(
            one.to_string(),
            "package folders conflict with installed package 1 (wowi:1)"
        );
        let two = PkgError::ConflictsWithInstalled(vec![
            sample_pkg("wowi", "1", "1.0"),
            sample_pkg("github", "a/b", "2.0"),
        ]);
        assert_eq!(
            two.to_string(),
            "package folders conflict with installed packages 1 (wowi:1), a/b (github:a/b)"
        );
    }

    #[test]
    fn test_defn_results_dedupe_and_reorder() {
        let a = Defn::new("wowi", "1");
        let b = Defn::new("wowi", "2");
        let c = Defn::new("github", "x/y");

        let mut results: DefnResults<()> = DefnResults::new();
        results.insert(a.clone(), Err(PkgError::NotInstalled));
        results.insert(b.clone(), Ok(()));
        results.insert(c.clone(), Ok(()));
        results.insert(a.clone(), Ok(()));
        assert_eq!(results.len(), 3);
        assert_eq!(results.get(&a), Some(&Ok(())));

        let reordered = results.reordered(&[c.clone(), a.clone(), Defn::new("wowi", "9")]);
        let keys: Vec<&Defn> = reordered.keys().collect();
        assert_eq!(keys, vec![&c, &a, &b]);
        assert!(reordered.contains(&b));
        assert_eq!(reordered.get(&b), Some(&Ok(())));
    }

    #[test]
    fn test_status() {
        assert_eq!(PkgError::Nonexistent.status(), ResultStatus::Failure);
        assert_eq!(PkgError::internal("x").status(), ResultStatus::Error);
    }

    #[test]
    fn test_updated_message() {
        let old_pkg = sample_pkg("github", "Foo", "1.0");
        let mut new_pkg = sample_pkg("github", "Foo", "1.1");
        new_pkg.slug = "foo-renamed".into();
        new_pkg.options.any_release_type = true;
        let success = PkgSuccess::Updated {
            old_pkg,
            new_pkg,
            dry_run: false,
        };
        assert_eq!(
            success.message(),
            "updated 1.0 to 1.1 with new slug 'foo-renamed' with new strategies: any_release_type=true"
        );
    }

    #[test]
    fn test_result_view() {
        let result: PkgResult<PkgSuccess> = Ok(PkgSuccess::Removed {
            old_pkg: sample_pkg("wowi", "1", "1.0"),
        });
        let view = ResultView::from(&result);
        assert_eq!(view.status, ResultStatus::Success);
        assert_eq!(view.message, "removed");
        assert!(view.addon.is_none());

        let failed: PkgResult<PkgSuccess> = Err(PkgError::NotInstalled);
        let json = serde_json::to_value(ResultView::from(&failed)).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["message"], "package is not installed");
        assert!(json.get("addon").is_none());
    }
}
