//! Add-on definitions and resolution strategies.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Source value that asks the resolution engine to infer the source from the alias.
pub const WILDCARD_SOURCE: &str = "*";

/// A resolution policy modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    AnyFlavour,
    AnyReleaseType,
    VersionEq,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::AnyFlavour => "any_flavour",
            Strategy::AnyReleaseType => "any_release_type",
            Strategy::VersionEq => "version_eq",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy options attached to a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyValues {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub any_flavour: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub any_release_type: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_eq: Option<String>,
}

impl StrategyValues {
    /// Strategies that carry a value.
    pub fn filled(&self) -> BTreeSet<Strategy> {
        let mut filled = BTreeSet::new();
        if self.any_flavour {
            filled.insert(Strategy::AnyFlavour);
        }
        if self.any_release_type {
            filled.insert(Strategy::AnyReleaseType);
        }
        if self.version_eq.is_some() {
            filled.insert(Strategy::VersionEq);
        }
        filled
    }

    /// `strategy=value` pairs for the filled strategies.
    pub fn describe(&self) -> Vec<String> {
        self.filled()
            .into_iter()
            .map(|s| match s {
                Strategy::VersionEq => {
                    format!("{}={}", s, self.version_eq.as_deref().unwrap_or_default())
                }
                _ => format!("{}=true", s),
            })
            .collect()
    }
}

/// A request for an add-on, by source and alias.
///
/// `id` is a resolved identifier carried along when the definition was
/// derived from an installed package. It takes no part in comparisons, which
/// use `(source, alias, strategies)` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defn {
    pub source: String,
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub strategies: StrategyValues,
}

impl Defn {
    pub fn new(source: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            alias: alias.into(),
            id: None,
            strategies: StrategyValues::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyValues) -> Self {
        self.strategies = strategies;
        self
    }

    /// Pin to an exact version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.strategies.version_eq = Some(version.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.source == WILDCARD_SOURCE
    }

    fn key(&self) -> (&str, &str, &StrategyValues) {
        (&self.source, &self.alias, &self.strategies)
    }
}

impl PartialEq for Defn {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Defn {}

impl Hash for Defn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Defn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Defn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Defn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.alias)?;
        if let Some(version) = &self.strategies.version_eq {
            write!(f, "#{}", version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_does_not_affect_identity() {
        let a = Defn::new("github", "foo/bar");
        let b = Defn::new("github", "foo/bar").with_id("123");
        assert_eq!(a, b);
        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_strategies_affect_identity() {
        let a = Defn::new("github", "foo/bar");
        let b = Defn::new("github", "foo/bar").with_version("1.0");
        assert_ne!(a, b);
        assert_eq!(b.to_string(), "github:foo/bar#1.0");
    }

    #[test]
    fn test_describe_filled_strategies() {
        let values = StrategyValues {
            any_flavour: true,
            any_release_type: false,
            version_eq: Some("v2".into()),
        };
        assert_eq!(
            values.filled().into_iter().collect::<Vec<_>>(),
            vec![Strategy::AnyFlavour, Strategy::VersionEq]
        );
        assert_eq!(values.describe(), vec!["any_flavour=true", "version_eq=v2"]);
    }

    #[test]
    fn test_defn_deserialises_with_defaults() {
        let defn: Defn = serde_json::from_str(r#"{"source": "wowi", "alias": "12345"}"#).unwrap();
        assert_eq!(defn, Defn::new("wowi", "12345"));
        assert!(defn.strategies.filled().is_empty());
    }
}
