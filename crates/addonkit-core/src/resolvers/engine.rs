//! Resolution engine: definitions in, one result per definition out.

use super::{DynResolver, Resolvers};
use crate::models::{Catalogue, Defn, Pkg};
use crate::results::{DefnResults, PkgError, PkgResult};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};
use url::Url;

impl Resolvers {
    /// Resolve `defns` into packages.
    ///
    /// Duplicates are resolved once. Every input definition is a key of the
    /// returned map. Wildcard definitions are keyed as given, not by their
    /// inferred source. Resolver panics become internal errors for that
    /// definition only.
    pub async fn resolve(
        &self,
        defns: &[Defn],
        catalogue: Option<&Catalogue>,
    ) -> DefnResults<Pkg> {
        let mut seen = HashSet::new();
        let unique: Vec<&Defn> = defns.iter().filter(|d| seen.insert(*d)).collect();

        let mut results = DefnResults::new();
        let mut dispatch: Vec<(&Defn, Defn, &DynResolver)> = Vec::new();

        for &original in &unique {
            let target = if original.is_wildcard() {
                match self.infer_source(original) {
                    Some(target) => target,
                    None => {
                        results.insert(original.clone(), Err(PkgError::SourceInvalid));
                        continue;
                    }
                }
            } else {
                original.clone()
            };

            let Some(resolver) = self.get(&target.source) else {
                results.insert(original.clone(), Err(PkgError::SourceInvalid));
                continue;
            };

            let unsupported = resolver
                .metadata()
                .unsupported_strategies(&target.strategies.filled());
            if !unsupported.is_empty() {
                results.insert(
                    original.clone(),
                    Err(PkgError::StrategiesUnsupported(unsupported)),
                );
                continue;
            }

            dispatch.push((original, target, resolver));
        }

        debug!(
            "Dispatching {} of {} definitions to resolvers",
            dispatch.len(),
            defns.len()
        );

        let pending = dispatch.iter().map(|(_, target, resolver)| {
            let hint = catalogue.and_then(|c| {
                c.get(&target.source, target.id.as_deref().unwrap_or(&target.alias))
            });
            AssertUnwindSafe(resolver.resolve_one(target, hint)).catch_unwind()
        });
        let outcomes = join_all(pending).await;

        for ((original, target, _), outcome) in dispatch.iter().zip(outcomes) {
            let result: PkgResult<Pkg> = outcome.unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                warn!("Resolver for {} panicked: {}", target, message);
                Err(PkgError::Internal(message))
            });
            if let Err(PkgError::Internal(cause)) = &result {
                warn!("Internal error resolving {}: {}", target, cause);
            }
            results.insert((*original).clone(), result);
        }

        // Keep input order.
        unique
            .into_iter()
            .map(|defn| {
                let result = results
                    .get(defn)
                    .cloned()
                    .unwrap_or_else(|| Err(PkgError::internal("definition was not resolved")));
                (defn.clone(), result)
            })
            .collect()
    }

    /// Rewrite a wildcard definition with the first source whose URL
    /// extractor accepts its alias.
    fn infer_source(&self, defn: &Defn) -> Option<Defn> {
        let url = Url::parse(&defn.alias).ok()?;
        self.iter().find_map(|resolver| {
            resolver.alias_from_url(&url).map(|alias| {
                Defn::new(resolver.metadata().id, alias).with_strategies(defn.strategies.clone())
            })
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "resolver panicked".to_string()
    }
}
