//! Reconciliation methods on AddonkitApi.

use crate::error::Result;
use crate::manager::EquivalentCandidates;
use crate::matchers::{Heuristic, Reconciliation};
use crate::models::Pkg;
use crate::AddonkitApi;

impl AddonkitApi {
    /// Match the profile's unregistered folders to packages.
    pub async fn reconcile(&self, profile: &str, heuristic: Heuristic) -> Result<Reconciliation> {
        self.queue
            .submit(profile, move |manager| async move {
                manager.reconcile(heuristic).await
            })
            .await
    }

    /// Packages from other sources matching the folders of `pkgs`.
    pub async fn find_equivalent_candidates(
        &self,
        profile: &str,
        pkgs: Vec<Pkg>,
    ) -> Result<Vec<EquivalentCandidates>> {
        self.queue
            .submit(profile, move |manager| async move {
                manager.find_equivalent_candidates(&pkgs).await
            })
            .await
    }

    /// [`AddonkitApi::find_equivalent_candidates`] over every installed
    /// package, leaving out packages without alternatives.
    pub async fn get_reconcile_installed_candidates(
        &self,
        profile: &str,
    ) -> Result<Vec<EquivalentCandidates>> {
        self.queue
            .submit(profile, |manager| async move {
                let installed = manager.list_installed()?;
                let mut candidates = manager.find_equivalent_candidates(&installed).await?;
                candidates.retain(|c| !c.candidates.is_empty());
                Ok(candidates)
            })
            .await
    }
}
