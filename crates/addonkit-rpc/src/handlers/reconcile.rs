//! Reconciliation handlers.

use super::{parse_params, require_str_param};
use crate::server::AppState;
use crate::wrapper::{wrap_candidates, wrap_reconciliation};
use addonkit_core::{Heuristic, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct ReconcileParams {
    profile: String,
    matcher: Heuristic,
}

pub async fn reconcile(state: &AppState, params: &Value) -> Result<Value> {
    let params: ReconcileParams = parse_params(params)?;
    let reconciliation = state.api.reconcile(&params.profile, params.matcher).await?;
    wrap_reconciliation(&reconciliation)
}

pub async fn get_installed_candidates(state: &AppState, params: &Value) -> Result<Value> {
    let profile = require_str_param(params, "profile")?;
    let candidates = state.api.get_reconcile_installed_candidates(&profile).await?;
    wrap_candidates(&candidates)
}
