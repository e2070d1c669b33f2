//! Response shaping for front-end compatibility.
//!
//! Front-ends expect per-definition results as flat `{status, addon?,
//! old_addon?, message}` objects and never see raw access tokens.

use addonkit_core::auth::DeviceCodes;
use addonkit_core::{
    AddonFolder, DefnResults, EquivalentCandidates, GlobalConfig, PkgResult, Reconciliation,
    Result, ResultView,
};
use serde_json::{json, Value};

const MASKED_TOKEN: &str = "**********";

/// One result view per definition, in request order.
pub fn wrap_results<T>(results: &DefnResults<T>) -> Result<Value>
where
    for<'a> ResultView: From<&'a PkgResult<T>>,
{
    let views: Vec<ResultView> = results.iter().map(|(_, r)| ResultView::from(r)).collect();
    Ok(serde_json::to_value(views)?)
}

fn folder_view(folder: &AddonFolder) -> Value {
    json!({"name": folder.name, "version": folder.version()})
}

/// Matched groups followed by each unmatched folder on its own with no
/// matches.
pub fn wrap_reconciliation(reconciliation: &Reconciliation) -> Result<Value> {
    let mut groups = Vec::with_capacity(reconciliation.matched.len() + reconciliation.unmatched.len());
    for group in &reconciliation.matched {
        groups.push(json!({
            "folders": group.folders.iter().map(folder_view).collect::<Vec<_>>(),
            "matches": serde_json::to_value(&group.pkgs)?,
        }));
    }
    for folder in &reconciliation.unmatched {
        groups.push(json!({"folders": [folder_view(folder)], "matches": []}));
    }
    Ok(Value::Array(groups))
}

pub fn wrap_candidates(candidates: &[EquivalentCandidates]) -> Result<Value> {
    let mut wrapped = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        wrapped.push(json!({
            "installed_addon": serde_json::to_value(&candidate.installed)?,
            "alternative_addons": serde_json::to_value(&candidate.candidates)?,
        }));
    }
    Ok(Value::Array(wrapped))
}

/// The global configuration with every configured token masked.
pub fn wrap_global_config(config: &GlobalConfig) -> Result<Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(tokens) = value.get_mut("access_tokens").and_then(Value::as_object_mut) {
        for token in tokens.values_mut() {
            if !token.is_null() {
                *token = json!(MASKED_TOKEN);
            }
        }
    }
    value["config_dir"] = json!(config.config_dir);
    Ok(value)
}

/// Only what the user needs to approve the device.
pub fn wrap_device_codes(codes: &DeviceCodes) -> Value {
    json!({
        "user_code": codes.user_code,
        "verification_uri": codes.verification_uri,
    })
}
