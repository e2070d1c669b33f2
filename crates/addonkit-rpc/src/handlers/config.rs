//! Configuration and source listing handlers.

use super::{parse_params, require_str_param};
use crate::server::AppState;
use crate::wrapper::wrap_global_config;
use addonkit_core::Flavour;
use addonkit_core::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Deserialize)]
struct WriteProfileParams {
    profile: String,
    addon_dir: PathBuf,
    #[serde(default)]
    game_flavour: Option<Flavour>,
}

pub async fn write_profile(state: &AppState, params: &Value) -> Result<Value> {
    let params: WriteProfileParams = parse_params(params)?;
    let config = state
        .api
        .write_profile_config(&params.profile, params.addon_dir, params.game_flavour)
        .await?;
    Ok(serde_json::to_value(config)?)
}

pub async fn read_profile(state: &AppState, params: &Value) -> Result<Value> {
    let profile = require_str_param(params, "profile")?;
    let config = state.api.read_profile_config(&profile).await?;
    Ok(serde_json::to_value(config)?)
}

pub async fn delete_profile(state: &AppState, params: &Value) -> Result<Value> {
    let profile = require_str_param(params, "profile")?;
    state.api.delete_profile_config(&profile).await?;
    Ok(Value::Null)
}

pub async fn list_profiles(state: &AppState, _params: &Value) -> Result<Value> {
    Ok(json!(state.api.list_profiles().await?))
}

/// Fields left out keep their current value; a token set to `null` is
/// cleared.
#[derive(Deserialize, Default)]
struct TokenUpdates {
    #[serde(default, deserialize_with = "present")]
    github: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    cfcore: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    wago: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct UpdateGlobalParams {
    #[serde(default)]
    auto_update_check: Option<bool>,
    #[serde(default)]
    access_tokens: TokenUpdates,
}

pub async fn update_global(state: &AppState, params: &Value) -> Result<Value> {
    let updates: UpdateGlobalParams = parse_params(params)?;
    let config = state
        .api
        .update_global_config(move |config| {
            if let Some(auto_update_check) = updates.auto_update_check {
                config.auto_update_check = auto_update_check;
            }
            let tokens = updates.access_tokens;
            for (update, slot) in [
                (tokens.github, &mut config.access_tokens.github),
                (tokens.cfcore, &mut config.access_tokens.cfcore),
                (tokens.wago, &mut config.access_tokens.wago),
            ] {
                if let Some(value) = update {
                    *slot = value;
                }
            }
        })
        .await?;
    wrap_global_config(&config)
}

pub async fn read_global(state: &AppState, _params: &Value) -> Result<Value> {
    wrap_global_config(&state.api.read_global_config().await)
}

pub async fn list_sources(state: &AppState, params: &Value) -> Result<Value> {
    let profile = require_str_param(params, "profile")?;
    let sources = state.api.list_sources(&profile).await?;
    let by_id: serde_json::Map<String, Value> = sources
        .iter()
        .map(|s| Ok((s.id.to_string(), serde_json::to_value(s)?)))
        .collect::<Result<_>>()?;
    Ok(Value::Object(by_id))
}
