//! Package handlers.

use super::parse_params;
use crate::server::AppState;
use crate::wrapper::wrap_results;
use addonkit_core::{Defn, Result};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
struct ProfileParams {
    profile: String,
}

#[derive(Deserialize)]
struct DefnsParams {
    profile: String,
    defns: Vec<Defn>,
}

#[derive(Deserialize)]
struct ResolveParams {
    profile: String,
    defns: Vec<Defn>,
    #[serde(default)]
    with_deps: bool,
}

#[derive(Deserialize)]
struct InstallParams {
    profile: String,
    defns: Vec<Defn>,
    #[serde(default)]
    replace: bool,
}

#[derive(Deserialize)]
struct UpdateParams {
    profile: String,
    #[serde(default)]
    defns: Vec<Defn>,
    #[serde(default)]
    retain_strategy: bool,
}

#[derive(Deserialize)]
struct RemoveParams {
    profile: String,
    defns: Vec<Defn>,
    #[serde(default)]
    keep_folders: bool,
}

#[derive(Deserialize)]
struct ChangelogParams {
    profile: String,
    source: String,
    changelog_url: String,
}

pub async fn list(state: &AppState, params: &Value) -> Result<Value> {
    let params: ProfileParams = parse_params(params)?;
    Ok(serde_json::to_value(state.api.list_installed(&params.profile).await?)?)
}

pub async fn resolve(state: &AppState, params: &Value) -> Result<Value> {
    let params: ResolveParams = parse_params(params)?;
    let results = state
        .api
        .resolve(&params.profile, params.defns, params.with_deps)
        .await?;
    wrap_results(&results)
}

pub async fn install(state: &AppState, params: &Value) -> Result<Value> {
    let params: InstallParams = parse_params(params)?;
    let results = state
        .api
        .install(&params.profile, params.defns, params.replace)
        .await?;
    wrap_results(&results)
}

pub async fn update(state: &AppState, params: &Value) -> Result<Value> {
    let params: UpdateParams = parse_params(params)?;
    let results = state
        .api
        .update(&params.profile, params.defns, params.retain_strategy)
        .await?;
    wrap_results(&results)
}

pub async fn remove(state: &AppState, params: &Value) -> Result<Value> {
    let params: RemoveParams = parse_params(params)?;
    let results = state
        .api
        .remove(&params.profile, params.defns, params.keep_folders)
        .await?;
    wrap_results(&results)
}

pub async fn pin(state: &AppState, params: &Value) -> Result<Value> {
    let params: DefnsParams = parse_params(params)?;
    let results = state.api.pin(&params.profile, params.defns).await?;
    wrap_results(&results)
}

pub async fn get_changelog(state: &AppState, params: &Value) -> Result<Value> {
    let params: ChangelogParams = parse_params(params)?;
    let changelog = state
        .api
        .get_changelog(&params.profile, &params.source, &params.changelog_url)
        .await?;
    Ok(json!(changelog))
}
