//! GitHub device authorization handlers.

use crate::server::AppState;
use crate::wrapper::wrap_device_codes;
use addonkit_core::Result;
use serde_json::{json, Value};

pub async fn initiate(state: &AppState, _params: &Value) -> Result<Value> {
    let codes = state.api.initiate_github_auth_flow().await?;
    Ok(wrap_device_codes(&codes))
}

pub async fn await_completion(state: &AppState, _params: &Value) -> Result<Value> {
    let status = state.api.await_github_auth_completion().await;
    Ok(json!({"status": status}))
}

pub async fn cancel(state: &AppState, _params: &Value) -> Result<Value> {
    state.api.cancel_github_auth_flow();
    Ok(Value::Null)
}
