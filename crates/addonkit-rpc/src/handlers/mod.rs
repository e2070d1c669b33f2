//! JSON-RPC request handlers, split by domain.

mod config;
mod github_auth;
mod pkgs;
mod reconcile;

use crate::server::AppState;
use addonkit_core::{AddonkitError, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

const METHOD_NOT_FOUND: i32 = -32601;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data,
            }),
            id,
        }
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Deserialize the whole params object.
pub(crate) fn parse_params<T: DeserializeOwned>(params: &Value) -> Result<T> {
    serde_json::from_value(params.clone()).map_err(|e| AddonkitError::InvalidParams {
        message: e.to_string(),
    })
}

/// Extract a required string parameter or return an error.
pub(crate) fn require_str_param(params: &Value, name: &str) -> Result<String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| AddonkitError::InvalidParams {
            message: format!("Missing required parameter: {}", name),
        })
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = &request.method;
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    let response = match dispatch_method(&state, method, &params).await {
        Some(Ok(value)) => JsonRpcResponse::success(id, value),
        Some(Err(e)) => {
            error!("RPC error for {}: {}", method, e);
            JsonRpcResponse::error(id, e.to_rpc_error_code(), e.to_string(), e.rpc_error_data())
        }
        None => {
            warn!("Method not found: {}", method);
            JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
                None,
            )
        }
    };
    (StatusCode::OK, Json(response))
}

// ============================================================================
// Method dispatcher
// ============================================================================

/// Dispatch a method call to the appropriate domain handler. `None` when the
/// method does not exist.
async fn dispatch_method(state: &AppState, method: &str, params: &Value) -> Option<Result<Value>> {
    let result = match method {
        // Configuration
        "config/write_profile" => config::write_profile(state, params).await,
        "config/read_profile" => config::read_profile(state, params).await,
        "config/delete_profile" => config::delete_profile(state, params).await,
        "config/list_profiles" => config::list_profiles(state, params).await,
        "config/update_global" => config::update_global(state, params).await,
        "config/read_global" => config::read_global(state, params).await,
        "sources/list" => config::list_sources(state, params).await,

        // Packages
        "list" => pkgs::list(state, params).await,
        "resolve" => pkgs::resolve(state, params).await,
        "install" => pkgs::install(state, params).await,
        "update" => pkgs::update(state, params).await,
        "remove" => pkgs::remove(state, params).await,
        "pin" => pkgs::pin(state, params).await,
        "get_changelog" => pkgs::get_changelog(state, params).await,

        // Reconciliation
        "reconcile" => reconcile::reconcile(state, params).await,
        "get_reconcile_installed_candidates" => {
            reconcile::get_installed_candidates(state, params).await
        }

        // GitHub device authorization
        "github_auth/initiate" => github_auth::initiate(state, params).await,
        "github_auth/await" => github_auth::await_completion(state, params).await,
        "github_auth/cancel" => github_auth::cancel(state, params).await,

        _ => return None,
    };
    Some(result)
}
