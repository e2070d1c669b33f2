//! Integration tests for the addonkit-rpc JSON-RPC server.
//!
//! Each test spawns the real binary against a throwaway config and temp
//! directory and talks to it over HTTP.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

/// Create config and temp directories, with a fresh empty catalogue snapshot
/// so the server never needs the network.
fn create_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let cache_dir = temp_dir.path().join("temp/cache");
    std::fs::create_dir_all(temp_dir.path().join("config")).unwrap();
    std::fs::create_dir_all(&cache_dir).unwrap();

    let snapshot = json!({
        "last_fetched": chrono::Utc::now().to_rfc3339(),
        "ttl": 3600,
        "catalogue": {"version": 7, "entries": []},
    });
    std::fs::write(cache_dir.join("catalogue.json"), snapshot.to_string()).unwrap();
    temp_dir
}

/// Make an RPC call to the server.
async fn rpc_call(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let json = rpc_call_raw(port, method, params).await?;
    if let Some(error) = json.get("error") {
        return Err(error.to_string());
    }
    Ok(json.get("result").cloned().unwrap_or(Value::Null))
}

/// Make an RPC call and return the full JSON-RPC payload.
async fn rpc_call_raw(port: u16, method: &str, params: Value) -> Result<Value, String> {
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://127.0.0.1:{}/rpc", port))
        .json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| e.to_string())?;

    response.json::<Value>().await.map_err(|e| e.to_string())
}

fn error_code(payload: &Value) -> Option<i64> {
    payload.pointer("/error/code").and_then(|v| v.as_i64())
}

/// Check health endpoint.
async fn check_health(port: u16) -> bool {
    let client = reqwest::Client::new();
    if let Ok(response) = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        if let Ok(json) = response.json::<Value>().await {
            return json.get("status").and_then(|v| v.as_str()) == Some("ok");
        }
    }
    false
}

/// Wait for server to be ready.
async fn wait_for_server(port: u16, timeout_secs: u64) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(timeout_secs) {
        if check_health(port).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

struct RpcServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl RpcServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Start the RPC binary and wait until `/health` is ready.
async fn start_rpc_server(root: &Path) -> Result<RpcServerHandle, String> {
    let binary = std::env::var("CARGO_BIN_EXE_addonkit-rpc")
        .map(PathBuf::from)
        .map_err(|_| "CARGO_BIN_EXE_addonkit-rpc not set".to_string())?;

    let mut child = tokio::process::Command::new(&binary)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--config-dir")
        .arg(root.join("config"))
        .env("ADDONKIT_TEMP_DIR", root.join("temp"))
        .env_remove("ADDONKIT_GITHUB_ACCESS_TOKEN")
        .env_remove("ADDONKIT_CFCORE_ACCESS_TOKEN")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn addonkit-rpc: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port: Option<u16> = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("RPC_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid RPC_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read addonkit-rpc stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port =
        discovered_port.ok_or_else(|| "RPC_PORT line not emitted by addonkit-rpc".to_string())?;
    if !wait_for_server(port, 15).await {
        return Err(format!("addonkit-rpc failed health check on port {port}"));
    }

    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(RpcServerHandle {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

async fn start_with_profile(temp: &TempDir, profile: &str) -> RpcServerHandle {
    let server = start_rpc_server(temp.path()).await.unwrap();
    let addon_dir = temp.path().join(format!("{profile}/Interface/AddOns"));
    std::fs::create_dir_all(&addon_dir).unwrap();
    rpc_call(
        server.port,
        "config/write_profile",
        json!({"profile": profile, "addon_dir": addon_dir, "game_flavour": "retail"}),
    )
    .await
    .unwrap();
    server
}

// =============================================================================
// Server
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let temp = create_test_env();
    let server = start_rpc_server(temp.path()).await.unwrap();
    assert!(check_health(server.port).await);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_method() {
    let temp = create_test_env();
    let server = start_rpc_server(temp.path()).await.unwrap();

    let payload = rpc_call_raw(server.port, "no/such_method", json!({}))
        .await
        .unwrap();
    assert_eq!(error_code(&payload), Some(-32601));
    assert_eq!(payload["id"], json!(1));
    server.stop().await;
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_profile_lifecycle() {
    let temp = create_test_env();
    let server = start_with_profile(&temp, "main").await;

    let profiles = rpc_call(server.port, "config/list_profiles", json!({}))
        .await
        .unwrap();
    assert_eq!(profiles, json!(["main"]));

    let config = rpc_call(server.port, "config/read_profile", json!({"profile": "main"}))
        .await
        .unwrap();
    assert_eq!(config["game_flavour"], json!("retail"));

    rpc_call(server.port, "config/delete_profile", json!({"profile": "main"}))
        .await
        .unwrap();
    let payload = rpc_call_raw(server.port, "config/read_profile", json!({"profile": "main"}))
        .await
        .unwrap();
    assert_eq!(error_code(&payload), Some(-32002));
    server.stop().await;
}

#[tokio::test]
async fn test_global_config_masks_tokens() {
    let temp = create_test_env();
    let server = start_rpc_server(temp.path()).await.unwrap();

    let config = rpc_call(
        server.port,
        "config/update_global",
        json!({"auto_update_check": false, "access_tokens": {"github": "gho_secret"}}),
    )
    .await
    .unwrap();
    assert_eq!(config["auto_update_check"], json!(false));
    assert_ne!(config["access_tokens"]["github"], json!("gho_secret"));

    let config = rpc_call(server.port, "config/read_global", json!({}))
        .await
        .unwrap();
    assert!(!config.to_string().contains("gho_secret"));
    server.stop().await;
}

// =============================================================================
// Packages
// =============================================================================

#[tokio::test]
async fn test_list_empty_profile() {
    let temp = create_test_env();
    let server = start_with_profile(&temp, "main").await;

    let installed = rpc_call(server.port, "list", json!({"profile": "main"}))
        .await
        .unwrap();
    assert_eq!(installed, json!([]));
    server.stop().await;
}

#[tokio::test]
async fn test_list_sources() {
    let temp = create_test_env();
    let server = start_with_profile(&temp, "main").await;

    let sources = rpc_call(server.port, "sources/list", json!({"profile": "main"}))
        .await
        .unwrap();
    assert!(sources.get("wowi").is_some());
    assert!(sources.get("github").is_some());
    assert!(sources.get("tukui").is_some());
    assert!(sources.get("curse").is_none());
    server.stop().await;
}

#[tokio::test]
async fn test_resolve_unknown_source_fails_per_defn() {
    let temp = create_test_env();
    let server = start_with_profile(&temp, "main").await;

    let results = rpc_call(
        server.port,
        "resolve",
        json!({"profile": "main", "defns": [{"source": "nowhere", "alias": "x"}]}),
    )
    .await
    .unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_ne!(results[0]["status"], json!("success"));
    assert!(!results[0]["message"].as_str().unwrap().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_invalid_params() {
    let temp = create_test_env();
    let server = start_with_profile(&temp, "main").await;

    let payload = rpc_call_raw(server.port, "install", json!({"profile": "main"}))
        .await
        .unwrap();
    assert_eq!(error_code(&payload), Some(-32602));
    server.stop().await;
}

#[tokio::test]
async fn test_missing_profile() {
    let temp = create_test_env();
    let server = start_rpc_server(temp.path()).await.unwrap();

    let payload = rpc_call_raw(server.port, "list", json!({"profile": "ghost"}))
        .await
        .unwrap();
    assert_eq!(error_code(&payload), Some(-32002));
    server.stop().await;
}

#[tokio::test]
async fn test_reconcile_empty_addon_dir() {
    let temp = create_test_env();
    let server = start_with_profile(&temp, "main").await;

    let groups = rpc_call(
        server.port,
        "reconcile",
        json!({"profile": "main", "matcher": "toc_keys"}),
    )
    .await
    .unwrap();
    assert_eq!(groups, json!([]));
    server.stop().await;
}

// =============================================================================
// GitHub authorization
// =============================================================================

#[tokio::test]
async fn test_await_auth_without_flow() {
    let temp = create_test_env();
    let server = start_rpc_server(temp.path()).await.unwrap();

    let result = rpc_call(server.port, "github_auth/await", json!({}))
        .await
        .unwrap();
    assert_eq!(result, json!({"status": "success"}));

    let result = rpc_call(server.port, "github_auth/cancel", json!({}))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);
    server.stop().await;
}
