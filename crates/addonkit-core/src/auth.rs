//! Device authorization.
//!
//! [`DeviceAuthProvider`] speaks to an OAuth device-flow server and
//! [`DeviceAuthFlow`] runs at most one flow for the whole process. The
//! flow's codes and background task are cleared whenever the task ends,
//! whether it succeeded, failed or was cancelled.

use crate::config::AuthConfig;
use crate::context::AppContext;
use crate::error::{AddonkitError, Result};
use crate::locks::LockKey;
use crate::network::HttpClient;
use crate::queue::ManagerRegistry;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Codes handed out by the device-code endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCodes {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    /// Minimum seconds between polls.
    pub interval: u64,
}

#[async_trait]
pub trait DeviceAuthProvider: Send + Sync {
    async fn get_codes(&self) -> Result<DeviceCodes>;

    /// Poll until the user approves the codes, returning the access token.
    async fn poll(&self, codes: &DeviceCodes) -> Result<String>;
}

// ========================================
// GitHub
// ========================================

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum PollStep {
    Token(String),
    Pending,
    SlowDown,
    Failed(String),
}

impl AccessTokenResponse {
    fn step(self) -> PollStep {
        match (self.access_token, self.error.as_deref()) {
            (Some(token), None) => PollStep::Token(token),
            (_, Some("authorization_pending")) => PollStep::Pending,
            (_, Some("slow_down")) => PollStep::SlowDown,
            (_, Some(error)) => PollStep::Failed(
                self.error_description
                    .unwrap_or_else(|| error.to_string()),
            ),
            (None, None) => PollStep::Failed("response carried no access token".into()),
        }
    }
}

/// GitHub OAuth device flow.
pub struct GithubDeviceAuth {
    http: Arc<HttpClient>,
    client_id: String,
}

impl GithubDeviceAuth {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self {
            http,
            client_id: AuthConfig::GITHUB_CLIENT_ID.to_string(),
        }
    }
}

#[async_trait]
impl DeviceAuthProvider for GithubDeviceAuth {
    async fn get_codes(&self) -> Result<DeviceCodes> {
        let response = self
            .http
            .post_form(
                AuthConfig::GITHUB_DEVICE_CODE_URL,
                &[("client_id", self.client_id.as_str())],
            )
            .await?;
        Ok(HttpClient::error_for_status(response)?.json().await?)
    }

    async fn poll(&self, codes: &DeviceCodes) -> Result<String> {
        let mut interval = Duration::from_secs(codes.interval);
        loop {
            tokio::time::sleep(interval).await;
            let response = self
                .http
                .post_form(
                    AuthConfig::GITHUB_ACCESS_TOKEN_URL,
                    &[
                        ("client_id", self.client_id.as_str()),
                        ("device_code", codes.device_code.as_str()),
                        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ],
                )
                .await?;
            let body: AccessTokenResponse = HttpClient::error_for_status(response)?.json().await?;
            match body.step() {
                PollStep::Token(token) => return Ok(token),
                PollStep::Pending => debug!("Authorization pending"),
                PollStep::SlowDown => {
                    interval += AuthConfig::SLOW_DOWN_INCREMENT;
                    debug!("Slowing down polling to {:?}", interval);
                }
                PollStep::Failed(message) => return Err(AddonkitError::AuthFailed { message }),
            }
        }
    }
}

// ========================================
// Single-flight coordinator
// ========================================

/// How a flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFlowStatus {
    Success,
    Failure,
}

struct ActiveFlow {
    generation: u64,
    codes: DeviceCodes,
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<AuthFlowStatus>>,
}

#[derive(Default)]
struct FlowState {
    active: Option<ActiveFlow>,
    generation: u64,
    last: Option<AuthFlowStatus>,
}

pub struct DeviceAuthFlow {
    provider: Arc<dyn DeviceAuthProvider>,
    ctx: Arc<AppContext>,
    registry: Arc<ManagerRegistry>,
    state: Arc<Mutex<FlowState>>,
}

fn lock_state(state: &Mutex<FlowState>) -> MutexGuard<'_, FlowState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeviceAuthFlow {
    pub fn new(
        provider: Arc<dyn DeviceAuthProvider>,
        ctx: Arc<AppContext>,
        registry: Arc<ManagerRegistry>,
    ) -> Self {
        Self {
            provider,
            ctx,
            registry,
            state: Arc::new(Mutex::new(FlowState::default())),
        }
    }

    pub fn is_active(&self) -> bool {
        lock_state(&self.state).active.is_some()
    }

    /// Start a flow, or return the codes of the one already running.
    pub async fn initiate(&self) -> Result<DeviceCodes> {
        let _guard = self.ctx.locks.acquire(LockKey::InitiateAuthFlow).await;
        if let Some(active) = &lock_state(&self.state).active {
            return Ok(active.codes.clone());
        }

        let codes = self.provider.get_codes().await?;
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let generation = {
            let mut state = lock_state(&self.state);
            state.generation += 1;
            state.active = Some(ActiveFlow {
                generation: state.generation,
                codes: codes.clone(),
                cancel: cancel.clone(),
                outcome: outcome_rx,
            });
            state.generation
        };
        info!("Started device authorization flow");

        let provider = self.provider.clone();
        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        let state = self.state.clone();
        let task_codes = codes.clone();
        tokio::spawn(async move {
            let completion = AssertUnwindSafe(complete_flow(provider, ctx, registry, task_codes))
                .catch_unwind();
            let status = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Device authorization flow cancelled");
                    AuthFlowStatus::Failure
                }
                result = completion => match result {
                    Ok(Ok(())) => AuthFlowStatus::Success,
                    Ok(Err(e)) => {
                        warn!("Device authorization failed: {}", e);
                        AuthFlowStatus::Failure
                    }
                    Err(_) => {
                        warn!("Device authorization task panicked");
                        AuthFlowStatus::Failure
                    }
                },
            };

            {
                let mut state = lock_state(&state);
                if state
                    .active
                    .as_ref()
                    .is_some_and(|a| a.generation == generation)
                {
                    state.active = None;
                }
                state.last = Some(status);
            }
            let _ = outcome_tx.send(Some(status));
        });

        Ok(codes)
    }

    /// Wait for the running flow to end.
    ///
    /// With no flow running this reports how the last one ended, or success
    /// if none ever ran.
    pub async fn await_completion(&self) -> AuthFlowStatus {
        let mut outcome = {
            let state = lock_state(&self.state);
            match &state.active {
                Some(active) => active.outcome.clone(),
                None => return state.last.unwrap_or(AuthFlowStatus::Success),
            }
        };
        let status = match outcome.wait_for(Option::is_some).await {
            Ok(status) => (*status).unwrap_or(AuthFlowStatus::Failure),
            Err(_) => AuthFlowStatus::Failure,
        };
        status
    }

    /// Cancel the running flow. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        match &lock_state(&self.state).active {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

async fn complete_flow(
    provider: Arc<dyn DeviceAuthProvider>,
    ctx: Arc<AppContext>,
    registry: Arc<ManagerRegistry>,
    codes: DeviceCodes,
) -> Result<()> {
    let token = provider.poll(&codes).await?;
    ctx.update_global_config(|config| config.access_tokens.github = Some(token))
        .await?;
    registry.unload_all().await;
    info!("Device authorization complete");
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeProvider;
    use super::*;
    use crate::context::test_support::test_context;
    use crate::manager::PkgManager;
    use crate::models::Catalogue;
    use crate::queue::ProfileLoader;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct NoProfiles;

    #[async_trait]
    impl ProfileLoader for NoProfiles {
        async fn load(&self, profile: &str) -> Result<PkgManager> {
            Err(AddonkitError::ProfileNotFound {
                profile: profile.to_string(),
            })
        }
    }

    fn flow(temp: &TempDir, provider: Arc<FakeProvider>) -> (DeviceAuthFlow, Arc<AppContext>) {
        let ctx = test_context(temp.path(), Catalogue::default());
        let registry = Arc::new(ManagerRegistry::new(Arc::new(NoProfiles), ctx.locks.clone()));
        (DeviceAuthFlow::new(provider, ctx.clone(), registry), ctx)
    }

    fn response(json: &str) -> PollStep {
        serde_json::from_str::<AccessTokenResponse>(json).unwrap().step()
    }

    #[test]
    fn test_access_token_responses() {
        assert_eq!(
            response(r#"{"access_token": "gho_1", "token_type": "bearer", "scope": ""}"#),
            PollStep::Token("gho_1".into())
        );
        assert_eq!(response(r#"{"error": "authorization_pending"}"#), PollStep::Pending);
        assert_eq!(response(r#"{"error": "slow_down", "interval": 10}"#), PollStep::SlowDown);
        assert_eq!(
            response(r#"{"error": "access_denied", "error_description": "denied by user"}"#),
            PollStep::Failed("denied by user".into())
        );
        assert_eq!(
            response(r#"{"error": "expired_token"}"#),
            PollStep::Failed("expired_token".into())
        );
    }

    #[tokio::test]
    async fn test_concurrent_initiates_share_one_flow() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let (flow, _) = flow(&temp, provider.clone());

        let (first, second) = tokio::join!(flow.initiate(), flow.initiate());
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(provider.code_requests.load(Ordering::SeqCst), 1);
        assert!(flow.is_active());

        assert!(flow.cancel());
        assert_eq!(flow.await_completion().await, AuthFlowStatus::Failure);
        assert!(!flow.is_active());
        assert!(!flow.cancel());

        let fresh = flow.initiate().await.unwrap();
        assert_eq!(fresh.user_code, "USER-2");
        assert_eq!(provider.code_requests.load(Ordering::SeqCst), 2);
        flow.cancel();
        flow.await_completion().await;
    }

    #[tokio::test]
    async fn test_approved_flow_stores_token() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let (flow, ctx) = flow(&temp, provider.clone());

        flow.initiate().await.unwrap();
        provider.approve("gho_approved");
        assert_eq!(flow.await_completion().await, AuthFlowStatus::Success);
        assert!(!flow.is_active());
        assert_eq!(
            ctx.global_config().await.access_tokens.github.as_deref(),
            Some("gho_approved")
        );
    }

    #[tokio::test]
    async fn test_denied_flow_reports_failure() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(FakeProvider::default());
        let (flow, ctx) = flow(&temp, provider.clone());

        flow.initiate().await.unwrap();
        provider.deny();
        assert_eq!(flow.await_completion().await, AuthFlowStatus::Failure);
        assert_eq!(flow.await_completion().await, AuthFlowStatus::Failure);
        assert!(ctx.global_config().await.access_tokens.github.is_none());
    }

    #[tokio::test]
    async fn test_await_without_flow() {
        let temp = TempDir::new().unwrap();
        let (flow, _) = flow(&temp, Arc::new(FakeProvider::default()));
        assert_eq!(flow.await_completion().await, AuthFlowStatus::Success);
    }
}
