//! GitHub device authorization methods on AddonkitApi.

use crate::auth::{AuthFlowStatus, DeviceCodes};
use crate::error::Result;
use crate::AddonkitApi;

impl AddonkitApi {
    /// Start the device flow, or return the codes of the one in progress.
    pub async fn initiate_github_auth_flow(&self) -> Result<DeviceCodes> {
        self.auth.initiate().await
    }

    /// Wait for the device flow to finish. The token is stored and every
    /// profile unloaded on success.
    pub async fn await_github_auth_completion(&self) -> AuthFlowStatus {
        self.auth.await_completion().await
    }

    pub fn cancel_github_auth_flow(&self) -> bool {
        self.auth.cancel()
    }
}
