//! Shared HTTP client with rate limiting awareness.
//!
//! One instance is created per process and shared by every resolver, the
//! catalogue and the device authorization flow. It tracks the
//! `X-RateLimit-*` headers GitHub returns and backs off when the remaining
//! budget runs low.

use crate::config::NetworkConfig;
use crate::{AddonkitError, Result};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Rate limit state extracted from response headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    /// Unix timestamp when the budget resets.
    pub reset: Option<u64>,
}

impl RateLimitState {
    /// Below 10% of the budget.
    pub fn should_throttle(&self) -> bool {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => {
                let threshold = (limit as f64 * 0.1) as u64;
                remaining < threshold.max(1)
            }
            _ => false,
        }
    }

    pub fn time_until_reset(&self) -> Option<Duration> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        self.reset
            .filter(|&reset| reset > now)
            .map(|reset| Duration::from_secs(reset - now))
    }
}

/// HTTP client shared across the process.
pub struct HttpClient {
    client: Client,
    rate_limit_remaining: AtomicI64,
    rate_limit_limit: AtomicU64,
    rate_limit_reset: AtomicU64,
    throttle_delay: Duration,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| AddonkitError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(e),
            })?;

        Ok(Self {
            client,
            rate_limit_remaining: AtomicI64::new(-1),
            rate_limit_limit: AtomicU64::new(0),
            rate_limit_reset: AtomicU64::new(0),
            throttle_delay: Duration::from_millis(500),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        let remaining = self.rate_limit_remaining.load(Ordering::SeqCst);
        let limit = self.rate_limit_limit.load(Ordering::SeqCst);
        let reset = self.rate_limit_reset.load(Ordering::SeqCst);
        RateLimitState {
            remaining: u64::try_from(remaining).ok(),
            limit: (limit > 0).then_some(limit),
            reset: (reset > 0).then_some(reset),
        }
    }

    /// GET with extra headers. Non-success statuses other than 429 are
    /// returned to the caller, which decides what a 404 means.
    pub async fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Response> {
        let mut request = self.client.get(url);
        for (key, value) in headers {
            request = request.header(*key, value.as_str());
        }
        self.send("GET", url, request).await
    }

    /// POST an URL-encoded form, asking for a JSON response.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Response> {
        let request = self
            .client
            .post(url)
            .header(header::ACCEPT, "application/json")
            .form(form);
        self.send("POST", url, request).await
    }

    /// Check if an HTTP status code indicates a retryable error.
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
    }

    /// Turn a non-success response into an error.
    pub fn error_for_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(AddonkitError::Network {
            message: format!("{} returned {}", response.url(), status),
            source: None,
        })
    }

    // Internal methods

    async fn send(&self, method: &str, url: &str, request: RequestBuilder) -> Result<Response> {
        self.maybe_throttle().await;
        debug!("{} {}", method, url);

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AddonkitError::Timeout(NetworkConfig::REQUEST_TIMEOUT)
            } else {
                AddonkitError::Network {
                    message: format!("{} {} failed: {}", method, url, e),
                    source: Some(e),
                }
            }
        })?;

        self.update_rate_limits(&response);
        self.check_rate_limited(response, url)
    }

    async fn maybe_throttle(&self) {
        let state = self.rate_limit_state();
        if state.should_throttle() {
            warn!(
                "Rate limit approaching (remaining: {:?}/{:?}), throttling for {:?}",
                state.remaining, state.limit, self.throttle_delay
            );
            tokio::time::sleep(self.throttle_delay).await;
        }
    }

    fn update_rate_limits(&self, response: &Response) {
        let header_value = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };

        if let Some(num) = header_value("X-RateLimit-Remaining").and_then(|v| v.parse().ok()) {
            self.rate_limit_remaining.store(num, Ordering::SeqCst);
        }
        if let Some(num) = header_value("X-RateLimit-Limit").and_then(|v| v.parse().ok()) {
            self.rate_limit_limit.store(num, Ordering::SeqCst);
        }
        if let Some(num) = header_value("X-RateLimit-Reset").and_then(|v| v.parse().ok()) {
            self.rate_limit_reset.store(num, Ordering::SeqCst);
        }
    }

    fn check_rate_limited(&self, response: Response, url: &str) -> Result<Response> {
        if response.status() != StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        Err(AddonkitError::RateLimited {
            service: extract_domain(url),
            retry_after_secs: retry_after,
        })
    }
}

/// Extract domain from a URL.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| "unknown".to_string())
}
