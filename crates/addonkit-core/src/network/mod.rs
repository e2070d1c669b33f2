//! Network utilities: the shared HTTP client, retries and artifact downloads.

mod client;
mod download;
mod retry;

pub use client::{extract_domain, HttpClient, RateLimitState};
pub use download::{file_url_path, Downloader};
pub use retry::{retry_async, RetryConfig};
