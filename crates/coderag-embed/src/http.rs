//! Shared HTTP client construction for embedding backends.

use std::time::Duration;

/// Create the HTTP client used by remote embedders.
///
/// Config: 30s connect timeout, `request_timeout` per request, rustls TLS,
/// `coderag/{version}` user-agent, redirect limit 10.
#[must_use]
pub fn default_client(request_timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(request_timeout)
        .user_agent(concat!("coderag/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}
