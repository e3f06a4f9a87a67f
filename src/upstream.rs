//! Shared HTTP client construction and upstream error classification.

use crate::config::HttpClientConfig;
use planet_dumper_common::Error;
use reqwest::{Client, Response};
use std::time::Duration;

/// Build the HTTP client shared by every upstream service.
pub fn http_client(config: &HttpClientConfig) -> Client {
    Client::builder()
        .timeout(Duration::from_millis(config.timeout_ms))
        .user_agent(concat!("planet-dumper/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client: {}", e);
            Client::new()
        })
}

/// Classify a failure to get any response from `service`.
///
/// A request that could not even be built is a local problem, not an
/// unavailable upstream.
pub fn send_error(service: &str, err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::general(format!("invalid request to {service}: {err}"))
    } else {
        Error::UpstreamUnavailable(format!("{service}: {err}"))
    }
}

/// Turn a non-success response into [`Error::UpstreamResponse`].
pub async fn check_response(service: &str, response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("{service} responded with {status}")
    } else {
        format!("{service} responded with {status}: {}", body.trim())
    };

    Err(Error::UpstreamResponse {
        status: status.as_u16(),
        message,
    })
}
