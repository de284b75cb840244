use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::warn;

use crate::config::CONFIG;

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(CONFIG.http_timeout_seconds))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(should_retry_status)
                .unwrap_or(false),
            RemoteError::Transport(err) => should_retry_error(err),
            _ => false,
        }
    }
}

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

pub fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("error").and_then(|v| v.as_str()))
            .or_else(|| value.get("message").and_then(|v| v.as_str()))
            .or_else(|| value.get("detail").and_then(|v| v.as_str()))
            .map(|v| v.to_string());
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

pub fn should_retry_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

pub fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

pub async fn ensure_success(provider: &str, response: Response) -> Result<Response, RemoteError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let (message, body_summary) = summarize_error_body(&body);
    warn!(
        "{} API error: status={}, body={}",
        provider, status, body_summary
    );
    Err(RemoteError::Status {
        status: status.as_u16(),
        message: message.unwrap_or(body_summary),
    })
}
