pub mod igloo;
pub mod play_by_point;

pub use igloo::IglooClient;
pub use play_by_point::PlayByPointClient;

use crate::core::{SyncConfig, SyncError, SyncSettings};
use crate::{BookingClient, LockClient};
use std::time::Duration;

// longest response body quoted in error messages
const MAX_ERROR_BODY: usize = 300;

/// Builds the lock vendor client. No network call happens until `authenticate`.
///
/// # Errors
///
/// Fails if the HTTP client cannot be constructed.
pub fn create_lock_client(
    settings: &SyncSettings,
    config: &SyncConfig,
) -> Result<Box<dyn LockClient>, SyncError> {
    let http = build_http_client(config, false)?;
    Ok(Box::new(IglooClient::new(
        http,
        config.igloo.clone(),
        settings.igloo.clone(),
    )))
}

/// Builds the booking vendor client. No network call happens until `login`.
///
/// # Errors
///
/// Fails if the HTTP client cannot be constructed.
pub fn create_booking_client(
    settings: &SyncSettings,
    config: &SyncConfig,
) -> Result<Box<dyn BookingClient>, SyncError> {
    let http = build_http_client(config, true)?;
    Ok(Box::new(PlayByPointClient::new(
        http,
        config.play_by_point.clone(),
        settings.booking.clone(),
        settings.timezone,
    )))
}

fn build_http_client(config: &SyncConfig, with_cookies: bool) -> Result<reqwest::Client, SyncError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.general.http_timeout_secs))
        .user_agent(config.play_by_point.user_agent.as_str())
        .cookie_store(with_cookies)
        .build()
        .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {e}")))
}

/// Status line plus the start of the body, for error messages.
pub(crate) async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    describe_status(status, &body)
}

pub(crate) fn describe_status(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        let shortened: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("HTTP {status}: {shortened}")
    }
}
