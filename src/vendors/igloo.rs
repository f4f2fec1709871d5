use crate::core::{AccessCode, AccessCodeRequest, IglooConfig, IglooCredentials, SyncError};
use crate::LockClient;
use super::describe_status;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Igloo lock vendor client using hourly algoPINs.
pub struct IglooClient {
    http: Client,
    config: IglooConfig,
    credentials: IglooCredentials,
    access_token: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPinRequest {
    pub variance: u8,
    pub start_date: String,
    pub end_date: String,
    pub access_name: String,
}

impl HourlyPinRequest {
    #[must_use]
    pub fn from_request(request: &AccessCodeRequest) -> Self {
        Self {
            variance: 1,
            start_date: igloo_timestamp(&request.valid_from),
            end_date: igloo_timestamp(&request.valid_until),
            access_name: request.access_name.clone(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HourlyPinResponse {
    pub pin: String,
    #[serde(default)]
    pub pin_id: Option<String>,
}

/// Reads the token endpoint reply. Anything but a 2xx with a non-empty
/// `access_token` is a [`SyncError::LockAuth`].
fn parse_token_response(status: StatusCode, body: &str) -> Result<TokenResponse, SyncError> {
    if !status.is_success() {
        return Err(SyncError::LockAuth(describe_status(status, body)));
    }

    let token: TokenResponse = serde_json::from_str(body)
        .map_err(|e| SyncError::LockAuth(format!("unexpected token response: {e}")))?;

    if token.access_token.trim().is_empty() {
        return Err(SyncError::LockAuth("empty access token".to_string()));
    }
    Ok(token)
}

/// Error for a rejected PIN request. HTTP 429 is reported as a rate limit.
fn issuance_failure(access_name: &str, status: StatusCode, body: &str) -> SyncError {
    let detail = describe_status(status, body);
    let reason = if status == StatusCode::TOO_MANY_REQUESTS {
        format!("rate limited ({detail})")
    } else {
        detail
    };
    SyncError::CodeIssuance {
        label: access_name.to_string(),
        reason,
    }
}

/// ISO 8601 with the local offset, e.g. `2025-06-01T18:00:00-06:00`.
#[must_use]
pub fn igloo_timestamp(dt: &DateTime<Tz>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, false)
}

impl IglooClient {
    #[must_use]
    pub fn new(http: Client, config: IglooConfig, credentials: IglooCredentials) -> Self {
        Self {
            http,
            config,
            credentials,
            access_token: None,
        }
    }

    fn hourly_pin_url(&self, lock_id: &str) -> String {
        format!(
            "{}/igloohome/devices/{}/algopin/hourly",
            self.config.api_url.trim_end_matches('/'),
            lock_id
        )
    }
}

#[async_trait]
impl LockClient for IglooClient {
    #[instrument(skip(self), fields(client_id = %self.credentials.client_id))]
    async fn authenticate(&mut self) -> Result<(), SyncError> {
        let scope = self.config.scopes.join(" ");
        let form = [("grant_type", "client_credentials"), ("scope", scope.as_str())];

        let response = self
            .http
            .post(&self.config.auth_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::LockAuth(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::LockAuth(e.to_string()))?;
        let token = parse_token_response(status, &body)?;

        debug!(expires_in = ?token.expires_in, "Obtained Igloo access token");
        self.access_token = Some(token.access_token);
        Ok(())
    }

    #[instrument(skip(self, request), fields(lock_id = %request.lock_id, access_name = %request.access_name))]
    async fn issue_code(&self, request: &AccessCodeRequest) -> Result<AccessCode, SyncError> {
        let issuance_error = |reason: String| SyncError::CodeIssuance {
            label: request.access_name.clone(),
            reason,
        };

        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| SyncError::LockAuth("not authenticated".to_string()))?;

        let body = HourlyPinRequest::from_request(request);
        let response = self
            .http
            .post(self.hourly_pin_url(&request.lock_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| issuance_error(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| issuance_error(e.to_string()))?;
        if !status.is_success() {
            return Err(issuance_failure(&request.access_name, status, &text));
        }

        let pin: HourlyPinResponse = serde_json::from_str(&text)
            .map_err(|e| issuance_error(format!("unexpected response: {e}")))?;

        Ok(AccessCode {
            pin: pin.pin,
            pin_id: pin.pin_id,
            lock_id: request.lock_id.clone(),
            valid_from: request.valid_from,
            valid_until: request.valid_until,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use chrono_tz::America::Denver;

    #[test]
    fn test_hourly_pin_request_body() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let request = AccessCodeRequest::for_day("lock-1", Denver, day).unwrap();

        let body = serde_json::to_value(HourlyPinRequest::from_request(&request)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "variance": 1,
                "startDate": "2025-06-01T00:00:00-06:00",
                "endDate": "2025-06-02T00:00:00-06:00",
                "accessName": "Pin for 2025-06-01",
            })
        );
    }

    #[test]
    fn test_igloo_timestamp_uses_local_offset() {
        let winter = Denver.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap();
        assert_eq!(igloo_timestamp(&winter), "2025-01-15T09:00:00-07:00");
    }

    #[test]
    fn test_pin_response_without_pin_id() {
        let pin: HourlyPinResponse = serde_json::from_str(r#"{"pin": "123456789"}"#).unwrap();
        assert_eq!(pin.pin, "123456789");
        assert!(pin.pin_id.is_none());
    }

    #[test]
    fn test_token_response() {
        let token =
            parse_token_response(StatusCode::OK, r#"{"access_token": "tok", "expires_in": 86400}"#)
                .unwrap();
        assert_eq!(token.access_token, "tok");
        assert_eq!(token.expires_in, Some(86400));
    }

    #[test]
    fn test_token_response_failures_are_lock_auth() {
        let err = parse_token_response(StatusCode::UNAUTHORIZED, r#"{"error": "invalid_client"}"#)
            .unwrap_err();
        assert!(
            matches!(&err, SyncError::LockAuth(reason) if reason.contains("401") && reason.contains("invalid_client")),
            "{err}"
        );

        for body in [r#"{"access_token": ""}"#, r#"{"access_token": "  "}"#, "not json", ""] {
            assert!(
                matches!(parse_token_response(StatusCode::OK, body), Err(SyncError::LockAuth(_))),
                "{body:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rate_limit_is_reported() {
        let err = issuance_failure(
            "Pin for 2025-06-01",
            StatusCode::TOO_MANY_REQUESTS,
            "Too Many Requests",
        );
        assert!(
            matches!(&err, SyncError::CodeIssuance { label, reason }
                if label == "Pin for 2025-06-01" && reason.starts_with("rate limited") && reason.contains("429")),
            "{err}"
        );

        let err = issuance_failure("Pin for 2025-06-01", StatusCode::BAD_REQUEST, "bad lock");
        assert!(
            matches!(&err, SyncError::CodeIssuance { reason, .. }
                if !reason.contains("rate limited") && reason.contains("bad lock")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_issue_code_requires_authentication() {
        let client = IglooClient::new(
            Client::new(),
            IglooConfig::default(),
            IglooCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
        );
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let request = AccessCodeRequest::for_day("lock-1", Denver, day).unwrap();

        let err = client.issue_code(&request).await.unwrap_err();
        assert!(matches!(err, SyncError::LockAuth(_)));
    }

    #[test]
    fn test_hourly_pin_url() {
        let config = IglooConfig {
            api_url: "https://api.example.test/".to_string(),
            ..IglooConfig::default()
        };
        let client = IglooClient::new(
            Client::new(),
            config,
            IglooCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
        );
        assert_eq!(
            client.hourly_pin_url("SP2X"),
            "https://api.example.test/igloohome/devices/SP2X/algopin/hourly"
        );
    }
}
