use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::model::{AccessCredential, DeviceAuthorization, PollOutcome};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Increment applied to the poll interval on each `slow_down`.
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Device-flow operations the session drives. Each call is a single round trip.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn request_device_code(&self) -> Result<DeviceAuthorization, AuthError>;
    async fn poll_token(&self, device_code: &str) -> PollOutcome;
    async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential, AuthError>;
}

/// Interval to wait before the poll that follows `outcome`.
pub fn next_interval(current: Duration, outcome: &PollOutcome) -> Duration {
    match outcome {
        PollOutcome::SlowDown => current.saturating_add(SLOW_DOWN_STEP),
        _ => current,
    }
}

/// HTTP client for the provider's device-code, token and refresh endpoints.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: String,
    client_id: String,
    audience: Option<String>,
    scope: String,
}

impl AuthClient {
    pub fn new(http: Client, config: &AuthConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            audience: config.audience.clone(),
            scope: config.scope.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthProvider for AuthClient {
    async fn request_device_code(&self) -> Result<DeviceAuthorization, AuthError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("scope", self.scope.as_str()),
        ];
        if let Some(audience) = &self.audience {
            form.push(("audience", audience.as_str()));
        }
        debug!("Requesting device code from {}", self.base_url);
        let resp = self
            .http
            .post(self.url("/oauth/device/code"))
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if status.is_client_error() || status.is_server_error() {
            return Err(provider_error(status, &body));
        }
        let payload: DeviceCodeResponse = serde_json::from_slice(&body)?;
        debug!("Device code issued, interval={}s expires_in={}s", payload.interval, payload.expires_in);
        Ok(DeviceAuthorization {
            device_code: payload.device_code,
            user_code: payload.user_code,
            verification_uri: payload.verification_uri,
            verification_uri_complete: payload.verification_uri_complete,
            expires_in: Duration::from_secs(payload.expires_in),
            interval: Duration::from_secs(payload.interval.max(1)),
            issued_at: OffsetDateTime::now_utc(),
        })
    }

    async fn poll_token(&self, device_code: &str) -> PollOutcome {
        let sent = self
            .http
            .post(self.url("/oauth/token"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", DEVICE_GRANT_TYPE),
                ("device_code", device_code),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => return PollOutcome::TransportError(e.into()),
        };
        let status = resp.status();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => return PollOutcome::TransportError(e.into()),
        };
        let outcome = classify_token_response(status, &body, OffsetDateTime::now_utc());
        debug!("Token poll -> {}", outcome_label(&outcome));
        outcome
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessCredential, AuthError> {
        debug!("Refreshing access token");
        let resp = self
            .http
            .post(self.url("/oauth/token"))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", REFRESH_GRANT_TYPE),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if status.is_client_error() || status.is_server_error() {
            return Err(provider_error(status, &body));
        }
        let received_at = OffsetDateTime::now_utc();
        let payload: TokenResponse = serde_json::from_slice(&body)?;
        let access_token = payload
            .access_token
            .ok_or_else(|| AuthError::Decode("refresh response missing access_token".into()))?;
        // providers that do not rotate omit the refresh token; keep the old one
        let refresh = payload.refresh_token.or_else(|| Some(refresh_token.to_string()));
        AccessCredential::issued(access_token, refresh, payload.expires_in, received_at)
    }
}

/// Decodes a token-endpoint response into a [`PollOutcome`].
pub fn classify_token_response(status: StatusCode, body: &[u8], received_at: OffsetDateTime) -> PollOutcome {
    if status.is_success() {
        return match serde_json::from_slice::<TokenResponse>(body) {
            Ok(TokenResponse { access_token: Some(access_token), refresh_token, expires_in }) => {
                match AccessCredential::issued(access_token, refresh_token, expires_in, received_at) {
                    Ok(credential) => PollOutcome::Success(credential),
                    Err(e) => PollOutcome::TransportError(e),
                }
            }
            Ok(_) => PollOutcome::TransportError(AuthError::Decode("token response missing access_token".into())),
            Err(e) => PollOutcome::TransportError(e.into()),
        };
    }
    if !(status.is_client_error() || status.is_server_error()) {
        return PollOutcome::TransportError(AuthError::Decode(format!("unexpected status {status}")));
    }
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(err) => match err.error.as_str() {
            "authorization_pending" => PollOutcome::Pending,
            "slow_down" => PollOutcome::SlowDown,
            "expired_token" => PollOutcome::Expired,
            "access_denied" => PollOutcome::Denied,
            _ => PollOutcome::TransportError(AuthError::Provider {
                status: status.as_u16(),
                description: err.description(),
                error: err.error,
            }),
        },
        Err(e) => PollOutcome::TransportError(e.into()),
    }
}

fn provider_error(status: StatusCode, body: &[u8]) -> AuthError {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(err) => AuthError::Provider {
            status: status.as_u16(),
            description: err.description(),
            error: err.error,
        },
        Err(_) => AuthError::Provider {
            status: status.as_u16(),
            error: status.canonical_reason().unwrap_or("error").to_string(),
            description: Some(String::from_utf8_lossy(body).into_owned()).filter(|s| !s.is_empty()),
        },
    }
}

fn outcome_label(outcome: &PollOutcome) -> &'static str {
    match outcome {
        PollOutcome::Pending => "pending",
        PollOutcome::SlowDown => "slow_down",
        PollOutcome::Expired => "expired",
        PollOutcome::Denied => "denied",
        PollOutcome::Success(_) => "success",
        PollOutcome::TransportError(_) => "transport error",
    }
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default, rename = "description")]
    short_description: Option<String>,
}

impl ErrorResponse {
    fn description(&self) -> Option<String> {
        self.error_description.clone().or_else(|| self.short_description.clone())
    }
}
