use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_SCOPE: &str = "openid profile email offline_access";
const DEFAULT_METRICS_REFRESH_SECS: u64 = 5;
const DEFAULT_METRICS_WINDOW: &str = "-1h";
const DEFAULT_METRICS_BUCKET: &str = "1m";
const DEFAULT_LOG_FILE: &str = "cloud_tui.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Authorization server origin, e.g. `https://auth.example.com`.
    pub base_url: String,
    pub client_id: String,
    pub audience: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub refresh: Duration,
    /// Relative start of the queried window, e.g. `-1h`.
    pub window: String,
    /// Bucket size of each series point, e.g. `1m`.
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub auth: AuthConfig,
    pub api_url: String,
    pub metrics: MetricsConfig,
    pub credential_dir: Option<PathBuf>,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup (the process env in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let refresh_secs = match get("CLOUD_METRICS_REFRESH_SECS") {
            None => DEFAULT_METRICS_REFRESH_SECS,
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        var: "CLOUD_METRICS_REFRESH_SECS",
                        reason: "must be at least 1".into(),
                    });
                }
                Ok(secs) => secs,
                Err(e) => {
                    return Err(ConfigError::Invalid {
                        var: "CLOUD_METRICS_REFRESH_SECS",
                        reason: e.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            auth: AuthConfig {
                base_url: with_scheme(&required("CLOUD_AUTH_DOMAIN")?),
                client_id: required("CLOUD_AUTH_CLIENT_ID")?,
                audience: get("CLOUD_AUTH_AUDIENCE"),
                scope: get("CLOUD_AUTH_SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
            },
            api_url: with_scheme(&required("CLOUD_API_URL")?),
            metrics: MetricsConfig {
                refresh: Duration::from_secs(refresh_secs),
                window: get("CLOUD_METRICS_WINDOW").unwrap_or_else(|| DEFAULT_METRICS_WINDOW.to_string()),
                bucket: get("CLOUD_METRICS_BUCKET").unwrap_or_else(|| DEFAULT_METRICS_BUCKET.to_string()),
            },
            credential_dir: get("CLOUD_TUI_CONFIG_DIR").map(PathBuf::from),
            log_file: get("CLOUD_TUI_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
        })
    }
}

/// Bare domains get `https://`; explicit schemes are kept (local test servers use http).
fn with_scheme(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
