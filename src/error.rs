use thiserror::Error;

/// Failures talking to the authorization server.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Structured `{error, error_description}` body returned with a 4xx/5xx status.
    #[error("{error} (HTTP {status}){}", suffix(.description))]
    Provider {
        status: u16,
        error: String,
        description: Option<String>,
    },
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

fn suffix(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Failures of the resource-listing REST API.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Unauthorized: credential rejected by the API")]
    Unauthorized,
    #[error("API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Network error: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No stored value for '{0}'")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// User-visible reason the session landed in the error screen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("The login code expired before it was approved. Press 'r' to request a new one.")]
    AuthorizationExpired,
    #[error("The login request was denied in the browser. Press 'r' to try again.")]
    AccessDenied,
    #[error("The authorization server rejected the request: {0}")]
    Provider(String),
    #[error("Could not reach the authorization server: {0}")]
    Transport(String),
    #[error("Your session is no longer valid. Press 'r' to log in again.")]
    Unauthorized,
    #[error("Request to the cloud API failed: {0}")]
    Api(String),
}

impl From<AuthError> for SessionError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Provider { .. } => SessionError::Provider(error.to_string()),
            AuthError::Transport(msg) | AuthError::Decode(msg) => SessionError::Transport(msg),
        }
    }
}

impl From<ApiError> for SessionError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Unauthorized => SessionError::Unauthorized,
            other => SessionError::Api(other.to_string()),
        }
    }
}
