//! Error types for the session client

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by [`crate::api::ApiClient`] and the refresh coordinator.
///
/// `Clone` so a single refresh outcome can be handed to every queued caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// Token failed structural or payload validation. Always ends the session.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Server kept rejecting the session after a refresh (or the refresh
    /// endpoint itself answered 401). Always ends the session.
    #[error("session expired, please log in again")]
    TokenExpired,

    /// Refresh was impossible or rejected. Always ends the session.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx HTTP status unrelated to session recovery.
    #[error("{message} (HTTP {status})")]
    Server {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    /// 2xx response whose envelope reports failure or has an unknown shape.
    #[error("{message} (code {code})")]
    Business { code: i64, message: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("credential storage error: {0}")]
    Storage(String),
}

/// Uniform `{message, code}` shape handed to callers for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    pub message: String,
    pub code: Option<i64>,
}

impl ApiError {
    /// True for errors that already ended the session.
    pub fn is_auth_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_) | Self::TokenExpired | Self::RefreshFailed(_)
        )
    }

    /// True for transport failures (including timeouts).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let code = match self {
            Self::Server { status, code, .. } => code.or(Some(i64::from(*status))),
            Self::Business { code, .. } => Some(*code),
            Self::TokenExpired => Some(401),
            _ => None,
        };
        let message = match self {
            Self::Server { message, .. } | Self::Business { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorEnvelope { message, code }
    }
}

/// Errors from a [`crate::auth::TokenStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not determine data directory")]
    NoDataDir,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse credentials file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize credentials: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to encode user profile: {0}")]
    Profile(#[from] serde_json::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_prefers_body_code() {
        let err = ApiError::Server {
            status: 400,
            code: Some(4001),
            message: "bad title".into(),
        };
        let env = err.envelope();
        assert_eq!(env.message, "bad title");
        assert_eq!(env.code, Some(4001));
    }

    #[test]
    fn test_envelope_falls_back_to_status() {
        let err = ApiError::Server {
            status: 503,
            code: None,
            message: "service unavailable".into(),
        };
        assert_eq!(err.envelope().code, Some(503));
    }

    #[test]
    fn test_auth_fatal_classification() {
        assert!(ApiError::TokenExpired.is_auth_fatal());
        assert!(ApiError::RefreshFailed("x".into()).is_auth_fatal());
        assert!(ApiError::MalformedToken("x".into()).is_auth_fatal());
        assert!(!ApiError::Network("reset".into()).is_auth_fatal());
        assert!(ApiError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ApiError::Business {
            code: 500,
            message: "x".into()
        }
        .is_auth_fatal());
    }
}
