use msp_core::TransportError;
use thiserror::Error;

/// Slack error codes meaning the token itself is unusable.
const AUTH_ERRORS: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
    "token_expired",
];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("slack http transport failed")]
    Http(#[from] reqwest::Error),
    #[error("slack {method} returned status {status}: {body}")]
    Status {
        method: &'static str,
        status: u16,
        body: String,
    },
    #[error("slack {method} failed: {error}")]
    Slack { method: &'static str, error: String },
    #[error("slack {method} response did not decode")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn slack(method: &'static str, error: impl Into<String>) -> Self {
        ApiError::Slack {
            method,
            error: error.into(),
        }
    }

    /// True when Slack rejected the credential rather than the request.
    pub fn is_auth_error(&self) -> bool {
        match self {
            ApiError::Slack { error, .. } => AUTH_ERRORS.contains(&error.as_str()),
            ApiError::Status { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}

impl From<ApiError> for TransportError {
    fn from(error: ApiError) -> Self {
        if error.is_auth_error() {
            TransportError::AuthRejected(error.to_string())
        } else {
            TransportError::ConnectFailed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_are_recognised() {
        assert!(ApiError::slack("auth.test", "invalid_auth").is_auth_error());
        assert!(!ApiError::slack("chat.postMessage", "channel_not_found").is_auth_error());
        assert_eq!(
            ApiError::slack("chat.postMessage", "channel_not_found").to_string(),
            "slack chat.postMessage failed: channel_not_found"
        );
    }
}
