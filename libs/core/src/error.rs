use thiserror::Error;

/// Failure to bring up or keep a remote connection.
///
/// Fatal to the current connection attempt only; the remote client decides
/// whether a reconnect follows.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("slack rejected the credential: {0}")]
    AuthRejected(String),
    #[error("could not open the slack connection: {0}")]
    ConnectFailed(String),
    #[error("slack connection closed before it became ready")]
    ClosedBeforeReady,
    #[error("slack transport failure")]
    Other(#[source] anyhow::Error),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::AuthRejected(_) => "auth_rejected",
            TransportError::ConnectFailed(_) => "connect_failed",
            TransportError::ClosedBeforeReady => "closed_before_ready",
            TransportError::Other(_) => "transport",
        }
    }
}

/// Slack refused an outbound send, edit, delete, reaction, or upload.
///
/// Surfaced to the host so the originating user learns about it; never
/// retried here.
#[derive(Debug, Error)]
#[error("slack rejected {operation}: {reason}")]
pub struct DeliveryError {
    pub operation: &'static str,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(operation: &'static str, reason: impl Into<String>) -> Self {
        Self {
            operation,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_error_message_names_operation() {
        let err = DeliveryError::new("chat.postMessage", "channel_not_found");
        assert_eq!(
            err.to_string(),
            "slack rejected chat.postMessage: channel_not_found"
        );
    }

    #[test]
    fn transport_codes_are_stable() {
        assert_eq!(
            TransportError::AuthRejected("invalid_auth".into()).code(),
            "auth_rejected"
        );
        assert_eq!(TransportError::ClosedBeforeReady.code(), "closed_before_ready");
    }
}
