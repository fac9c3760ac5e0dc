use msp_core::{DeliveryError, PuppetId, TransportError};
use thiserror::Error;

/// Failures surfaced to the host framework by the orchestrator.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("no slack session for puppet {0}")]
    UnknownPuppet(PuppetId),
    #[error("slack account is not authenticated yet")]
    NotAuthenticated,
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("host framework call failed")]
    Host(#[source] anyhow::Error),
    #[error("bridge store failed")]
    Store(#[source] anyhow::Error),
    /// Link data the user supplied could not be used; the text is shown
    /// to them verbatim.
    #[error("{0}")]
    Link(String),
}

impl BridgeError {
    /// Whether the originating Matrix user should be told the send failed.
    pub fn is_delivery(&self) -> bool {
        matches!(self, BridgeError::Delivery(_))
    }
}
