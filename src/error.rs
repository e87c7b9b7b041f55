//! Error taxonomy for the connector
//!
//! Verification and OBS errors are surfaced to the user; relay errors are
//! absorbed by the reconnect loop and only ever show up as a status label
//! and a log entry.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("No API key stored")]
    CredentialMissing,

    #[error("API key was rejected by the verification service")]
    CredentialInvalid,

    #[error("Network error while validating API key: {0}")]
    VerificationNetworkError(String),

    #[error("Timed out connecting to relay after {0:?}")]
    CloudConnectTimeout(Duration),

    #[error("Relay transport error: {0}")]
    CloudTransportError(String),

    #[error("Relay rejected registration: {0}")]
    CloudRegistrationRejected(String),

    #[error("Failed to connect to OBS WebSocket: {0}")]
    LocalToolConnectError(String),

    #[error("OBS WebSocket connection closed")]
    LocalToolUnexpectedDisconnect,
}

impl ConnectorError {
    /// Whether the user can fix this by editing input (key or OBS settings),
    /// as opposed to waiting or retrying.
    pub fn needs_correction(&self) -> bool {
        matches!(
            self,
            Self::CredentialMissing | Self::CredentialInvalid | Self::LocalToolConnectError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_is_retryable() {
        let err = ConnectorError::VerificationNetworkError("timeout".into());
        assert!(!err.needs_correction());
        assert!(ConnectorError::CredentialInvalid.needs_correction());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = ConnectorError::LocalToolConnectError("connection refused".into());
        assert_eq!(
            err.to_string(),
            "Failed to connect to OBS WebSocket: connection refused"
        );
    }
}
