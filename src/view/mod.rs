//! Screen selection
//!
//! A pure function from session and credential state to a screen
//! descriptor. Nothing here performs I/O; rendering is up to the shell.

use crate::config::LocalToolSettings;
use crate::credential::ValidationResult;
use crate::session::{ConnectionState, SessionSnapshot};

/// Why the credential entry screen is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialNotice {
    /// A key is being checked
    Validating,
    /// The service rejected the key; the user should correct it
    Rejected,
    /// The service could not be reached; the user can retry
    NetworkError,
}

/// Everything the main status screen shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub cloud_label: String,
    pub tool_label: String,
    pub logs: Vec<String>,
    /// Sequence number of `logs[0]`, so shells can tell new lines from old
    pub first_log: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    CredentialEntry {
        notice: Option<CredentialNotice>,
    },
    MainStatus(StatusView),
    MainStatusWithToolForm {
        status: StatusView,
        settings: LocalToolSettings,
        /// Reason the last OBS connection attempt failed
        error: Option<String>,
    },
}

/// Inputs to [`project`]
#[derive(Debug, Clone, Copy)]
pub struct ViewInputs<'a> {
    /// A key is stored or has just been submitted
    pub credential_present: bool,
    /// Result of the most recent check, `None` while one is in flight
    pub validation: Option<ValidationResult>,
    pub session: &'a SessionSnapshot,
    pub tool_form_requested: bool,
    pub settings: &'a LocalToolSettings,
}

/// Human-readable label for a connection state
pub fn status_label(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Connected => "Connected".to_string(),
        ConnectionState::Connecting => "Connecting".to_string(),
        ConnectionState::Disconnected => "Disconnected".to_string(),
        ConnectionState::Error(reason) => format!("Connection Error: {}", reason),
    }
}

pub fn project(inputs: &ViewInputs<'_>) -> Screen {
    if !inputs.credential_present {
        return Screen::CredentialEntry { notice: None };
    }

    match inputs.validation {
        None => Screen::CredentialEntry {
            notice: Some(CredentialNotice::Validating),
        },
        Some(ValidationResult::Invalid) => Screen::CredentialEntry {
            notice: Some(CredentialNotice::Rejected),
        },
        Some(ValidationResult::NetworkError) => Screen::CredentialEntry {
            notice: Some(CredentialNotice::NetworkError),
        },
        Some(ValidationResult::Valid) => {
            let status = StatusView {
                cloud_label: status_label(&inputs.session.cloud),
                tool_label: status_label(&inputs.session.local_tool),
                logs: inputs.session.log_lines(),
                first_log: inputs.session.first_log_seq(),
            };
            let tool_error = match &inputs.session.local_tool {
                ConnectionState::Error(reason) => Some(reason.clone()),
                _ => None,
            };

            if inputs.tool_form_requested || tool_error.is_some() {
                Screen::MainStatusWithToolForm {
                    status,
                    settings: inputs.settings.clone(),
                    error: tool_error,
                }
            } else {
                Screen::MainStatus(status)
            }
        }
    }
}
