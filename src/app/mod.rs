//! App coordinator - owns the connectors and drives the shell

mod coordinator;

pub use coordinator::{create_app_channel, App, Services};

use crate::config::LocalToolSettings;

/// Commands sent to the coordinator by the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// User entered an API key
    SubmitCredential(String),
    /// Check the current key again after a network failure
    RetryValidation,
    /// Open the OBS settings form
    ShowToolForm,
    /// Close the OBS settings form
    HideToolForm,
    /// Make one OBS connection attempt with these settings
    ConnectTool(LocalToolSettings),
    /// Persist OBS settings
    SaveToolSettings(LocalToolSettings),
    /// Abandon an OBS connection attempt in progress
    CancelToolConnect,
    /// Copy the log to the log surface
    OpenLogs,
    /// Stop everything and return from `run`
    Shutdown,
}
