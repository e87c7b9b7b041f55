//! Relay connector
//!
//! Keeps one registered connection to the cloud relay alive for as long as
//! it runs. Phase changes go through [`next_phase`], a plain transition
//! table, so the state machine can be read in one place:
//!
//! | event                   | from                          | to                   |
//! |-------------------------|-------------------------------|----------------------|
//! | connect started         | any                           | `Connecting`         |
//! | transport connected     | `Connecting`                  | `Registering`        |
//! | registration succeeded  | `Registering`, `RegistrationFailed` | `Active`       |
//! | registration rejected   | `Registering`                 | `RegistrationFailed` |
//! | transport closed        | any                           | `Disconnected`       |
//! | connect failed          | any                           | `Error`              |
//!
//! A rejected registration keeps the transport open. After `Disconnected` or
//! `Error` the connector waits the reconnect delay and starts over; it never
//! gives up on its own.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{OutboundEvent, RelayDialer, RelayFrame};
use crate::config::RelayConfig;
use crate::credential::ValidatedCredential;
use crate::error::ConnectorError;
use crate::session::{Channel, ConnectionState, SessionStatusModel};

/// Where the connector is in its connect/register cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudPhase {
    Idle,
    Connecting,
    Registering,
    /// Connected, but the relay refused the registration
    RegistrationFailed(String),
    Active,
    Disconnected,
    Error(String),
}

/// Inputs that move the connector between phases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    ConnectStarted,
    TransportConnected,
    RegistrationSucceeded,
    RegistrationRejected(String),
    TransportClosed(String),
    ConnectFailed(ConnectorError),
}

/// Transition table for the relay connection
pub fn next_phase(phase: &CloudPhase, event: &CloudEvent) -> CloudPhase {
    use CloudEvent as E;
    use CloudPhase as P;

    match (phase, event) {
        (_, E::ConnectStarted) => P::Connecting,
        (P::Connecting, E::TransportConnected) => P::Registering,
        (P::Registering | P::RegistrationFailed(_), E::RegistrationSucceeded) => P::Active,
        (P::Registering, E::RegistrationRejected(reason)) => {
            P::RegistrationFailed(reason.clone())
        }
        (_, E::TransportClosed(_)) => P::Disconnected,
        (_, E::ConnectFailed(err)) => P::Error(err.to_string()),
        // Anything else does not apply in the current phase
        (current, _) => current.clone(),
    }
}

/// What the rest of the app sees for a given phase. A failed or dropped
/// connection reads as `Disconnected` while the retry is pending, never as a
/// stale `Connected`.
pub fn channel_state(phase: &CloudPhase) -> ConnectionState {
    match phase {
        CloudPhase::Idle | CloudPhase::Disconnected | CloudPhase::Error(_) => {
            ConnectionState::Disconnected
        }
        CloudPhase::Connecting | CloudPhase::Registering => ConnectionState::Connecting,
        CloudPhase::Active => ConnectionState::Connected,
        CloudPhase::RegistrationFailed(reason) => {
            ConnectionState::Error(format!("Registration failed: {}", reason))
        }
    }
}

/// Reconnecting client for the cloud relay
pub struct CloudConnector {
    dialer: Arc<dyn RelayDialer>,
    credential: ValidatedCredential,
    model: SessionStatusModel,
    url: String,
    client_name: String,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    phase: CloudPhase,
    phase_tx: watch::Sender<CloudPhase>,
}

impl CloudConnector {
    /// Connecting requires a key the verification service accepted
    pub fn new(
        config: &RelayConfig,
        credential: ValidatedCredential,
        model: SessionStatusModel,
        dialer: Arc<dyn RelayDialer>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(CloudPhase::Idle);
        Self {
            dialer,
            credential,
            model,
            url: config.url.clone(),
            client_name: config.client_name.clone(),
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
            phase: CloudPhase::Idle,
            phase_tx,
        }
    }

    /// Spawn the connection loop
    pub fn start(self) -> CloudHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let phases = self.phase_tx.subscribe();
        let task = tokio::spawn(self.run(stop_rx));
        CloudHandle {
            stop_tx: Some(stop_tx),
            task,
            phases,
        }
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        info!("Relay connector starting for {}", self.url);
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            tokio::select! {
                _ = &mut stop => break,
                _ = self.session(attempt) => {}
            }

            debug!("Reconnecting to relay in {:?}", self.reconnect_delay);
            tokio::select! {
                _ = &mut stop => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_phase(CloudPhase::Idle);
        self.model.append_log("Relay connection stopped.");
        info!("Relay connector stopped");
    }

    /// One connect, register and listen cycle. Returns when the connection
    /// is gone.
    async fn session(&mut self, attempt: u64) {
        self.apply(CloudEvent::ConnectStarted);
        debug!("Connecting to relay {} (attempt {})", self.url, attempt);

        let dialed = tokio::time::timeout(self.connect_timeout, self.dialer.dial(&self.url)).await;
        let mut session = match dialed {
            Ok(Ok(session)) => session,
            Ok(Err(err)) => return self.fail(err),
            Err(_) => return self.fail(ConnectorError::CloudConnectTimeout(self.connect_timeout)),
        };

        self.apply(CloudEvent::TransportConnected);
        info!("Connected to relay, registering");
        self.model.append_log("Connected to relay server.");

        let register = OutboundEvent::register(self.credential.expose(), &self.client_name);
        if session.outbound.send(register).is_err() {
            return self.close("socket closed before registration".to_string());
        }

        while let Some(frame) = session.inbound.recv().await {
            match frame {
                RelayFrame::Event { name, data } => self.handle_event(&name, &data),
                RelayFrame::Closed(reason) => return self.close(reason),
            }
        }
        self.close("socket closed".to_string());
    }

    fn handle_event(&mut self, name: &str, data: &Value) {
        self.model
            .append_log(format!("Received event '{}' with data: {}", name, data));

        match name {
            "SUCCESS" => {
                info!("Relay registration successful: {}", data);
                self.apply(CloudEvent::RegistrationSucceeded);
                self.model.append_log("Relay registration successful.");
            }
            "ERROR" => {
                let reason = describe_error(data);
                let err = ConnectorError::CloudRegistrationRejected(reason.clone());
                error!("{}", err);
                self.apply(CloudEvent::RegistrationRejected(reason));
                self.model.append_log("Relay registration failed.");
            }
            _ => debug!("Relay event {}: {}", name, data),
        }
    }

    fn fail(&mut self, err: ConnectorError) {
        warn!("Relay connection error: {}", err);
        self.model.append_log(format!("Relay connection error: {}", err));
        self.apply(CloudEvent::ConnectFailed(err));
    }

    fn close(&mut self, reason: String) {
        warn!("Disconnected from relay: {}", reason);
        self.model
            .append_log(format!("Disconnected from relay: {}", reason));
        self.apply(CloudEvent::TransportClosed(reason));
    }

    fn apply(&mut self, event: CloudEvent) {
        let next = next_phase(&self.phase, &event);
        debug!("Relay {:?} --{:?}--> {:?}", self.phase, event, next);
        self.set_phase(next);
    }

    fn set_phase(&mut self, phase: CloudPhase) {
        self.model
            .set_channel_state(Channel::Cloud, channel_state(&phase));
        self.phase = phase.clone();
        self.phase_tx.send_replace(phase);
    }
}

/// Human-readable reason from an ERROR payload
fn describe_error(data: &Value) -> String {
    match data {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .or_else(|| map.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        Value::Null => "no reason given".to_string(),
        other => other.to_string(),
    }
}

/// Running relay connector. Dropping the handle cancels the task.
pub struct CloudHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    phases: watch::Receiver<CloudPhase>,
}

impl CloudHandle {
    pub fn phase(&self) -> CloudPhase {
        self.phases.borrow().clone()
    }

    pub fn phases(&self) -> watch::Receiver<CloudPhase> {
        self.phases.clone()
    }

    /// Stop reconnecting and close the current connection
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                error!("Relay connector task failed: {}", e);
            }
        }
    }
}

impl Drop for CloudHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
