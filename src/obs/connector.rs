//! Local OBS connection
//!
//! One bounded attempt per `connect` call. There is no retry loop: a failed
//! attempt leaves the channel in `Error` and a lost connection leaves it
//! `Disconnected` until the user connects again.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{ToolDialer, ToolEvent, ToolSession};
use crate::config::LocalToolSettings;
use crate::error::ConnectorError;
use crate::session::{Channel, ConnectionState, SessionStatusModel};

/// Default bound on a single connection attempt
pub const DEFAULT_TOOL_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

pub struct LocalToolConnector {
    dialer: Arc<dyn ToolDialer>,
    model: SessionStatusModel,
    connect_timeout: Duration,
    callbacks: Arc<Mutex<Vec<DisconnectCallback>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    event_sink: Option<mpsc::UnboundedSender<ToolEvent>>,
}

impl LocalToolConnector {
    pub fn new(model: SessionStatusModel, dialer: Arc<dyn ToolDialer>) -> Self {
        Self {
            dialer,
            model,
            connect_timeout: DEFAULT_TOOL_CONNECT_TIMEOUT,
            callbacks: Arc::new(Mutex::new(Vec::new())),
            watcher: Mutex::new(None),
            event_sink: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Forward every OBS event to `sink` while connected
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<ToolEvent>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Run `callback` whenever an established connection is lost
    pub fn on_disconnected(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    /// Make one connection attempt with `settings`, replacing any current
    /// connection.
    pub async fn connect(&self, settings: &LocalToolSettings) -> Result<(), ConnectorError> {
        self.stop_watcher();

        let endpoint = format!("{}:{}", settings.host(), settings.port);
        self.model
            .set_channel_state(Channel::LocalTool, ConnectionState::Connecting);
        self.model
            .append_log(format!("Connecting to OBS WebSocket at {}", endpoint));

        let guard = AttemptGuard::new(self.model.clone());
        let result = match tokio::time::timeout(self.connect_timeout, self.dialer.dial(settings))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::LocalToolConnectError(format!(
                "timed out after {:?}",
                self.connect_timeout
            ))),
        };
        guard.disarm();

        match result {
            Ok(session) => {
                info!("OBS WebSocket connected at {}", endpoint);
                self.model
                    .set_channel_state(Channel::LocalTool, ConnectionState::Connected);
                self.model.append_log("Connected to OBS WebSocket.");
                self.watch(session);
                Ok(())
            }
            Err(err) => {
                warn!("OBS WebSocket connection to {} failed: {}", endpoint, err);
                let reason = match &err {
                    ConnectorError::LocalToolConnectError(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.model
                    .set_channel_state(Channel::LocalTool, ConnectionState::Error(reason));
                self.model.append_log(err.to_string());
                Err(err)
            }
        }
    }

    /// Close the current connection, if any. Disconnect callbacks do not run.
    pub fn disconnect(&self) {
        if self.stop_watcher() {
            info!("OBS WebSocket disconnected");
            self.model
                .set_channel_state(Channel::LocalTool, ConnectionState::Disconnected);
            self.model.append_log("Disconnected from OBS WebSocket.");
        }
    }

    /// Abort the session watcher; true if a live session was torn down
    fn stop_watcher(&self) -> bool {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    fn watch(&self, session: ToolSession) {
        let model = self.model.clone();
        let callbacks = self.callbacks.clone();
        let sink = self.event_sink.clone();
        let mut events = session.events;

        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!("OBS event {}", event.name);
                if let Some(sink) = &sink {
                    let _ = sink.send(event);
                }
            }

            warn!("{}", ConnectorError::LocalToolUnexpectedDisconnect);
            model.set_channel_state(Channel::LocalTool, ConnectionState::Disconnected);
            model.append_log("Disconnected from OBS WebSocket.");

            let callbacks = callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for callback in callbacks {
                callback();
            }
        });

        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

impl Drop for LocalToolConnector {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Puts the channel back to `Disconnected` if an attempt is dropped midway
struct AttemptGuard {
    model: Option<SessionStatusModel>,
}

impl AttemptGuard {
    fn new(model: SessionStatusModel) -> Self {
        Self { model: Some(model) }
    }

    fn disarm(mut self) {
        self.model = None;
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if let Some(model) = self.model.take() {
            info!("OBS connection attempt cancelled");
            model.set_channel_state(Channel::LocalTool, ConnectionState::Disconnected);
            model.append_log("OBS connection attempt cancelled.");
        }
    }
}
