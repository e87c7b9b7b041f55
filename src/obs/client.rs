//! OBS WebSocket client
//!
//! Connects with `obws` and turns the connection into a [`ToolSession`]: a
//! stream of events that ends when OBS goes away.

use futures::future::BoxFuture;
use futures::StreamExt;
use obws::events::Event;
use obws::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::LocalToolSettings;
use crate::error::ConnectorError;

/// How often an idle connection is probed
const PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// An event observed on the OBS connection
#[derive(Debug, Clone, PartialEq)]
pub struct ToolEvent {
    pub name: String,
    pub payload: Value,
}

impl ToolEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Body forwarded to the event API
    pub fn to_json(&self) -> Value {
        json!({
            "event": self.name,
            "data": self.payload,
        })
    }
}

/// A live OBS connection. `events` closes when the connection is lost.
pub struct ToolSession {
    pub events: mpsc::UnboundedReceiver<ToolEvent>,
}

/// Opens OBS connections
pub trait ToolDialer: Send + Sync {
    fn dial(
        &self,
        settings: &LocalToolSettings,
    ) -> BoxFuture<'static, Result<ToolSession, ConnectorError>>;
}

/// OBS WebSocket v5 through `obws`
pub struct ObwsDialer;

impl ToolDialer for ObwsDialer {
    fn dial(
        &self,
        settings: &LocalToolSettings,
    ) -> BoxFuture<'static, Result<ToolSession, ConnectorError>> {
        Box::pin(dial_obs(
            settings.host().to_string(),
            settings.port,
            settings.password().map(str::to_string),
        ))
    }
}

async fn dial_obs(
    host: String,
    port: u16,
    password: Option<String>,
) -> Result<ToolSession, ConnectorError> {
    let client = Client::connect(&host, port, password.as_deref())
        .await
        .map_err(|e| ConnectorError::LocalToolConnectError(e.to_string()))?;

    let version = client
        .general()
        .version()
        .await
        .map_err(|e| ConnectorError::LocalToolConnectError(e.to_string()))?;
    info!(
        "Connected to OBS {} (obs-websocket {}) at {}:{}",
        version.obs_version, version.obs_web_socket_version, host, port
    );

    let raw_events = client
        .events()
        .map_err(|e| ConnectorError::LocalToolConnectError(e.to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();

    // The task owns the client; dropping the receiver or losing OBS ends it
    tokio::spawn(async move {
        tokio::pin!(raw_events);
        let mut probe = tokio::time::interval(PROBE_INTERVAL);
        probe.tick().await;

        loop {
            tokio::select! {
                event = raw_events.next() => match event {
                    Some(event) => {
                        if tx.send(tool_event(&event)).is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!("OBS event stream ended");
                        break;
                    }
                },
                _ = probe.tick() => {
                    if let Err(e) = client.general().version().await {
                        debug!("OBS probe failed: {}", e);
                        break;
                    }
                    if tx.is_closed() {
                        break;
                    }
                }
            }
        }
    });

    Ok(ToolSession { events: rx })
}

/// Event type and data as obs-websocket names them on the wire
fn tool_event(event: &Event) -> ToolEvent {
    if let Ok(Value::Object(mut fields)) = serde_json::to_value(event) {
        if let Some(Value::String(name)) = fields.remove("eventType") {
            let data = fields.remove("eventData").unwrap_or(Value::Null);
            return ToolEvent::new(name, data);
        }
    }
    debug_event(format!("{:?}", event))
}

/// Fallback for events that do not serialize
fn debug_event(debug_repr: String) -> ToolEvent {
    ToolEvent::new(event_name(&debug_repr).to_string(), Value::String(debug_repr))
}

/// Variant name from an event's debug representation
fn event_name(debug_repr: &str) -> &str {
    let end = debug_repr
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .unwrap_or(debug_repr.len());
    &debug_repr[..end]
}
