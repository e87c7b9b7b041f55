//! Socket.IO v4 / Engine.IO v4 text framing
//!
//! Only what the relay uses: the open handshake, ping/pong, namespace
//! connect/disconnect on the default namespace, and events. Binary packets
//! are not used by the relay.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Namespace connect request for the default namespace
pub const CONNECT_PACKET: &str = "40";

/// Engine.IO pong
pub const PONG_PACKET: &str = "3";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("event packet without a name")]
    MissingEventName,
}

/// Engine.IO open handshake parameters
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl Handshake {
    /// Longest silence tolerated before the connection is considered dead
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Decoded Engine.IO packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

/// Decoded Socket.IO packet carried in an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    Ack { data: Value },
    ConnectError(Value),
}

/// Decode one WebSocket text frame
pub fn decode(frame: &str) -> Result<Packet, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let handshake = serde_json::from_str(rest)
                .map_err(|e| ProtocolError::Payload(e.to_string()))?;
            Ok(Packet::Open(handshake))
        }
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '4' => decode_socket(rest).map(Packet::Message),
        '6' => Ok(Packet::Noop),
        other => Err(ProtocolError::UnknownEngineType(other)),
    }
}

fn decode_socket(frame: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    let body = skip_namespace(chars.as_str());
    // Optional ack id before the payload
    let body = body.trim_start_matches(|c: char| c.is_ascii_digit());

    match kind {
        '0' => {
            if body.is_empty() {
                Ok(SocketPacket::Connect(None))
            } else {
                parse_json(body).map(|v| SocketPacket::Connect(Some(v)))
            }
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let Value::Array(mut args) = parse_json(body)? else {
                return Err(ProtocolError::Payload("event payload is not an array".into()));
            };
            if args.is_empty() {
                return Err(ProtocolError::MissingEventName);
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(ProtocolError::MissingEventName),
            };
            Ok(SocketPacket::Event {
                name,
                data: collapse_args(args),
            })
        }
        '3' => {
            let Value::Array(args) = parse_json(body)? else {
                return Err(ProtocolError::Payload("ack payload is not an array".into()));
            };
            Ok(SocketPacket::Ack {
                data: collapse_args(args),
            })
        }
        '4' => {
            let data = if body.is_empty() {
                Value::Null
            } else {
                parse_json(body)?
            };
            Ok(SocketPacket::ConnectError(data))
        }
        other => Err(ProtocolError::UnknownSocketType(other)),
    }
}

/// Drop a `/namespace,` prefix if present
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn parse_json(body: &str) -> Result<Value, ProtocolError> {
    serde_json::from_str(body).map_err(|e| ProtocolError::Payload(e.to_string()))
}

/// A single argument is passed through; none is null; several become an array
fn collapse_args(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

/// Encode an event packet for the default namespace
pub fn encode_event(name: &str, data: &Value) -> String {
    let payload = Value::Array(vec![Value::String(name.to_string()), data.clone()]);
    format!("42{}", payload)
}

/// Build the WebSocket endpoint for a Socket.IO server base URL
pub fn socket_io_url(base: &str) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.set_path("/socket.io/");
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}
