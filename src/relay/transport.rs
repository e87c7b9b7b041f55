//! Relay transport
//!
//! A dial produces a [`RelaySession`]: a pair of channels carrying decoded
//! events in and outbound events out. The WebSocket itself is owned by a
//! background pump task, so the connector never touches the socket and
//! dropping the session closes it.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{
    decode, encode_event, socket_io_url, Handshake, Packet, SocketPacket, CONNECT_PACKET,
    PONG_PACKET,
};
use crate::error::ConnectorError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound traffic from the relay after the namespace is connected
#[derive(Debug, Clone, PartialEq)]
pub enum RelayFrame {
    /// A named event with its payload
    Event { name: String, data: Value },
    /// The connection ended; no more frames follow
    Closed(String),
}

/// An event to emit to the relay
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub name: String,
    pub data: Value,
}

impl OutboundEvent {
    /// Registration message identifying this client to the relay
    pub fn register(code: &str, client_name: &str) -> Self {
        Self {
            name: "REGISTER".to_string(),
            data: json!({
                "code": code,
                "name": format!("{} V{}", client_name, env!("CARGO_PKG_VERSION")),
            }),
        }
    }
}

/// An established relay connection
pub struct RelaySession {
    pub outbound: mpsc::UnboundedSender<OutboundEvent>,
    pub inbound: mpsc::UnboundedReceiver<RelayFrame>,
}

/// Opens relay connections. Resolves once the transport is usable.
pub trait RelayDialer: Send + Sync {
    fn dial(&self, url: &str) -> BoxFuture<'static, Result<RelaySession, ConnectorError>>;
}

/// Socket.IO client over a WebSocket
pub struct SocketIoDialer;

impl RelayDialer for SocketIoDialer {
    fn dial(&self, url: &str) -> BoxFuture<'static, Result<RelaySession, ConnectorError>> {
        Box::pin(dial_socket_io(url.to_string()))
    }
}

async fn dial_socket_io(url: String) -> Result<RelaySession, ConnectorError> {
    let endpoint = socket_io_url(&url)
        .map_err(|e| ConnectorError::CloudTransportError(format!("bad relay URL: {}", e)))?;

    let (mut ws, _response) = connect_async(endpoint.as_str())
        .await
        .map_err(|e| ConnectorError::CloudTransportError(e.to_string()))?;
    debug!("WebSocket open to {}", endpoint);

    let handshake = handshake(&mut ws).await?;
    info!("Relay namespace connected (sid {})", handshake.sid);

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump(ws, handshake, out_rx, in_tx));

    Ok(RelaySession {
        outbound: out_tx,
        inbound: in_rx,
    })
}

/// Engine.IO open, then Socket.IO connect on the default namespace
async fn handshake(ws: &mut Socket) -> Result<Handshake, ConnectorError> {
    let mut opened: Option<Handshake> = None;

    loop {
        let text = match ws.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                return Err(ConnectorError::CloudTransportError(format!(
                    "closed during handshake: {:?}",
                    frame
                )))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ConnectorError::CloudTransportError(e.to_string())),
            None => {
                return Err(ConnectorError::CloudTransportError(
                    "closed during handshake".to_string(),
                ))
            }
        };

        let packet = decode(&text).map_err(|e| {
            ConnectorError::CloudTransportError(format!("bad handshake frame: {}", e))
        })?;

        match packet {
            Packet::Open(handshake) => {
                send_text(ws, CONNECT_PACKET).await?;
                opened = Some(handshake);
            }
            Packet::Ping => send_text(ws, PONG_PACKET).await?,
            Packet::Message(SocketPacket::Connect(_)) => {
                return opened.ok_or_else(|| {
                    ConnectorError::CloudTransportError("connect before open".to_string())
                });
            }
            Packet::Message(SocketPacket::ConnectError(data)) => {
                return Err(ConnectorError::CloudTransportError(format!(
                    "connection refused: {}",
                    data
                )));
            }
            Packet::Close => {
                return Err(ConnectorError::CloudTransportError(
                    "server closed during handshake".to_string(),
                ))
            }
            other => debug!("Ignoring {:?} during handshake", other),
        }
    }
}

async fn send_text(ws: &mut Socket, text: &str) -> Result<(), ConnectorError> {
    ws.send(Message::Text(text.to_string()))
        .await
        .map_err(|e| ConnectorError::CloudTransportError(e.to_string()))
}

/// Owns the socket for the lifetime of a session
async fn pump(
    mut ws: Socket,
    handshake: Handshake,
    mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    inbound: mpsc::UnboundedSender<RelayFrame>,
) {
    let liveness = handshake.liveness_window();
    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            _ = &mut deadline => break "no ping from relay".to_string(),

            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => match decode(&text) {
                    Ok(Packet::Ping) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + liveness);
                        if let Err(e) = ws.send(Message::Text(PONG_PACKET.to_string())).await {
                            break e.to_string();
                        }
                    }
                    Ok(Packet::Close) => break "relay closed the connection".to_string(),
                    Ok(Packet::Message(SocketPacket::Disconnect)) => {
                        break "relay disconnected the client".to_string()
                    }
                    Ok(Packet::Message(SocketPacket::Event { name, data })) => {
                        let _ = inbound.send(RelayFrame::Event { name, data });
                    }
                    Ok(other) => debug!("Ignoring relay packet {:?}", other),
                    Err(e) => warn!("Ignoring undecodable relay frame {:?}: {}", text, e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!("socket closed: {}", frame.reason),
                        None => "socket closed".to_string(),
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break e.to_string(),
                None => break "socket closed".to_string(),
            },

            out = outbound.recv() => match out {
                Some(event) => {
                    let frame = encode_event(&event.name, &event.data);
                    if let Err(e) = ws.send(Message::Text(frame)).await {
                        break e.to_string();
                    }
                }
                None => {
                    // Session dropped by the connector
                    let _ = ws.close(None).await;
                    return;
                }
            },
        }
    };

    debug!("Relay session ended: {}", reason);
    let _ = inbound.send(RelayFrame::Closed(reason));
}
