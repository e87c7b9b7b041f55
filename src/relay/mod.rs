//! Cloud relay channel: Socket.IO codec, WebSocket transport and the
//! reconnecting connector

mod connector;
mod protocol;
mod transport;

pub use connector::*;
pub use protocol::*;
pub use transport::*;
