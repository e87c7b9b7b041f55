//! OBS WebSocket connection and event forwarding

mod client;
mod connector;
mod forward;

pub use client::*;
pub use connector::*;
pub use forward::*;
