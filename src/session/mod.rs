//! Session status: per-channel connection state plus the event log

mod model;

pub use model::*;
