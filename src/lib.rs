//! OBS Connector
//!
//! Keeps an API key checked, holds a persistent connection to the
//! BotOfTheSpecter event relay, connects to OBS on demand and forwards its
//! events. All state the user sees comes from [`session::SessionStatusModel`]
//! through [`view::project`].

pub mod app;
pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod obs;
pub mod relay;
pub mod session;
pub mod ui;
pub mod view;
