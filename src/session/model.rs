//! Shared session status model
//!
//! Both connectors write here concurrently; the coordinator reads snapshots.
//! The state lives inside a `watch` channel so every write is an atomic
//! closure over the current value and readers always get a whole snapshot.

use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Default number of log entries retained
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// One of the two independently tracked connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Socket to the cloud event relay
    Cloud,
    /// OBS WebSocket on the local machine
    LocalTool,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Cloud => write!(f, "relay"),
            Channel::LocalTool => write!(f, "OBS"),
        }
    }
}

/// Connection state of a single channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// A timestamped log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            self.message
        )
    }
}

/// Immutable view of the session at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub cloud: ConnectionState,
    pub local_tool: ConnectionState,
    pub logs: VecDeque<LogEntry>,
    /// Entries ever appended, including ones evicted from `logs`
    pub logs_appended: u64,
    /// Incremented on every write, including no-op state writes
    pub revision: u64,
}

impl SessionSnapshot {
    pub fn state(&self, channel: Channel) -> &ConnectionState {
        match channel {
            Channel::Cloud => &self.cloud,
            Channel::LocalTool => &self.local_tool,
        }
    }

    fn state_mut(&mut self, channel: Channel) -> &mut ConnectionState {
        match channel {
            Channel::Cloud => &mut self.cloud,
            Channel::LocalTool => &mut self.local_tool,
        }
    }

    /// Sequence number of the oldest retained entry
    pub fn first_log_seq(&self) -> u64 {
        self.logs_appended.saturating_sub(self.logs.len() as u64)
    }

    /// Log lines formatted for display, oldest first
    pub fn log_lines(&self) -> Vec<String> {
        self.logs.iter().map(ToString::to_string).collect()
    }
}

/// Cloneable handle to the shared session status
#[derive(Clone)]
pub struct SessionStatusModel {
    tx: Arc<watch::Sender<SessionSnapshot>>,
    /// Zero means unbounded
    log_capacity: usize,
}

impl SessionStatusModel {
    pub fn new(log_capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self {
            tx: Arc::new(tx),
            log_capacity,
        }
    }

    /// Overwrite the state of one channel. Observers are notified even when
    /// the state did not change.
    pub fn set_channel_state(&self, channel: Channel, state: ConnectionState) {
        self.tx.send_modify(|snapshot| {
            *snapshot.state_mut(channel) = state;
            snapshot.revision += 1;
        });
    }

    /// Append a log entry stamped with the current time
    pub fn append_log(&self, message: impl Into<String>) {
        let entry = LogEntry::new(message);
        let capacity = self.log_capacity;
        self.tx.send_modify(|snapshot| {
            snapshot.logs.push_back(entry);
            snapshot.logs_appended += 1;
            if capacity > 0 {
                while snapshot.logs.len() > capacity {
                    snapshot.logs.pop_front();
                }
            }
            snapshot.revision += 1;
        });
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    pub fn channel_state(&self, channel: Channel) -> ConnectionState {
        self.tx.borrow().state(channel).clone()
    }

    /// Receiver that wakes on every write
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for SessionStatusModel {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
