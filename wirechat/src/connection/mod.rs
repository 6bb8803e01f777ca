//! Connection manager for `WireChat`.
//!
//! Owns the lifecycle of the single transport link to the chat endpoint:
//! connect, send, receive, detect failure, and reconnect with bounded
//! exponential backoff. It knows nothing about message semantics.
//!
//! The lifecycle rules live in [`machine::ConnectionMachine`], a pure state
//! machine. [`manager`] runs it inside a tokio task that funnels commands,
//! link events, and timer expiry through one loop.
//!
//! ```text
//!   disconnected ──connect()──► connecting ──open──► connected
//!        ▲                         ▲                     │
//!        │ clean close             │ timer               │ abnormal close
//!        └─────────────────────────┴──── disconnected ◄──┘
//!                                   (attempt < max: schedule retry)
//!                                   (attempt >= max: error, terminal)
//! ```

pub mod machine;
pub mod manager;

use std::fmt;
use std::time::Duration;

use crate::config::ReconnectConfig;

pub use manager::{ConnectionHandle, spawn};

/// Reported when the ceiling of automatic reconnect attempts is reached.
pub const ATTEMPTS_EXHAUSTED: &str =
    "Failed to connect after multiple attempts. Please check your connection.";

/// Reported when a payload is submitted while the link is down.
pub const NOT_CONNECTED: &str = "Cannot send message: not connected";

/// Default channel capacity for commands and events.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Externally visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionStatus {
    /// Opening a link.
    Connecting,
    /// A link is open and payloads can be sent.
    Connected,
    /// No link; a reconnect may be pending.
    #[default]
    Disconnected,
    /// A protocol failure, or the reconnect ceiling was hit.
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Snapshot of the connection manager's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Consecutive reconnect attempts since the last successful open.
    pub attempt: u32,
    /// Delay that the next scheduled reconnect will use.
    pub backoff: Duration,
    /// Last transport-level failure, cleared on successful open.
    pub last_error: Option<String>,
}

impl ConnectionState {
    /// Initial state for the given policy.
    #[must_use]
    pub fn new(policy: &ReconnectConfig) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            backoff: policy.delay_for_failure(1),
            last_error: None,
        }
    }
}

/// Events emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The status changed.
    StatusChanged(ConnectionStatus),
    /// One text frame arrived on the live link, content unmodified.
    Inbound(String),
    /// An automatic reconnect was scheduled.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Configured ceiling.
        max_attempts: u32,
        /// Delay before the attempt starts.
        delay: Duration,
    },
    /// A user-visible failure (ceiling reached, protocol error, failed send).
    Error(String),
}

/// Errors returned synchronously by [`ConnectionHandle`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The link is not open; nothing was queued.
    #[error("not connected")]
    NotConnected,

    /// The command queue is full.
    #[error("connection manager busy")]
    Busy,

    /// The connection manager task has exited.
    #[error("connection manager shut down")]
    Shutdown,
}

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint URL.
    pub url: String,
    /// Reconnect backoff policy.
    pub reconnect: ReconnectConfig,
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,
}

impl ConnectionConfig {
    /// Creates a `ConnectionConfig` with the default policy and capacity.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}
