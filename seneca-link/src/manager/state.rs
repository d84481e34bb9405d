use std::fmt;

use serde::Serialize;

/// Why the manager holds no connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// No reachable instance; consumers fall back to historical data
    LogOnly,
    /// Explicit shutdown; terminal
    Shutdown,
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum ConnectionState {
    /// Looking for instances in the registry
    Discovering,
    /// Opening a transport to a candidate endpoint
    Connecting,
    /// Declaring the observer role
    Registering,
    /// Session established and healthy
    Connected,
    /// Session lost; waiting out backoff before rediscovery
    Reconnecting,
    Disconnected(DisconnectReason),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_log_only(&self) -> bool {
        matches!(self, Self::Disconnected(DisconnectReason::LogOnly))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected(DisconnectReason::Shutdown))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovering => write!(f, "discovering"),
            Self::Connecting => write!(f, "connecting"),
            Self::Registering => write!(f, "registering"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Disconnected(DisconnectReason::LogOnly) => write!(f, "log-only"),
            Self::Disconnected(DisconnectReason::Shutdown) => write!(f, "shut down"),
        }
    }
}
