use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use seneca_protocol::{AllowedOperations, TransportKind};

use crate::transport::Transport;

/// Snapshot of the active session for display and health reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub transport_kind: TransportKind,
    pub remote_instance_id: String,
    pub endpoint: String,
    /// Always "observer"
    pub role: String,
    pub allowed_operations: AllowedOperations,
    /// Increments on every successful registration
    pub generation: u64,
    pub connected_at: DateTime<Utc>,
}

/// The live session. Only the driver task creates or clears it.
pub(crate) struct Session {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) info: SessionInfo,
}
