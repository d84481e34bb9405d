//! Connection manager
//!
//! Presents a single logical remote to the rest of the process. A background
//! driver task walks the lifecycle
//!
//! ```text
//! Discovering -> Connecting -> Registering -> Connected
//!      ^                                         |
//!      +------------- Reconnecting <-------------+
//! ```
//!
//! with `Disconnected(LogOnly)` as the steady state when nothing is
//! reachable and `Disconnected(Shutdown)` only after [`ConnectionManager::shutdown`].

mod backoff;
mod driver;
mod session;
mod state;


use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use seneca_protocol::Operation;
use seneca_utils::{Result, SenecaError};

use crate::bus::{EventBus, EventFilter, Subscription};
use crate::config::LinkConfig;
use crate::registry::{Discover, RegistryScanner};
use crate::transport::{Connector, DefaultConnector};

use driver::{Command, Driver, ReconnectReason, Shared};
use session::Session;

pub use backoff::Backoff;
pub use driver::MANUAL_INSTANCE;
pub use session::SessionInfo;
pub use state::{ConnectionState, DisconnectReason};

const COMMAND_BUFFER: usize = 16;

/// Handle to the connection driver
///
/// Owned by whatever composes the process and passed by reference to
/// anything that needs remote calls. Dropping it stops the driver.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Start with the registry scanner and the real transports
    pub fn start(config: LinkConfig, bus: EventBus) -> Result<Self> {
        let discovery = Arc::new(RegistryScanner::new(config.resolved_registry_dir()));
        let connector = Arc::new(DefaultConnector::from_config(&config)?);
        Self::start_with(config, bus, discovery, connector)
    }

    /// Start with caller-supplied discovery and transports
    pub fn start_with(
        config: LinkConfig,
        bus: EventBus,
        discovery: Arc<dyn Discover>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Discovering);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            config,
            session: RwLock::new(None),
            state_tx,
            bus,
            client_id: format!("seneca-{}", Uuid::new_v4()),
        });

        let driver = Driver::new(
            shared.clone(),
            discovery,
            connector,
            command_rx,
            command_tx.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(driver.run());

        info!(client_id = %shared.client_id, "Connection manager started");

        Ok(Self {
            shared,
            commands: command_tx,
            state_rx,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Snapshot of the active session, if connected
    pub fn session(&self) -> Option<SessionInfo> {
        self.shared.current_session().map(|s| s.info.clone())
    }

    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.shared.bus.subscribe(filter)
    }

    /// Invoke a remote operation with the configured call timeout
    pub async fn call(&self, operation: impl Into<Operation>, arguments: Value) -> Result<Value> {
        let timeout = self.shared.config.call_timeout();
        self.call_with_timeout(operation, arguments, timeout).await
    }

    /// Invoke a remote operation
    ///
    /// Operations outside the granted set fail locally with
    /// `OperationNotPermitted`. An expired session is replaced and the call
    /// retried once on the new session.
    pub async fn call_with_timeout(
        &self,
        operation: impl Into<Operation>,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let operation = operation.into();
        let session = self.require_session()?;

        match Self::invoke(&session, &operation, arguments.clone(), timeout).await {
            Err(e) if e.is_session_expired() => {
                let generation = session.info.generation;
                info!(
                    generation,
                    operation = %operation,
                    "Session expired, reconnecting before retry"
                );
                drop(session);

                self.request_reconnect(Some(generation), ReconnectReason::SessionExpired)
                    .await;
                let fresh = self.wait_for_session_after(generation).await?;
                Self::invoke(&fresh, &operation, arguments, timeout).await
            }
            Err(SenecaError::TransportClosed) => {
                let generation = Some(session.info.generation);
                self.request_reconnect(generation, ReconnectReason::TransportClosed)
                    .await;
                Err(SenecaError::TransportClosed)
            }
            other => other,
        }
    }

    /// Drop the current session and rediscover without waiting for backoff
    pub async fn reconnect(&self) -> Result<()> {
        self.commands
            .send(Command::Reconnect {
                generation: None,
                reason: ReconnectReason::Requested,
            })
            .await
            .map_err(|_| SenecaError::internal("connection manager stopped"))
    }

    /// Stop the driver; the state becomes `Disconnected(Shutdown)`
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(error = %e, "Driver task ended abnormally");
            }
        }
    }

    async fn invoke(
        session: &Session,
        operation: &Operation,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !session.info.allowed_operations.permits(operation) {
            return Err(SenecaError::OperationNotPermitted(operation.to_string()));
        }
        session
            .transport
            .call(operation.as_str(), arguments, timeout)
            .await
    }

    fn require_session(&self) -> Result<Arc<Session>> {
        self.shared
            .current_session()
            .ok_or_else(|| SenecaError::NotConnected {
                state: self.state().to_string(),
            })
    }

    async fn request_reconnect(&self, generation: Option<u64>, reason: ReconnectReason) {
        let _ = self
            .commands
            .send(Command::Reconnect { generation, reason })
            .await;
    }

    /// Wait for a session newer than `generation`
    ///
    /// Gives up when the driver settles in log-only mode or the reconnect
    /// window elapses.
    async fn wait_for_session_after(&self, generation: u64) -> Result<Arc<Session>> {
        let mut state_rx = self.state_rx.clone();
        let window = self.shared.config.reconnect_wait();

        let wait = async {
            loop {
                let current = self.shared.current_session();
                if let Some(session) = current.filter(|s| s.info.generation > generation) {
                    return Ok(session);
                }

                let state = *state_rx.borrow_and_update();
                if matches!(state, ConnectionState::Disconnected(_)) {
                    return Err(SenecaError::NotConnected {
                        state: state.to_string(),
                    });
                }

                if state_rx.changed().await.is_err() {
                    return Err(SenecaError::NotConnected {
                        state: self.state().to_string(),
                    });
                }
            }
        };

        match tokio::time::timeout(window, wait).await {
            Ok(result) => result,
            Err(_) => Err(SenecaError::NotConnected {
                state: self.state().to_string(),
            }),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
