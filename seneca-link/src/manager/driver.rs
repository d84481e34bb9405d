//! Connection driver task
//!
//! Runs the state machine. It is the only writer of the session slot;
//! callers and the health monitor talk to it through the command channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seneca_protocol::{
    AllowedOperations, Endpoint, Event, JsonRpcNotification, RegistrationRequest, ROLE_OBSERVER,
};
use seneca_utils::SenecaError;

use super::backoff::Backoff;
use super::session::{Session, SessionInfo};
use super::state::{ConnectionState, DisconnectReason};
use crate::bus::EventBus;
use crate::config::{HealthConfig, LinkConfig};
use crate::registry::Discover;
use crate::transport::{Connector, Transport};

/// Instance id reported for a manually configured endpoint
pub const MANUAL_INSTANCE: &str = "manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectReason {
    HealthCheck,
    SessionExpired,
    TransportClosed,
    Requested,
}

impl ReconnectReason {
    fn as_str(&self) -> &'static str {
        match self {
            Self::HealthCheck => "health check failed",
            Self::SessionExpired => "session expired",
            Self::TransportClosed => "transport closed",
            Self::Requested => "requested",
        }
    }

    /// Reasons that skip the backoff wait
    fn is_immediate(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::Requested)
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    /// Drop the session if it is still `generation` (None: whatever is current)
    Reconnect {
        generation: Option<u64>,
        reason: ReconnectReason,
    },
}

/// State shared between the driver and the manager handle
pub(crate) struct Shared {
    pub(crate) config: LinkConfig,
    pub(crate) session: RwLock<Option<Arc<Session>>>,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) bus: EventBus,
    pub(crate) client_id: String,
}

impl Shared {
    pub(crate) fn current_session(&self) -> Option<Arc<Session>> {
        self.session.read().clone()
    }
}

enum Cycle {
    Shutdown,
    /// Nothing reachable
    LogOnly,
    /// Back off, then rediscover
    Retry,
    /// Rediscover without waiting
    Immediate,
}

struct Candidate {
    instance_id: String,
    endpoint: Endpoint,
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    discovery: Arc<dyn Discover>,
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command>,
    command_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    backoff: Backoff,
    generation: u64,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        discovery: Arc<dyn Discover>,
        connector: Arc<dyn Connector>,
        commands: mpsc::Receiver<Command>,
        command_tx: mpsc::Sender<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let backoff = Backoff::new(shared.config.backoff.clone());
        Self {
            shared,
            discovery,
            connector,
            commands,
            command_tx,
            cancel,
            backoff,
            generation: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.cycle().await {
                Cycle::Shutdown => break,
                Cycle::LogOnly => {
                    self.set_state(ConnectionState::Disconnected(DisconnectReason::LogOnly));
                    if !self.wait_backoff().await {
                        break;
                    }
                }
                Cycle::Retry => {
                    self.set_state(ConnectionState::Reconnecting);
                    if !self.wait_backoff().await {
                        break;
                    }
                }
                Cycle::Immediate => {
                    self.set_state(ConnectionState::Reconnecting);
                    self.backoff.reset();
                }
            }
        }

        self.set_state(ConnectionState::Disconnected(DisconnectReason::Shutdown));
        info!("Connection manager stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.shared.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "State transition");
        }
    }

    /// Wait out the next backoff delay. Returns false on shutdown.
    async fn wait_backoff(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.attempt(),
            "Waiting before next attempt"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect { generation: None, .. }) => {
                        info!("Reconnect requested, skipping backoff");
                        self.backoff.reset();
                        return true;
                    }
                    // Addressed to a session that no longer exists
                    Some(Command::Reconnect { .. }) => {}
                    None => return false,
                },
            }
        }
    }

    async fn candidates(&self) -> Vec<Candidate> {
        if let Some(endpoint) = &self.shared.config.endpoint {
            return vec![Candidate {
                instance_id: MANUAL_INSTANCE.to_string(),
                endpoint: endpoint.clone(),
            }];
        }

        let discovery = self.discovery.clone();
        let descriptors = match tokio::task::spawn_blocking(move || discovery.discover()).await {
            Ok(descriptors) => descriptors,
            Err(e) => {
                warn!(error = %e, "Discovery task failed");
                Vec::new()
            }
        };

        let preference = self.shared.config.transport;
        descriptors
            .into_iter()
            .flat_map(|descriptor| {
                descriptor
                    .endpoints(preference)
                    .into_iter()
                    .map(move |endpoint| Candidate {
                        instance_id: descriptor.instance_id.clone(),
                        endpoint,
                    })
            })
            .collect()
    }

    async fn cycle(&mut self) -> Cycle {
        self.set_state(ConnectionState::Discovering);
        let candidates = self.candidates().await;

        if candidates.is_empty() {
            info!("No orchestrator instances found, running in log-only mode");
            return Cycle::LogOnly;
        }

        for candidate in &candidates {
            if self.cancel.is_cancelled() {
                return Cycle::Shutdown;
            }
            self.set_state(ConnectionState::Connecting);

            let (inbound_tx, inbound_rx) = mpsc::channel(self.shared.config.inbound_buffer);
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return Cycle::Shutdown,
                result = self.connector.connect(&candidate.endpoint, inbound_tx) => result,
            };

            let transport = match connected {
                Ok(transport) => transport,
                Err(e) => {
                    warn!(
                        instance_id = %candidate.instance_id,
                        endpoint = %candidate.endpoint,
                        error = %e,
                        "Connect failed"
                    );
                    continue;
                }
            };

            return match self.register(candidate, transport).await {
                Ok(session) => self.run_session(session, inbound_rx).await,
                Err(cycle) => cycle,
            };
        }

        warn!(candidates = candidates.len(), "All candidates failed, running in log-only mode");
        Cycle::LogOnly
    }

    async fn register(
        &mut self,
        candidate: &Candidate,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Session>, Cycle> {
        self.set_state(ConnectionState::Registering);

        let request =
            RegistrationRequest::observer(&self.shared.client_id, &self.shared.config.client_label);
        let timeout = self.shared.config.call_timeout();

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                transport.close().await;
                return Err(Cycle::Shutdown);
            }
            result = transport.register(&request, timeout) => result,
        };

        let allowed = outcome.and_then(|response| {
            let allowed =
                AllowedOperations::from_names(response.allowed_operations.iter().cloned());
            if response.is_rejected() || allowed.is_empty() {
                Err(SenecaError::RegistrationRejected(
                    response
                        .message
                        .unwrap_or_else(|| "no operations granted".to_string()),
                ))
            } else {
                Ok(allowed)
            }
        });

        let allowed = match allowed {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(instance_id = %candidate.instance_id, error = %e, "Registration failed");
                transport.close().await;
                return Err(Cycle::Retry);
            }
        };

        self.generation += 1;
        let session = Arc::new(Session {
            info: SessionInfo {
                transport_kind: transport.kind(),
                remote_instance_id: candidate.instance_id.clone(),
                endpoint: candidate.endpoint.to_string(),
                role: ROLE_OBSERVER.to_string(),
                allowed_operations: allowed,
                generation: self.generation,
                connected_at: Utc::now(),
            },
            transport,
        });

        info!(
            instance_id = %session.info.remote_instance_id,
            transport = %session.info.transport_kind,
            operations = session.info.allowed_operations.len(),
            generation = session.info.generation,
            "Registered as observer"
        );
        Ok(session)
    }

    async fn run_session(
        &mut self,
        session: Arc<Session>,
        mut inbound: mpsc::Receiver<JsonRpcNotification>,
    ) -> Cycle {
        *self.shared.session.write() = Some(session.clone());
        self.backoff.reset();
        self.set_state(ConnectionState::Connected);

        let monitor_cancel = self.cancel.child_token();
        let monitor = spawn_health_monitor(
            session.transport.clone(),
            self.shared.config.health.clone(),
            self.shared.config.client_label.clone(),
            self.command_tx.clone(),
            session.info.generation,
            monitor_cancel.clone(),
        );

        let source = session.info.remote_instance_id.clone();
        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break Cycle::Shutdown,

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Reconnect { generation, reason })
                        if generation.map_or(true, |g| g == session.info.generation) =>
                    {
                        info!(instance_id = %source, reason = reason.as_str(), "Dropping session");
                        break if reason.is_immediate() { Cycle::Immediate } else { Cycle::Retry };
                    }
                    Some(Command::Reconnect { .. }) => {
                        debug!("Ignoring reconnect for an older session")
                    }
                    None => break Cycle::Shutdown,
                },

                notification = inbound.recv() => match notification {
                    Some(notification) => {
                        let event = Event::from_notification(source.as_str(), notification);
                        self.shared.bus.publish(event);
                    }
                    None => {
                        warn!(instance_id = %source, "Transport closed");
                        break Cycle::Retry;
                    }
                },
            }
        };

        monitor_cancel.cancel();
        let _ = monitor.await;

        self.shared.session.write().take();
        session.transport.close().await;
        outcome
    }
}

/// Probe the session on a fixed interval; ask for a reconnect after
/// `failure_threshold` consecutive failures
pub(crate) fn spawn_health_monitor(
    transport: Arc<dyn Transport>,
    config: HealthConfig,
    client_label: String,
    commands: mpsc::Sender<Command>,
    generation: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(config.interval_ms);
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = interval.tick() => {
                    let probe =
                        transport.call(&config.operation, json!({ "echo": client_label }), timeout);
                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => break,
                        outcome = probe => outcome,
                    };
                    match outcome {
                        Ok(_) => {
                            if failures > 0 {
                                debug!(failures, "Health probe recovered");
                            }
                            failures = 0;
                        }
                        Err(e) if e.is_session_expired() => {
                            info!(generation, "Session expired during health probe");
                            let _ = commands
                                .send(Command::Reconnect {
                                    generation: Some(generation),
                                    reason: ReconnectReason::SessionExpired,
                                })
                                .await;
                            break;
                        }
                        Err(e) => {
                            failures += 1;
                            warn!(
                                failures,
                                threshold = config.failure_threshold,
                                error = %e,
                                "Health probe failed"
                            );
                            if failures >= config.failure_threshold {
                                let _ = commands
                                    .send(Command::Reconnect {
                                        generation: Some(generation),
                                        reason: ReconnectReason::HealthCheck,
                                    })
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        }

        debug!(generation, "Health monitor task exiting");
    })
}
