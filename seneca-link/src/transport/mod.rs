//! Transport sessions
//!
//! One interface over two wires: a spawned child process speaking framed
//! JSON-RPC on stdin/stdout, and an HTTP endpoint with a server-side session.
//! Both surface the same error taxonomy so the manager applies one policy.

pub mod network;
pub mod pipe;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use seneca_protocol::messages::REGISTRATION_OPERATION;
use seneca_protocol::{
    Endpoint, Framing, JsonRpcError, JsonRpcNotification, RegistrationRequest,
    RegistrationResponse, TransportKind,
};
use seneca_utils::{Result, SenecaError};

use crate::config::LinkConfig;

pub use network::NetworkTransport;
pub use pipe::PipeTransport;

/// An open session to one orchestrator instance
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Invoke a remote operation
    ///
    /// Fails with `Timeout`, `Remote` or `TransportClosed`. A timed-out call
    /// abandons its response slot; the transport stays usable.
    async fn call(&self, operation: &str, arguments: Value, timeout: Duration) -> Result<Value>;

    /// Declare this client's role and learn the permitted operation set
    async fn register(
        &self,
        request: &RegistrationRequest,
        timeout: Duration,
    ) -> Result<RegistrationResponse> {
        let arguments = serde_json::to_value(request)
            .map_err(|e| SenecaError::internal(format!("encode registration: {}", e)))?;
        let value = self.call(REGISTRATION_OPERATION, arguments, timeout).await?;
        parse_registration(value)
    }

    /// Release the process handle or network session. Safe to call repeatedly.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Opens transports for endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and complete the protocol handshake
    ///
    /// Unsolicited notifications from the remote are pushed into `inbound`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        inbound: mpsc::Sender<JsonRpcNotification>,
    ) -> Result<Arc<dyn Transport>>;
}

/// Connector for the real pipe and network transports
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    client_label: String,
    framing: Framing,
    connect_timeout: Duration,
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn from_config(config: &LinkConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| SenecaError::config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client_label: config.client_label.clone(),
            framing: config.pipe_framing,
            connect_timeout: config.connect_timeout(),
            http,
        })
    }

    async fn open(
        &self,
        endpoint: &Endpoint,
        inbound: mpsc::Sender<JsonRpcNotification>,
    ) -> Result<Arc<dyn Transport>> {
        match endpoint {
            Endpoint::Pipe(pipe) => {
                let transport = PipeTransport::spawn(
                    pipe,
                    self.framing,
                    &self.client_label,
                    inbound,
                    self.connect_timeout,
                )
                .await?;
                Ok(Arc::new(transport))
            }
            Endpoint::Network(net) => {
                let transport = NetworkTransport::connect(
                    self.http.clone(),
                    net.url.clone(),
                    &self.client_label,
                    inbound,
                    self.connect_timeout,
                )
                .await?;
                Ok(Arc::new(transport))
            }
        }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        inbound: mpsc::Sender<JsonRpcNotification>,
    ) -> Result<Arc<dyn Transport>> {
        let millis = self.connect_timeout.as_millis() as u64;
        match tokio::time::timeout(self.connect_timeout, self.open(endpoint, inbound)).await {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e)) => Err(as_connect_error(endpoint, e)),
            Err(_) => Err(SenecaError::ConnectionTimeout { millis }),
        }
    }
}

/// Anything that goes wrong before the handshake completes is a connect failure
fn as_connect_error(endpoint: &Endpoint, err: SenecaError) -> SenecaError {
    match err {
        SenecaError::Connect(_)
        | SenecaError::ConnectionTimeout { .. }
        | SenecaError::Remote { .. } => err,
        SenecaError::Timeout { millis, .. } => SenecaError::ConnectionTimeout { millis },
        other => SenecaError::connect(format!("{}: {}", endpoint, other)),
    }
}

pub(crate) fn remote_error(err: JsonRpcError) -> SenecaError {
    SenecaError::remote(err.code, err.message)
}

pub(crate) fn parse_registration(value: Value) -> Result<RegistrationResponse> {
    if !value.is_object() {
        return Err(SenecaError::RegistrationRejected(format!(
            "unexpected registration response: {}",
            value
        )));
    }
    serde_json::from_value(value)
        .map_err(|e| {
            SenecaError::RegistrationRejected(format!("malformed registration response: {}", e))
        })
}

/// Queue a notification for the manager without waiting
///
/// A full buffer drops the notification; the read loop must never stall.
pub(crate) fn forward_notification(
    inbound: &mpsc::Sender<JsonRpcNotification>,
    notification: JsonRpcNotification,
) {
    match inbound.try_send(notification) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(n)) => {
            warn!(method = %n.method, "Inbound buffer full, notification dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
