//! Pipe transport
//!
//! Runs the orchestrator as a child process and exchanges framed JSON-RPC
//! over its stdin/stdout. A read-loop task owns stdout: responses are routed
//! to the waiting caller by request id, notifications go to the inbound
//! channel, and server-initiated requests are answered in place.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seneca_protocol::messages::{
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_PING, METHOD_TOOLS_CALL,
};
use seneca_protocol::{
    tool_result_value, Framing, InitializeParams, JsonRpcCodec, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PipeEndpoint, ToolCallParams,
    TransportKind,
};
use seneca_utils::{Result, SenecaError};

use super::{forward_notification, remote_error, Transport};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct Shared {
    writer: Mutex<FramedWrite<BoxedWriter, JsonRpcCodec>>,
    pending: DashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    closed: AtomicBool,
}

impl Shared {
    async fn send(&self, message: JsonRpcMessage) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|e| {
            debug!(error = %e, "Pipe write failed");
            SenecaError::TransportClosed
        })
    }

    /// Mark closed and fail every waiting caller
    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the senders wakes callers with TransportClosed
        self.pending.clear();
    }

    async fn answer(&self, request: JsonRpcRequest) {
        let response = if request.method == METHOD_PING {
            JsonRpcResponse::success(request.id, json!({}))
        } else {
            debug!(method = %request.method, "Rejecting server request");
            JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    JsonRpcError::METHOD_NOT_FOUND,
                    format!("method not supported by client: {}", request.method),
                ),
            )
        };
        if let Err(e) = self.send(response.into()).await {
            debug!(error = %e, "Failed to answer server request");
        }
    }
}

/// Child-process transport
pub struct PipeTransport {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    child: parking_lot::Mutex<Option<Child>>,
}

impl std::fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeTransport")
            .field("pending", &self.shared.pending.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PipeTransport {
    /// Spawn the endpoint's command and complete the MCP handshake
    pub async fn spawn(
        endpoint: &PipeEndpoint,
        framing: Framing,
        client_label: &str,
        inbound: mpsc::Sender<JsonRpcNotification>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut child = Command::new(&endpoint.program)
            .args(&endpoint.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SenecaError::connect(format!(
                    "failed to spawn '{}': {}",
                    endpoint.command_line(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SenecaError::connect("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SenecaError::connect("child stdout unavailable"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "seneca_link::remote_stderr", "{}", line);
                }
            });
        }

        info!(
            pid = child.id(),
            command = %endpoint.command_line(),
            "Spawned orchestrator process"
        );

        let transport = Self::from_streams(stdout, stdin, framing, inbound);
        *transport.child.lock() = Some(child);

        if let Err(e) = transport.initialize(client_label, timeout).await {
            transport.close().await;
            return Err(e);
        }
        Ok(transport)
    }

    /// Build a transport over existing streams and start its read loop
    pub fn from_streams<R, W>(
        reader: R,
        writer: W,
        framing: Framing,
        inbound: mpsc::Sender<JsonRpcNotification>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        let shared = Arc::new(Shared {
            writer: Mutex::new(FramedWrite::new(writer, JsonRpcCodec::new(framing))),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        let cancel = CancellationToken::new();

        let frames = FramedRead::new(reader, JsonRpcCodec::new(framing));
        let handle = tokio::spawn(read_loop(frames, shared.clone(), inbound, cancel.clone()));

        Self {
            shared,
            next_id: AtomicU64::new(1),
            cancel,
            reader: parking_lot::Mutex::new(Some(handle)),
            child: parking_lot::Mutex::new(None),
        }
    }

    /// `initialize` request followed by the `initialized` notification
    pub async fn initialize(&self, client_label: &str, timeout: Duration) -> Result<Value> {
        let params = serde_json::to_value(InitializeParams::for_client(client_label))
            .map_err(|e| SenecaError::internal(format!("encode initialize: {}", e)))?;
        let result = self.request(METHOD_INITIALIZE, params, timeout).await?;

        self.shared
            .send(JsonRpcNotification::new(METHOD_INITIALIZED, Value::Null).into())
            .await?;
        Ok(result)
    }

    /// Send one request and wait for the response with the same id
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if self.is_closed() {
            return Err(SenecaError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        // The read loop may have shut down between the check and the insert
        if self.is_closed() {
            self.shared.pending.remove(&id);
            return Err(SenecaError::TransportClosed);
        }

        if let Err(e) = self.shared.send(JsonRpcRequest::new(id, method, params).into()).await {
            self.shared.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(remote_error),
            Ok(Err(_)) => Err(SenecaError::TransportClosed),
            Err(_) => {
                self.shared.pending.remove(&id);
                Err(SenecaError::Timeout {
                    operation: method.to_string(),
                    millis: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Calls waiting for a response
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, JsonRpcCodec>,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<JsonRpcNotification>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.next() => match frame {
                Some(Ok(JsonRpcMessage::Response(response))) => {
                    let waiter = response.id_u64().and_then(|id| shared.pending.remove(&id));
                    match waiter {
                        Some((_, tx)) => {
                            let _ = tx.send(response);
                        }
                        None => {
                            debug!(id = %response.id, "Discarding response with no waiting caller")
                        }
                    }
                }
                Some(Ok(JsonRpcMessage::Notification(notification))) => {
                    forward_notification(&inbound, notification);
                }
                Some(Ok(JsonRpcMessage::Request(request))) => {
                    shared.answer(request).await;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Malformed frame from orchestrator, closing pipe");
                    break;
                }
                None => {
                    info!("Orchestrator closed its output");
                    break;
                }
            }
        }
    }

    shared.shut();
}

#[async_trait]
impl Transport for PipeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Pipe
    }

    async fn call(&self, operation: &str, arguments: Value, timeout: Duration) -> Result<Value> {
        let params = ToolCallParams {
            name: operation.to_string(),
            arguments,
        };
        let params = serde_json::to_value(params)
            .map_err(|e| SenecaError::internal(format!("encode call: {}", e)))?;

        let result = self
            .request(METHOD_TOOLS_CALL, params, timeout)
            .await
            .map_err(|e| match e {
                SenecaError::Timeout { millis, .. } => SenecaError::Timeout {
                    operation: operation.to_string(),
                    millis,
                },
                other => other,
            })?;
        tool_result_value(result).map_err(remote_error)
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.shared.shut();

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            let _ = handle.await;
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Orchestrator process already gone");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type Remote = Framed<DuplexStream, JsonRpcCodec>;

    fn pair() -> (PipeTransport, Remote, mpsc::Receiver<JsonRpcNotification>) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(local);
        let (tx, rx) = mpsc::channel(16);
        let transport =
            PipeTransport::from_streams(read_half, write_half, Framing::LengthPrefixed, tx);
        (transport, Framed::new(remote, JsonRpcCodec::length_prefixed()), rx)
    }

    async fn next_request(remote: &mut Remote) -> JsonRpcRequest {
        match remote.next().await {
            Some(Ok(JsonRpcMessage::Request(req))) => req,
            other => panic!("expected request, got {:?}", other),
        }
    }

    fn tool_text(id: Value, text: &str) -> JsonRpcMessage {
        JsonRpcResponse::success(id, json!({"content": [{"type": "text", "text": text}]})).into()
    }

    const SECOND: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_call_returns_tool_payload() {
        let (transport, mut remote, _rx) = pair();

        let server = tokio::spawn(async move {
            let req = next_request(&mut remote).await;
            assert_eq!(req.method, "tools/call");
            assert_eq!(req.params["name"], "get_project_status");
            remote.send(tool_text(req.id, r#"{"tasks": 4}"#)).await.unwrap();
            remote
        });

        let value = transport
            .call("get_project_status", json!({}), SECOND)
            .await
            .unwrap();
        assert_eq!(value, json!({"tasks": 4}));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_matched_by_id() {
        let (transport, mut remote, _rx) = pair();
        let transport = Arc::new(transport);

        let server = tokio::spawn(async move {
            let first = next_request(&mut remote).await;
            let second = next_request(&mut remote).await;
            // Answer in reverse order
            for req in [second, first] {
                let name = req.params["name"].as_str().unwrap().to_string();
                remote.send(tool_text(req.id, &format!("\"{}\"", name))).await.unwrap();
            }
            remote
        });

        let a = transport.clone();
        let b = transport.clone();
        let (ra, rb) = tokio::join!(
            async move { a.call("alpha", json!({}), SECOND).await },
            async move { b.call("beta", json!({}), SECOND).await },
        );
        assert_eq!(ra.unwrap(), json!("alpha"));
        assert_eq!(rb.unwrap(), json!("beta"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_discarded() {
        let (transport, mut remote, _rx) = pair();

        let err = transport
            .call("slow", json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, SenecaError::Timeout { ref operation, .. } if operation == "slow"));
        assert_eq!(transport.pending_count(), 0);
        assert!(!transport.is_closed());

        let late = next_request(&mut remote).await;
        remote.send(tool_text(late.id, "\"late\"")).await.unwrap();

        let server = tokio::spawn(async move {
            let req = next_request(&mut remote).await;
            remote.send(tool_text(req.id, "\"fresh\"")).await.unwrap();
            remote
        });

        let value = transport.call("fast", json!({}), SECOND).await.unwrap();
        assert_eq!(value, json!("fresh"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_error_propagated() {
        let (transport, mut remote, _rx) = pair();

        tokio::spawn(async move {
            let req = next_request(&mut remote).await;
            let error = JsonRpcError::new(-32602, "missing project_id");
            remote.send(JsonRpcMessage::from(JsonRpcResponse::error(req.id, error))).await.unwrap();
            remote
        });

        let err = transport.call("get_agent_status", json!({}), SECOND).await.unwrap_err();
        assert!(matches!(
            err,
            SenecaError::Remote { code: -32602, ref message } if message == "missing project_id"
        ));
    }

    #[tokio::test]
    async fn test_tool_error_flag() {
        let (transport, mut remote, _rx) = pair();

        tokio::spawn(async move {
            let req = next_request(&mut remote).await;
            let result = json!({
                "content": [{"type": "text", "text": "no such agent"}],
                "isError": true
            });
            remote
                .send(JsonRpcMessage::from(JsonRpcResponse::success(req.id, result)))
                .await
                .unwrap();
            remote
        });

        let err = transport.call("get_agent_status", json!({}), SECOND).await.unwrap_err();
        assert!(matches!(err, SenecaError::Remote { code: JsonRpcError::TOOL_ERROR, .. }));
    }

    #[tokio::test]
    async fn test_notifications_forwarded() {
        let (_transport, mut remote, mut rx) = pair();

        let note =
            JsonRpcNotification::new("notifications/event", json!({"event_type": "task_assigned"}));
        remote.send(JsonRpcMessage::from(note)).await.unwrap();

        let received = tokio::time::timeout(SECOND, rx.recv()).await.unwrap().unwrap();
        assert_eq!(received.method, "notifications/event");
        assert_eq!(received.params["event_type"], "task_assigned");
    }

    #[tokio::test]
    async fn test_server_ping_answered() {
        let (_transport, mut remote, _rx) = pair();

        remote
            .send(JsonRpcMessage::from(JsonRpcRequest::new(99, "ping", Value::Null)))
            .await
            .unwrap();
        remote
            .send(JsonRpcMessage::from(JsonRpcRequest::new(
                100,
                "sampling/createMessage",
                Value::Null,
            )))
            .await
            .unwrap();

        match remote.next().await {
            Some(Ok(JsonRpcMessage::Response(resp))) => {
                assert_eq!(resp.id_u64(), Some(99));
                assert_eq!(resp.result, Some(json!({})));
            }
            other => panic!("expected ping response, got {:?}", other),
        }
        match remote.next().await {
            Some(Ok(JsonRpcMessage::Response(resp))) => {
                assert_eq!(resp.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remote_exit_fails_pending_call() {
        let (transport, mut remote, _rx) = pair();

        let server = tokio::spawn(async move {
            let _ = next_request(&mut remote).await;
            drop(remote);
        });

        let err = transport.call("anything", json!({}), SECOND * 5).await.unwrap_err();
        assert!(matches!(err, SenecaError::TransportClosed));
        server.await.unwrap();
        assert!(transport.is_closed());

        let err = transport.call("again", json!({}), SECOND).await.unwrap_err();
        assert!(matches!(err, SenecaError::TransportClosed));
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let (transport, mut remote, _rx) = pair();

        let server = tokio::spawn(async move {
            let req = next_request(&mut remote).await;
            assert_eq!(req.method, "initialize");
            assert_eq!(req.params["protocolVersion"], "2024-11-05");
            assert_eq!(req.params["clientInfo"]["name"], "seneca-test");
            remote
                .send(JsonRpcMessage::from(JsonRpcResponse::success(
                    req.id,
                    json!({"serverInfo": {"name": "marcus"}}),
                )))
                .await
                .unwrap();

            match remote.next().await {
                Some(Ok(JsonRpcMessage::Notification(n))) => {
                    assert_eq!(n.method, "notifications/initialized")
                }
                other => panic!("expected initialized notification, got {:?}", other),
            }
        });

        let info = transport.initialize("seneca-test", SECOND).await.unwrap();
        assert_eq!(info["serverInfo"]["name"], "marcus");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_idempotent() {
        let (transport, _remote, _rx) = pair();
        transport.close().await;
        transport.close().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let (tx, _rx) = mpsc::channel(1);
        let endpoint = PipeEndpoint {
            program: "/nonexistent/marcus-binary".into(),
            args: vec![],
        };
        let err = PipeTransport::spawn(&endpoint, Framing::LengthPrefixed, "seneca", tx, SECOND)
            .await
            .unwrap_err();
        assert!(matches!(err, SenecaError::Connect(_)));
    }
}
