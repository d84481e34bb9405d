//! Network transport
//!
//! JSON-RPC over HTTP POST against a single endpoint URL. The server assigns
//! a session id on the first exchange (`mcp-session-id` header) which is
//! attached to every later request; an unknown session answers 404, which
//! is surfaced as the session-expired remote error. Responses are either a
//! JSON body or an SSE body; notifications found in either are forwarded.
//! A GET on the same URL, when offered, carries unsolicited events.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use seneca_protocol::messages::{
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, REGISTRATION_OPERATION,
};
use seneca_protocol::{
    parse_sse, tool_result_value, InitializeParams, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RegistrationRequest, RegistrationResponse, SseDecoder,
    SseEvent, ToolCallParams, TransportKind,
};
use seneca_utils::{Result, SenecaError};

use super::{forward_notification, parse_registration, remote_error, Transport};

/// Header carrying the server-side session id
pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_RESPONSE: &str = "application/json, text/event-stream";
const ACCEPT_STREAM: &str = "text/event-stream";

/// Delay before reopening an event stream that ended
const STREAM_RETRY: Duration = Duration::from_secs(1);

/// Upper bound on the session teardown request
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type SessionToken = Arc<RwLock<Option<String>>>;

/// HTTP session transport
pub struct NetworkTransport {
    http: reqwest::Client,
    url: Url,
    token: SessionToken,
    next_id: AtomicU64,
    inbound: mpsc::Sender<JsonRpcNotification>,
    closed: AtomicBool,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for NetworkTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkTransport")
            .field("url", &self.url.as_str())
            .field("has_session", &self.token.read().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl NetworkTransport {
    /// Open a session: handshake, then start the event-stream listener
    pub async fn connect(
        http: reqwest::Client,
        url: Url,
        client_label: &str,
        inbound: mpsc::Sender<JsonRpcNotification>,
        timeout: Duration,
    ) -> Result<Self> {
        let transport = Self {
            http,
            url,
            token: Arc::new(RwLock::new(None)),
            next_id: AtomicU64::new(1),
            inbound,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            listener: Mutex::new(None),
        };

        transport.initialize(client_label, timeout).await?;
        transport.start_listener();

        info!(
            url = %transport.url,
            session = transport.session_token().is_some(),
            "Network session established"
        );
        Ok(transport)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn session_token(&self) -> Option<String> {
        self.token.read().clone()
    }

    async fn initialize(&self, client_label: &str, timeout: Duration) -> Result<Value> {
        let params = serde_json::to_value(InitializeParams::for_client(client_label))
            .map_err(|e| SenecaError::internal(format!("encode initialize: {}", e)))?;
        let result = self.request(METHOD_INITIALIZE, params, timeout).await?;

        let initialized = JsonRpcNotification::new(METHOD_INITIALIZED, Value::Null);
        self.post(initialized.into(), None, METHOD_INITIALIZED, timeout)
            .await?;
        Ok(result)
    }

    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        if self.is_closed() {
            return Err(SenecaError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        match self.post(request.into(), Some(id), method, timeout).await? {
            Some(response) => response.into_result().map_err(remote_error),
            None => Err(SenecaError::protocol(format!("no response to {}", method))),
        }
    }

    /// POST one message; returns the response whose id equals `expect`
    async fn post(
        &self,
        message: JsonRpcMessage,
        expect: Option<u64>,
        operation: &str,
        timeout: Duration,
    ) -> Result<Option<JsonRpcResponse>> {
        let token = self.session_token();

        let mut builder = self
            .http
            .post(self.url.clone())
            .header(ACCEPT, ACCEPT_RESPONSE)
            .json(&message)
            .timeout(timeout);
        if let Some(token) = &token {
            builder = builder.header(SESSION_HEADER, token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| send_error(e, operation, timeout))?;

        if let Some(assigned) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.token.write() = Some(assigned.to_string());
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND && token.is_some() {
            debug!(url = %self.url, "Server no longer recognises our session");
            return Err(SenecaError::session_expired());
        }
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.to_string()
            } else {
                body
            };
            return Err(SenecaError::remote(i64::from(status.as_u16()), message));
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(ACCEPT_STREAM));

        let body = response
            .bytes()
            .await
            .map_err(|e| send_error(e, operation, timeout))?;
        if body.is_empty() {
            return Ok(None);
        }

        let messages: Vec<JsonRpcMessage> = if is_stream {
            parse_sse(&String::from_utf8_lossy(&body))
                .into_iter()
                .filter_map(|event| decode_event(&event))
                .collect()
        } else {
            let message = serde_json::from_slice(&body)
                .map_err(|e| SenecaError::InvalidMessage(format!("response body: {}", e)))?;
            vec![message]
        };

        let mut reply = None;
        for message in messages {
            match message {
                JsonRpcMessage::Response(resp) if expect.is_some() && resp.id_u64() == expect => {
                    reply = Some(resp);
                }
                JsonRpcMessage::Response(resp) => {
                    debug!(id = %resp.id, "Discarding response for another request");
                }
                JsonRpcMessage::Notification(notification) => {
                    forward_notification(&self.inbound, notification);
                }
                JsonRpcMessage::Request(req) => {
                    debug!(method = %req.method, "Ignoring server request on response stream");
                }
            }
        }
        Ok(reply)
    }

    fn start_listener(&self) {
        let http = self.http.clone();
        let url = self.url.clone();
        let token = self.token.clone();
        let inbound = self.inbound.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = listen(http, url, token, inbound) => {}
            }
        });
        *self.listener.lock() = Some(handle);
    }
}

fn send_error(err: reqwest::Error, operation: &str, timeout: Duration) -> SenecaError {
    if err.is_timeout() {
        SenecaError::Timeout {
            operation: operation.to_string(),
            millis: timeout.as_millis() as u64,
        }
    } else {
        debug!(error = %err, operation, "HTTP exchange failed");
        SenecaError::TransportClosed
    }
}

fn decode_event(event: &SseEvent) -> Option<JsonRpcMessage> {
    if event.data.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&event.data) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(error = %e, "Skipping undecodable SSE event");
            None
        }
    }
}

/// Keep the unsolicited-event stream open until the server says it has none
async fn listen(
    http: reqwest::Client,
    url: Url,
    token: SessionToken,
    inbound: mpsc::Sender<JsonRpcNotification>,
) {
    while stream_once(&http, &url, &token, &inbound).await {
        tokio::time::sleep(STREAM_RETRY).await;
    }
    debug!(url = %url, "Server offers no event stream");
}

/// One GET stream. Returns false if the server does not offer a stream.
async fn stream_once(
    http: &reqwest::Client,
    url: &Url,
    token: &SessionToken,
    inbound: &mpsc::Sender<JsonRpcNotification>,
) -> bool {
    let current = token.read().clone();
    let mut builder = http.get(url.clone()).header(ACCEPT, ACCEPT_STREAM);
    if let Some(current) = &current {
        builder = builder.header(SESSION_HEADER, current);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            debug!(error = %e, "Event stream request failed");
            return true;
        }
    };

    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => return false,
        status if !status.is_success() => {
            debug!(%status, "Event stream refused");
            return true;
        }
        _ => {}
    }

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "Event stream interrupted");
                break;
            }
        };
        for event in decoder.push(&chunk) {
            dispatch_stream_event(inbound, &event);
        }
    }
    if let Some(event) = decoder.finish() {
        dispatch_stream_event(inbound, &event);
    }
    true
}

fn dispatch_stream_event(inbound: &mpsc::Sender<JsonRpcNotification>, event: &SseEvent) {
    if let Some(JsonRpcMessage::Notification(notification)) = decode_event(event) {
        forward_notification(inbound, notification);
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn call(&self, operation: &str, arguments: Value, timeout: Duration) -> Result<Value> {
        let params = serde_json::to_value(ToolCallParams {
            name: operation.to_string(),
            arguments,
        })
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

    async fn register(
        &self,
        request: &RegistrationRequest,
        timeout: Duration,
    ) -> Result<RegistrationResponse> {
        let arguments = serde_json::to_value(request)
            .map_err(|e| SenecaError::internal(format!("encode registration: {}", e)))?;
        let value = self.call(REGISTRATION_OPERATION, arguments, timeout).await?;
        let response = parse_registration(value)?;

        // A transport-level session id takes precedence over the registration token
        if let Some(issued) = &response.session_token {
            let mut token = self.token.write();
            if token.is_none() {
                *token = Some(issued.clone());
            }
        }
        Ok(response)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();

        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }

        let token = self.token.write().take();
        if let Some(token) = token {
            let result = self
                .http
                .delete(self.url.clone())
                .header(SESSION_HEADER, token)
                .timeout(CLOSE_TIMEOUT)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Session teardown request failed");
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for NetworkTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
