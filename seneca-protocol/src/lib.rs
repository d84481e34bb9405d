//! seneca-protocol: Wire definitions shared by the seneca crates
//!
//! This crate defines the JSON-RPC/MCP message types exchanged with an
//! orchestrator instance, the framing used on pipe transports, the SSE
//! parser used on network transports, and the data model (descriptors,
//! endpoints, events, operations) that flows between layers.

pub mod codec;
pub mod messages;
pub mod sse;
pub mod types;

// Re-export main types at crate root
pub use codec::{CodecError, Framing, JsonRpcCodec};
pub use messages::{
    tool_result_value, ClientInfo, InitializeParams, JsonRpcError, JsonRpcMessage,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RegistrationRequest,
    RegistrationResponse, ToolCallParams, ToolContent, ToolResult,
};
pub use sse::{parse_sse, SseDecoder, SseEvent};
pub use types::{
    parse_timestamp, AllowedOperations, Endpoint, EndpointError, Event, InstanceDescriptor,
    NetworkEndpoint, Operation, PipeEndpoint, TransportKind, TransportPreference,
};

/// MCP protocol revision sent during the initialize handshake
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Role this client declares at registration
pub const ROLE_OBSERVER: &str = "observer";
