//! Shared data model
//!
//! Types that cross crate boundaries: registry descriptors, parsed
//! endpoints, events handed to the bus, and the typed operation set.

mod descriptor;
mod endpoint;
mod event;
mod operation;
pub(crate) mod time;

pub use descriptor::InstanceDescriptor;
pub use endpoint::{
    Endpoint, EndpointError, NetworkEndpoint, PipeEndpoint, TransportKind, TransportPreference,
};
pub use event::{Event, HISTORY_SOURCE};
pub use operation::{AllowedOperations, Operation};
pub use time::parse_timestamp;
