//! seneca-link: Connection & discovery layer
//!
//! Finds running orchestrator instances, keeps one role-scoped session to
//! them alive over a pipe or network transport, and fans inbound events out
//! to local subscribers.
//!
//! ```text
//! RegistryScanner -> ConnectionManager -> Transport -> EventBus -> consumers
//! ```

pub mod bus;
pub mod config;
pub mod history;
pub mod manager;
pub mod registry;
pub mod transport;

pub use bus::{BusConfig, BusStats, EventBus, EventFilter, SubscriberId, Subscription};
pub use config::{BackoffConfig, HealthConfig, LinkConfig};
pub use history::LogReader;
pub use manager::{ConnectionManager, ConnectionState, DisconnectReason, SessionInfo};
pub use registry::{Discover, OsProcessProbe, ProcessProbe, RegistryScanner};
pub use transport::{Connector, DefaultConnector, Transport};
