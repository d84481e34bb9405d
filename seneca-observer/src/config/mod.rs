//! Observer configuration
//!
//! A TOML file (missing means defaults) with CLI flags layered on top.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::ObserverConfig;
