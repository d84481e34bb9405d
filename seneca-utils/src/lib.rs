//! seneca-utils: Common utilities shared across seneca crates
//!
//! This crate provides:
//! - Unified error types ([`SenecaError`], [`Result`])
//! - Logging setup ([`init_logging_with_config`], [`LogConfig`])
//! - Per-user path utilities ([`paths`] module)

pub mod error;
pub mod logging;
pub mod paths;

// Re-export main types at crate root for convenience
pub use error::{Result, SenecaError, SESSION_EXPIRED_CODE, SESSION_EXPIRED_MESSAGE};
pub use logging::{init_logging_with_config, LogConfig, LogOutput, EVENTS_TARGET};

// Re-export commonly used path functions
pub use paths::{
    config_dir, config_file, conversation_log_dir, log_dir, registry_dir, state_dir,
};
