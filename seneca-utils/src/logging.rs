//! Logging setup for the seneca binaries
//!
//! Library crates only emit `tracing` events. The observer picks a preset,
//! optionally overrides the filter, and installs one subscriber with a
//! stderr layer, a file layer, or both.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{paths, Result, SenecaError};

/// Environment variable holding the log filter directive
pub const LOG_ENV_VAR: &str = "SENECA_LOG";

/// Target the observer writes received events under
pub const EVENTS_TARGET: &str = "seneca::events";

/// Interactive default: connection lifecycle and events, warnings elsewhere
const FOREGROUND_FILTER: &str = "warn,seneca_link=info,seneca::events=info";

/// Unattended default: everything at info, HTTP client noise muted
const BACKGROUND_FILTER: &str = "info,reqwest=warn,hyper=warn";

/// Log output destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stderr,
    File,
    Both,
}

impl LogOutput {
    fn to_stderr(self) -> bool {
        matches!(self, Self::Stderr | Self::Both)
    }

    fn to_file(self) -> bool {
        matches!(self, Self::File | Self::Both)
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub output: LogOutput,
    /// `EnvFilter` directive, e.g. "info,seneca_link=debug"
    pub filter: String,
    /// Include source file and line in each record
    pub file_line: bool,
    /// Log file; defaults to `<log_dir>/seneca.log`
    pub log_file: Option<PathBuf>,
}

impl LogConfig {
    /// Watching from a terminal: stderr only, `SENECA_LOG` or the foreground filter
    pub fn foreground() -> Self {
        Self {
            output: LogOutput::Stderr,
            filter: filter_from_env(FOREGROUND_FILTER),
            file_line: false,
            log_file: None,
        }
    }

    /// Running unattended: file output with source locations
    pub fn background() -> Self {
        Self {
            output: LogOutput::File,
            filter: filter_from_env(BACKGROUND_FILTER),
            file_line: true,
            log_file: None,
        }
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// Replace the filter directive, keeping everything else
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Where file output goes when enabled
    pub fn log_file_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| paths::log_dir().join("seneca.log"))
    }
}

fn filter_from_env(default: &str) -> String {
    std::env::var(LOG_ENV_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Install the global subscriber
///
/// Fails on an invalid filter, an unwritable log file, or when a subscriber
/// is already installed.
pub fn init_logging_with_config(config: LogConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| {
        SenecaError::config(format!("Invalid log filter '{}': {}", config.filter, e))
    })?;

    let stderr_layer = config.output.to_stderr().then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(config.file_line)
            .with_line_number(config.file_line)
    });

    let file_layer = if config.output.to_file() {
        let file = open_log_file(&config.log_file_path())?;
        Some(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_file(config.file_line)
                .with_line_number(config.file_line),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SenecaError::internal(format!("Failed to init logging: {}", e)))
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SenecaError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SenecaError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
}
