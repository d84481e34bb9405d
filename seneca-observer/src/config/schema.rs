//! Configuration schema

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use seneca_link::{BusConfig, LinkConfig, LogReader};
use seneca_utils::{conversation_log_dir, LogConfig, LogOutput};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub link: LinkConfig,
    pub bus: BusConfig,
    pub history: HistoryConfig,
    pub log: LogSection,
}

/// Conversation log backfill settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Replay conversation logs while no instance is reachable (default: true)
    pub backfill: bool,
    /// Conversation log directory (default: `<state_dir>/conversations`)
    pub log_dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backfill: true,
            log_dir: None,
        }
    }
}

impl HistoryConfig {
    pub fn reader(&self) -> LogReader {
        match &self.log_dir {
            Some(dir) => LogReader::new(dir.clone()),
            None => LogReader::new(conversation_log_dir()),
        }
    }
}

/// Where log output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogTarget {
    #[default]
    Stderr,
    File,
    Both,
}

impl From<LogTarget> for LogOutput {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::Stderr => LogOutput::Stderr,
            LogTarget::File => LogOutput::File,
            LogTarget::Both => LogOutput::Both,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub output: LogTarget,
    /// Filter directive; when unset, `SENECA_LOG` or the preset default
    pub filter: Option<String>,
    /// Log file for `file`/`both` output (default: `<log_dir>/seneca.log`)
    pub file: Option<PathBuf>,
}

impl LogSection {
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = match self.output {
            LogTarget::Stderr => LogConfig::foreground(),
            LogTarget::File | LogTarget::Both => LogConfig::background(),
        }
        .with_output(self.output.into());

        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        if let Some(file) = &self.file {
            config = config.with_log_file(file.clone());
        }
        config
    }
}
