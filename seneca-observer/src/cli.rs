//! Command-line argument parsing for the seneca observer
//!
//! Uses clap for argument parsing with derive macros. Flags override values
//! from the configuration file.

use clap::Parser;
use std::path::PathBuf;

use seneca_protocol::{Endpoint, TransportPreference};
use seneca_utils::{Result, SenecaError};

use crate::config::ObserverConfig;

/// seneca - read-only observer for Marcus orchestrator instances
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (default: <config_dir>/config.toml)
    #[arg(long, short = 'c', env = "SENECA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Transport selection: auto, pipe (stdio) or network (http)
    #[arg(long, env = "MARCUS_TRANSPORT")]
    pub transport: Option<String>,

    /// Connect to this endpoint instead of discovering instances
    ///
    /// Either an http(s) URL or a command line to spawn.
    /// Example: http://localhost:4298/mcp
    /// Example: "python -m marcus_mcp.server --stdio"
    #[arg(long, env = "MARCUS_HTTP_URL")]
    pub endpoint: Option<String>,

    /// Registry directory holding instance descriptors
    #[arg(long)]
    pub registry_dir: Option<PathBuf>,

    /// Conversation log directory used for backfill
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Do not replay conversation logs in log-only mode
    #[arg(long, default_value_t = false)]
    pub no_backfill: bool,

    /// Log filter directive (e.g. "info,seneca_link=debug")
    #[arg(long)]
    pub log_filter: Option<String>,
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Layer flag values over a loaded configuration
    pub fn apply(&self, config: &mut ObserverConfig) -> Result<()> {
        if let Some(transport) = &self.transport {
            config.link.transport = transport
                .parse::<TransportPreference>()
                .map_err(|e| SenecaError::config(e.to_string()))?;
        }

        if let Some(endpoint) = self.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
            config.link.endpoint =
                Some(Endpoint::parse(endpoint).map_err(|e| SenecaError::config(e.to_string()))?);
        }

        if let Some(dir) = &self.registry_dir {
            config.link.registry_dir = Some(dir.clone());
        }

        if let Some(dir) = &self.log_dir {
            config.history.log_dir = Some(dir.clone());
        }

        if self.no_backfill {
            config.history.backfill = false;
        }

        if let Some(filter) = &self.log_filter {
            config.log.filter = Some(filter.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seneca_protocol::TransportKind;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["seneca"]);
        assert!(!args.no_backfill);
        assert!(args.registry_dir.is_none());
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn test_apply_overrides() {
        let args = Args::parse_from([
            "seneca",
            "--transport",
            "stdio",
            "--endpoint",
            "marcus --stdio",
            "--registry-dir",
            "/tmp/services",
            "--no-backfill",
        ]);

        let mut config = ObserverConfig::default();
        args.apply(&mut config).unwrap();

        assert_eq!(config.link.transport, TransportPreference::Pipe);
        assert_eq!(
            config.link.endpoint.as_ref().map(Endpoint::kind),
            Some(TransportKind::Pipe)
        );
        assert_eq!(config.link.registry_dir, Some(PathBuf::from("/tmp/services")));
        assert!(!config.history.backfill);
    }

    #[test]
    fn test_apply_keeps_file_values() {
        let args = Args::parse_from(["seneca", "--log-filter", "debug"]);
        let mut config = ObserverConfig::default();
        config.link.client_label = "dashboard".into();

        args.apply(&mut config).unwrap();
        assert_eq!(config.link.client_label, "dashboard");
        assert_eq!(config.log.filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_apply_rejects_unknown_transport() {
        let args = Args::parse_from(["seneca", "--transport", "carrier-pigeon"]);
        let mut config = ObserverConfig::default();
        assert!(args.apply(&mut config).is_err());
    }

    #[test]
    fn test_apply_rejects_bad_endpoint() {
        let args = Args::parse_from(["seneca", "--endpoint", "ftp://example.com"]);
        let mut config = ObserverConfig::default();
        assert!(args.apply(&mut config).is_err());
    }
}
