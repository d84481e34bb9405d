//! Transport endpoints
//!
//! An endpoint string is classified exactly once, when a descriptor or
//! configuration value is parsed: URLs become [`Endpoint::Network`], anything
//! else is a launch command for [`Endpoint::Pipe`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

/// Which wire transport a session runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking over stdin/stdout
    Pipe,
    /// HTTP request/response with a server-side session
    Network,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe => write!(f, "pipe"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Transport selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    /// Follow each descriptor's shape, falling back to its other form
    #[default]
    Auto,
    Pipe,
    Network,
}

impl TransportPreference {
    /// Whether an endpoint of `kind` may be used under this preference
    pub fn admits(&self, kind: TransportKind) -> bool {
        match self {
            Self::Auto => true,
            Self::Pipe => kind == TransportKind::Pipe,
            Self::Network => kind == TransportKind::Network,
        }
    }
}

impl FromStr for TransportPreference {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "pipe" | "stdio" => Ok(Self::Pipe),
            "network" | "http" => Ok(Self::Network),
            other => Err(EndpointError::UnknownTransport(other.to_string())),
        }
    }
}

impl fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Pipe => write!(f, "pipe"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// Endpoint parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint is empty")]
    Empty,

    #[error("invalid endpoint URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unsupported endpoint scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    #[error("unknown transport '{0}' (expected auto, pipe or network)")]
    UnknownTransport(String),
}

/// Command used to launch an orchestrator on a pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeEndpoint {
    pub program: String,
    pub args: Vec<String>,
}

impl PipeEndpoint {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// HTTP endpoint of an orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub url: Url,
}

/// A parsed, transport-tagged endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    Pipe(PipeEndpoint),
    Network(NetworkEndpoint),
}

impl Endpoint {
    /// Classify and parse an endpoint descriptor string
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EndpointError::Empty);
        }

        if input.contains("://") {
            let url = Url::parse(input).map_err(|e| EndpointError::InvalidUrl {
                input: input.to_string(),
                reason: e.to_string(),
            })?;
            return match url.scheme() {
                "http" | "https" => Ok(Self::Network(NetworkEndpoint { url })),
                other => Err(EndpointError::UnsupportedScheme(other.to_string())),
            };
        }

        let mut parts = input.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or(EndpointError::Empty)?;
        Ok(Self::Pipe(PipeEndpoint {
            program,
            args: parts.collect(),
        }))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Pipe(_) => TransportKind::Pipe,
            Self::Network(_) => TransportKind::Network,
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipe(pipe) => write!(f, "{}", pipe.command_line()),
            Self::Network(net) => write!(f, "{}", net.url),
        }
    }
}
