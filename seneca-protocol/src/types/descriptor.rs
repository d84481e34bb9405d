//! Registry descriptor records
//!
//! One JSON file per running orchestrator instance. Files are written by the
//! orchestrator, so field names accept the legacy spellings as well.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::{Endpoint, TransportPreference};

/// One discovered orchestrator instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub instance_id: String,

    #[serde(alias = "pid")]
    pub process_id: u32,

    #[serde(default, alias = "project_name")]
    pub workspace_label: String,

    #[serde(alias = "mcp_command")]
    pub endpoint_descriptor: Endpoint,

    #[serde(default, alias = "http_endpoint", skip_serializing_if = "Option::is_none")]
    pub network_endpoint: Option<Endpoint>,

    #[serde(with = "super::time")]
    pub started_at: DateTime<Utc>,
}

impl InstanceDescriptor {
    /// Candidate endpoints in the order they should be tried
    ///
    /// The descriptor's own `endpoint_descriptor` comes first under `Auto`;
    /// the alternate form follows if present.
    pub fn endpoints(&self, preference: TransportPreference) -> Vec<Endpoint> {
        let mut out: Vec<Endpoint> = Vec::with_capacity(2);
        let candidates = std::iter::once(&self.endpoint_descriptor)
            .chain(self.network_endpoint.as_ref());

        for endpoint in candidates {
            if preference.admits(endpoint.kind()) && !out.contains(endpoint) {
                out.push(endpoint.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransportKind;

    fn sample(extra: &str) -> String {
        format!(
            r#"{{
                "instance_id": "marcus_1234",
                "pid": 1234,
                "project_name": "demo",
                "mcp_command": "python -m marcus_mcp.server",
                "started_at": "2025-06-01T09:30:00.500000"{}
            }}"#,
            extra
        )
    }

    #[test]
    fn test_parse_legacy_fields() {
        let d: InstanceDescriptor = serde_json::from_str(&sample("")).unwrap();
        assert_eq!(d.instance_id, "marcus_1234");
        assert_eq!(d.process_id, 1234);
        assert_eq!(d.workspace_label, "demo");
        assert_eq!(d.endpoint_descriptor.kind(), TransportKind::Pipe);
        assert!(d.network_endpoint.is_none());
    }

    #[test]
    fn test_parse_canonical_fields() {
        let json = r#"{
            "instance_id": "a",
            "process_id": 7,
            "endpoint_descriptor": "http://127.0.0.1:4298/mcp",
            "started_at": "2025-06-01T09:30:00Z"
        }"#;
        let d: InstanceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.endpoint_descriptor.kind(), TransportKind::Network);
        assert_eq!(d.workspace_label, "");
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let json = r#"{"instance_id": "a", "pid": 1, "started_at": "2025-06-01T09:30:00Z"}"#;
        assert!(serde_json::from_str::<InstanceDescriptor>(json).is_err());
    }

    #[test]
    fn test_endpoints_auto_order() {
        let d: InstanceDescriptor =
            serde_json::from_str(&sample(r#", "http_endpoint": "http://localhost:4298/mcp""#))
                .unwrap();

        let auto = d.endpoints(TransportPreference::Auto);
        assert_eq!(auto.len(), 2);
        assert_eq!(auto[0].kind(), TransportKind::Pipe);
        assert_eq!(auto[1].kind(), TransportKind::Network);

        let net = d.endpoints(TransportPreference::Network);
        assert_eq!(net.len(), 1);
        assert_eq!(net[0].kind(), TransportKind::Network);

        let pipe = d.endpoints(TransportPreference::Pipe);
        assert_eq!(pipe.len(), 1);
        assert_eq!(pipe[0].kind(), TransportKind::Pipe);
    }

    #[test]
    fn test_endpoints_none_for_preference() {
        let d: InstanceDescriptor = serde_json::from_str(&sample("")).unwrap();
        assert!(d.endpoints(TransportPreference::Network).is_empty());
    }
}
