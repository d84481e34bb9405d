//! Remote operations
//!
//! The remote returns the permitted set as plain names at registration.
//! Known names map onto [`Operation`] variants; anything newer is kept as
//! [`Operation::Other`] so permission checks still work by name.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Ping,
    Authenticate,
    GetProjectStatus,
    ListRegisteredAgents,
    GetAgentStatus,
    GetConversations,
    GetUsageReport,
    GetTaskAssignments,
    RegisterAgent,
    RequestNextTask,
    ReportTaskProgress,
    ReportBlocker,
    CreateProject,
    Other(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Authenticate => "authenticate",
            Self::GetProjectStatus => "get_project_status",
            Self::ListRegisteredAgents => "list_registered_agents",
            Self::GetAgentStatus => "get_agent_status",
            Self::GetConversations => "get_conversations",
            Self::GetUsageReport => "get_usage_report",
            Self::GetTaskAssignments => "get_task_assignments",
            Self::RegisterAgent => "register_agent",
            Self::RequestNextTask => "request_next_task",
            Self::ReportTaskProgress => "report_task_progress",
            Self::ReportBlocker => "report_blocker",
            Self::CreateProject => "create_project",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for Operation {
    fn from(name: &str) -> Self {
        match name {
            "ping" => Self::Ping,
            "authenticate" => Self::Authenticate,
            "get_project_status" => Self::GetProjectStatus,
            "list_registered_agents" => Self::ListRegisteredAgents,
            "get_agent_status" => Self::GetAgentStatus,
            "get_conversations" => Self::GetConversations,
            "get_usage_report" => Self::GetUsageReport,
            "get_task_assignments" => Self::GetTaskAssignments,
            "register_agent" => Self::RegisterAgent,
            "request_next_task" => Self::RequestNextTask,
            "report_task_progress" => Self::ReportTaskProgress,
            "report_blocker" => Self::ReportBlocker,
            "create_project" => Self::CreateProject,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for Operation {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation set granted to this client at registration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedOperations {
    names: HashSet<String>,
}

impl AllowedOperations {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permits(&self, op: &Operation) -> bool {
        self.names.contains(op.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.names.iter().map(|n| Operation::from(n.as_str()))
    }

    /// Names sorted for stable display
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FromIterator<Operation> for AllowedOperations {
    fn from_iter<T: IntoIterator<Item = Operation>>(iter: T) -> Self {
        Self::from_names(iter.into_iter().map(String::from))
    }
}
