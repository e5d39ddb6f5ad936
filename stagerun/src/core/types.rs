//! Shared status types for runs, stages and audit entries.
//!
//! These types define stable serialized contracts for the run record. Variant
//! names are part of the on-disk format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every node completed and no loop escalated or exhausted.
    Success,
    /// At least one loop stopped on an escalation request.
    Escalated,
    /// At least one loop hit its iteration cap.
    Exhausted,
    /// A stage faulted; remaining nodes were skipped.
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Escalated => "escalated",
            RunStatus::Exhausted => "exhausted",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one stage record in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Success,
    Failed,
}

/// Kind of an audit log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    AgentStart,
    Perception,
    Action,
    Output,
    AgentComplete,
    GenericEvent,
}

impl EntryKind {
    /// Tag used in the text trace.
    pub fn trace_tag(self) -> &'static str {
        match self {
            EntryKind::AgentStart => "AGENT START",
            EntryKind::Perception => "PERCEPTION",
            EntryKind::Action => "ACTION",
            EntryKind::Output => "OUTPUT",
            EntryKind::AgentComplete => "AGENT COMPLETE",
            EntryKind::GenericEvent => "EVENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Exhausted).expect("json"),
            "\"exhausted\""
        );
        assert_eq!(
            serde_json::to_string(&StageStatus::Failed).expect("json"),
            "\"failed\""
        );
        assert_eq!(
            serde_json::to_string(&EntryKind::GenericEvent).expect("json"),
            "\"generic_event\""
        );
        assert_eq!(
            serde_json::to_string(&LogLevel::Error).expect("json"),
            "\"ERROR\""
        );
    }
}
