//! In-memory run record: the structured half of the audit trail.
//!
//! Pure bookkeeping only. Persisting the record and the text trace lives in
//! [`crate::io::audit_log`]; the logger that ties them together is
//! [`crate::audit::AuditLogger`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::summary::DataSummary;
use crate::core::types::{EntryKind, LogLevel, RunStatus, StageStatus};

/// One append-only audit entry. `seq` is strictly increasing within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataSummary>,
}

impl LogEntry {
    /// Single-line rendering used by the text trace.
    pub fn message(&self) -> String {
        let tag = self.kind.trace_tag();
        let stage = self.stage.as_deref().unwrap_or("-");
        let data = self.data.as_ref().map(|d| d.summary.as_str()).unwrap_or("");
        match self.kind {
            EntryKind::AgentStart if data.is_empty() => format!("[{tag}] {stage}"),
            EntryKind::AgentStart => format!("[{tag}] {stage}: {data}"),
            EntryKind::Perception => format!(
                "[{tag}] {stage} received {} ({} bytes)",
                self.label,
                self.data.as_ref().map_or(0, |d| d.size)
            ),
            EntryKind::Action if data.is_empty() => format!("[{tag}] {stage}: {}", self.label),
            EntryKind::Action => format!("[{tag}] {stage}: {} | {data}", self.label),
            EntryKind::Output => format!(
                "[{tag}] {stage} produced {} bytes",
                self.data.as_ref().map_or(0, |d| d.size)
            ),
            EntryKind::AgentComplete if self.level == LogLevel::Error => {
                format!("[AGENT FAILED] {stage} - {data}")
            }
            EntryKind::AgentComplete => format!("[{tag}] {stage}"),
            EntryKind::GenericEvent => format!("[{tag}] {}: {data}", self.label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub label: String,
    pub data: DataSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Everything recorded for one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: StageStatus,
    pub input_summary: Option<DataSummary>,
    pub output_summary: Option<DataSummary>,
    pub perceptions: Vec<PerceptionRecord>,
    pub actions: Vec<ActionRecord>,
    pub errors: Vec<String>,
}

impl StageRecord {
    fn open(name: &str, description: &str, at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            start_time: at,
            end_time: None,
            status: StageStatus::Running,
            input_summary: None,
            output_summary: None,
            perceptions: Vec::new(),
            actions: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == StageStatus::Running
    }
}

/// Pipeline-level event not tied to a stage (run start, loop passes, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_stages: u32,
    pub successful_stages: u32,
    pub failed_stages: u32,
    pub total_data_bytes: u64,
    pub duration_seconds: Option<f64>,
}

/// Structured record of a whole run, written once at finalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: Option<RunStatus>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub initial_state: Value,
    pub final_state: Value,
    pub stages: Vec<StageRecord>,
    pub events: Vec<PipelineEvent>,
    pub entries: Vec<LogEntry>,
    pub metrics: RunMetrics,
}

impl RunRecord {
    pub fn new(run_id: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: None,
            start_time,
            end_time: None,
            initial_state: Value::Object(Default::default()),
            final_state: Value::Object(Default::default()),
            stages: Vec::new(),
            events: Vec::new(),
            entries: Vec::new(),
            metrics: RunMetrics::default(),
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.entries.len() as u64 + 1
    }

    pub fn open_stage(&mut self, name: &str, description: &str, at: DateTime<Utc>) {
        self.stages.push(StageRecord::open(name, description, at));
        self.metrics.total_stages += 1;
    }

    /// Most recently started, still-open record for `name`.
    pub fn open_stage_mut(&mut self, name: &str) -> Option<&mut StageRecord> {
        self.stages
            .iter_mut()
            .rev()
            .find(|stage| stage.name == name && stage.is_open())
    }

    /// Close the most recent open record for `name`. Returns false when none is open.
    pub fn close_stage(
        &mut self,
        name: &str,
        success: bool,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> bool {
        if success {
            self.metrics.successful_stages += 1;
        } else {
            self.metrics.failed_stages += 1;
        }
        let Some(stage) = self.open_stage_mut(name) else {
            return false;
        };
        stage.end_time = Some(at);
        stage.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        if let Some(error) = error {
            stage.errors.push(error.to_string());
        }
        true
    }

    pub fn add_data_bytes(&mut self, bytes: usize) {
        self.metrics.total_data_bytes += bytes as u64;
    }

    /// Close the record: set end time, status and duration.
    pub fn close(&mut self, status: RunStatus, end_time: DateTime<Utc>) {
        self.status = Some(status);
        self.end_time = Some(end_time);
        let elapsed = end_time - self.start_time;
        let seconds = elapsed
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or_else(|| elapsed.num_milliseconds() as f64 / 1_000.0);
        self.metrics.duration_seconds = Some(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn complete_attaches_to_most_recent_open_start() {
        let now = Utc::now();
        let mut record = RunRecord::new("r", now);
        record.open_stage("worker", "first", now);
        record.open_stage("worker", "second", now);

        assert!(record.close_stage("worker", false, Some("boom"), now));
        assert_eq!(record.stages[0].status, StageStatus::Running);
        assert_eq!(record.stages[1].status, StageStatus::Failed);
        assert_eq!(record.stages[1].errors, vec!["boom".to_string()]);

        assert!(record.close_stage("worker", true, None, now));
        assert_eq!(record.stages[0].status, StageStatus::Success);
        assert_eq!(record.metrics.total_stages, 2);
        assert_eq!(record.metrics.successful_stages, 1);
        assert_eq!(record.metrics.failed_stages, 1);
    }

    #[test]
    fn closing_unknown_stage_still_counts() {
        let now = Utc::now();
        let mut record = RunRecord::new("r", now);
        assert!(!record.close_stage("ghost", true, None, now));
        assert_eq!(record.metrics.successful_stages, 1);
    }

    #[test]
    fn close_computes_duration() {
        let start = Utc::now();
        let mut record = RunRecord::new("r", start);
        record.close(RunStatus::Success, start + Duration::milliseconds(1500));
        assert_eq!(record.metrics.duration_seconds, Some(1.5));
        assert_eq!(record.status, Some(RunStatus::Success));
    }

    #[test]
    fn failed_completion_renders_error_message() {
        let entry = LogEntry {
            seq: 1,
            timestamp: Utc::now(),
            level: LogLevel::Error,
            kind: EntryKind::AgentComplete,
            stage: Some("fetch".to_string()),
            label: "failed".to_string(),
            data: Some(crate::core::summary::summarize(
                &Value::from("timeout"),
                100,
            )),
        };
        assert_eq!(entry.message(), "[AGENT FAILED] fetch - timeout");
    }
}
