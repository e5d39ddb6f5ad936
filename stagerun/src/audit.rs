//! Per-run audit logger.
//!
//! One [`AuditLogger`] is created per run and lent to every component that
//! records into it; there is no process-wide instance. Every call appends a
//! [`LogEntry`] to the in-memory record and writes the same entry to the text
//! trace immediately, so both sinks share one total order.
//!
//! [`AuditLogger::finalize`] consumes the logger: the structured record is
//! written at most once per run, and only there. Entries recorded before a crash
//! that prevents finalize survive only in the trace.

use std::path::PathBuf;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::record::{ActionRecord, LogEntry, PerceptionRecord, PipelineEvent, RunRecord};
use crate::core::summary::{DEFAULT_SUMMARY_LIMIT, DataSummary, summarize};
use crate::core::types::{EntryKind, LogLevel, RunStatus};
use crate::error::AuditError;
use crate::io::audit_log::{AuditPaths, TraceWriter, claim_run_id, run_id_base, write_record};

/// Where and how a run's audit trail is written.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub log_dir: PathBuf,
    /// Characters kept from each payload summary.
    pub summary_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            summary_limit: DEFAULT_SUMMARY_LIMIT,
        }
    }
}

#[derive(Debug)]
pub struct AuditLogger {
    record: RunRecord,
    paths: AuditPaths,
    trace: TraceWriter,
    summary_limit: usize,
    trace_error: Option<AuditError>,
}

impl AuditLogger {
    /// Create the logger for a new run, claiming a time-derived run id.
    pub fn create(config: &AuditConfig) -> Result<Self, AuditError> {
        let started = Utc::now();
        let (run_id, paths, file) = claim_run_id(&config.log_dir, &run_id_base(started))?;
        debug!(run_id = %run_id, dir = %paths.dir.display(), "audit logger created");
        Ok(Self {
            record: RunRecord::new(&run_id, started),
            trace: TraceWriter::new(paths.trace_path.clone(), file),
            paths,
            summary_limit: config.summary_limit,
            trace_error: None,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.record.run_id
    }

    pub fn paths(&self) -> &AuditPaths {
        &self.paths
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.record.entries
    }

    pub fn set_initial_state(&mut self, state: Value) {
        self.record.initial_state = state;
    }

    /// Open a new stage record.
    pub fn start(&mut self, stage: &str, description: &str) {
        let now = Utc::now();
        self.record.open_stage(stage, description, now);
        let data = (!description.is_empty()).then(|| self.summary(&Value::from(description)));
        self.append(LogLevel::Info, EntryKind::AgentStart, Some(stage), "start", data);
    }

    /// Record what a stage received; counts the payload toward the byte total.
    pub fn perceive(&mut self, stage: &str, label: &str, data: &Value) {
        let now = Utc::now();
        let summary = self.summary(data);
        self.record.add_data_bytes(summary.size);
        match self.record.open_stage_mut(stage) {
            Some(open) => {
                open.input_summary = Some(summary.clone());
                open.perceptions.push(PerceptionRecord {
                    timestamp: now,
                    label: label.to_string(),
                    data: summary.clone(),
                });
            }
            None => warn!(stage, label, "perception for stage without an open record"),
        }
        self.append(
            LogLevel::Info,
            EntryKind::Perception,
            Some(stage),
            label,
            Some(summary),
        );
    }

    /// Record an action. An empty `detail` is treated as absent.
    pub fn act(&mut self, stage: &str, label: &str, detail: &str) {
        let now = Utc::now();
        let details = (!detail.is_empty()).then(|| detail.to_string());
        match self.record.open_stage_mut(stage) {
            Some(open) => open.actions.push(ActionRecord {
                timestamp: now,
                action: label.to_string(),
                details: details.clone(),
            }),
            None => warn!(stage, label, "action for stage without an open record"),
        }
        let data = details.map(|d| self.summary(&Value::from(d)));
        self.append(LogLevel::Info, EntryKind::Action, Some(stage), label, data);
    }

    /// Record a stage's principal result; counts the payload toward the byte total.
    pub fn output(&mut self, stage: &str, data: &Value) {
        let summary = self.summary(data);
        self.record.add_data_bytes(summary.size);
        match self.record.open_stage_mut(stage) {
            Some(open) => open.output_summary = Some(summary.clone()),
            None => warn!(stage, "output for stage without an open record"),
        }
        self.append(
            LogLevel::Info,
            EntryKind::Output,
            Some(stage),
            "output",
            Some(summary),
        );
    }

    /// Close the most recent open record named `stage`.
    pub fn complete(&mut self, stage: &str, success: bool, error: Option<&str>) {
        let now = Utc::now();
        if !self.record.close_stage(stage, success, error, now) {
            warn!(stage, "completion for stage without an open record");
        }
        let (level, label) = if success {
            (LogLevel::Info, "success")
        } else {
            (LogLevel::Error, "failed")
        };
        let data = error.map(|e| self.summary(&Value::from(e)));
        self.append(level, EntryKind::AgentComplete, Some(stage), label, data);
    }

    /// Record a pipeline-level event not tied to a stage.
    pub fn event(&mut self, kind: &str, data: Value) {
        let summary = self.summary(&data);
        self.record.events.push(PipelineEvent {
            timestamp: Utc::now(),
            kind: kind.to_string(),
            data,
        });
        self.append(
            LogLevel::Info,
            EntryKind::GenericEvent,
            None,
            kind,
            Some(summary),
        );
    }

    /// Close the run and persist the structured record.
    ///
    /// Consuming `self` makes a second finalize impossible. Returns the record
    /// as written.
    pub fn finalize(
        mut self,
        status: RunStatus,
        final_state: Value,
    ) -> Result<RunRecord, AuditError> {
        self.record.final_state = final_state;
        self.record.close(status, Utc::now());

        let record_result = write_record(&self.paths.record_path, &self.record);
        let flush_result = self.trace.flush();
        record_result?;
        flush_result?;
        if let Some(err) = self.trace_error.take() {
            return Err(err);
        }
        debug!(
            run_id = %self.record.run_id,
            status = %status,
            duration_seconds = ?self.record.metrics.duration_seconds,
            "run finalized"
        );
        Ok(self.record)
    }

    fn summary(&self, data: &Value) -> DataSummary {
        summarize(data, self.summary_limit)
    }

    fn append(
        &mut self,
        level: LogLevel,
        kind: EntryKind,
        stage: Option<&str>,
        label: &str,
        data: Option<DataSummary>,
    ) {
        let entry = LogEntry {
            seq: self.record.next_seq(),
            timestamp: Utc::now(),
            level,
            kind,
            stage: stage.map(str::to_string),
            label: label.to_string(),
            data,
        };
        if let Err(err) = self.trace.append(&entry) {
            warn!(err = %err, path = %self.trace.path().display(), "trace write failed");
            if self.trace_error.is_none() {
                self.trace_error = Some(err);
            }
        }
        self.record.entries.push(entry);
    }
}
