//! Durable audit sinks under the run's log directory.
//!
//! Each run owns two files, both named by run id:
//! - `pipeline_run_<id>.log`: append-only text trace, one line per entry,
//!   flushed as entries arrive.
//! - `pipeline_data_<id>.json`: structured run record, written once.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::core::record::{LogEntry, RunRecord};
use crate::core::summary::clip_line;
use crate::error::AuditError;

/// Longest message written on a single trace line.
const TRACE_LINE_LIMIT: usize = 300;
const MAX_RUN_ID_SUFFIX: u32 = 999;

/// Canonical file paths for one run.
#[derive(Debug, Clone)]
pub struct AuditPaths {
    pub dir: PathBuf,
    pub trace_path: PathBuf,
    pub record_path: PathBuf,
}

impl AuditPaths {
    pub fn new(dir: &Path, run_id: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            trace_path: dir.join(format!("pipeline_run_{run_id}.log")),
            record_path: dir.join(format!("pipeline_data_{run_id}.json")),
        }
    }
}

/// Time-derived base for run ids (`YYYYMMDD_HHMMSS`).
pub fn run_id_base(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Claim a unique run id in `dir` by exclusively creating its trace file.
///
/// Tries `base`, then `base-2`, `base-3`, ... so concurrent runs started within
/// the same second never share files.
pub fn claim_run_id(dir: &Path, base: &str) -> Result<(String, AuditPaths, File), AuditError> {
    fs::create_dir_all(dir).map_err(|err| AuditError::io(dir, err))?;
    for suffix in 1..=MAX_RUN_ID_SUFFIX {
        let id = if suffix == 1 {
            base.to_string()
        } else {
            format!("{base}-{suffix}")
        };
        let paths = AuditPaths::new(dir, &id);
        match OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&paths.trace_path)
        {
            Ok(file) => {
                debug!(run_id = %id, path = %paths.trace_path.display(), "claimed run id");
                return Ok((id, paths, file));
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(AuditError::io(&paths.trace_path, err)),
        }
    }
    Err(AuditError::RunIdExhausted {
        dir: dir.to_path_buf(),
        base: base.to_string(),
    })
}

/// Render one entry as a trace line (without the trailing newline).
///
/// A clipped line that also carries a truncated payload ends with the payload's
/// full size, since the summary suffix is lost to the clip.
pub fn format_trace_line(entry: &LogEntry) -> String {
    let message = entry.message();
    let mut line = format!(
        "{} | {:<8} | {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        entry.level.as_str(),
        clip_line(&message, TRACE_LINE_LIMIT)
    );
    if message.chars().count() > TRACE_LINE_LIMIT
        && let Some(data) = entry.data.as_ref().filter(|d| d.truncated)
    {
        line.push_str(&format!(" [payload {} bytes]", data.size));
    }
    line
}

/// Incremental writer for the text trace.
#[derive(Debug)]
pub struct TraceWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TraceWriter {
    pub fn new(path: PathBuf, file: File) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append and flush one entry so the trace survives a crash.
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), AuditError> {
        writeln!(self.writer, "{}", format_trace_line(entry))
            .and_then(|()| self.writer.flush())
            .map_err(|err| AuditError::io(&self.path, err))
    }

    pub fn flush(&mut self) -> Result<(), AuditError> {
        self.writer
            .flush()
            .map_err(|err| AuditError::io(&self.path, err))
    }
}

/// Atomically write the run record (temp file + rename).
pub fn write_record(path: &Path, record: &RunRecord) -> Result<(), AuditError> {
    let mut buf = serde_json::to_string_pretty(record)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).map_err(|err| AuditError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| AuditError::io(path, err))?;
    debug!(path = %path.display(), entries = record.entries.len(), "run record written");
    Ok(())
}

/// Load a persisted run record.
pub fn load_record(path: &Path) -> Result<RunRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run record {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse run record {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::summary::summarize;
    use crate::core::types::{EntryKind, LogLevel};

    fn entry(seq: u64, label: &str) -> LogEntry {
        LogEntry {
            seq,
            timestamp: Utc::now(),
            level: LogLevel::Info,
            kind: EntryKind::Action,
            stage: Some("worker".to_string()),
            label: label.to_string(),
            data: None,
        }
    }

    #[test]
    fn audit_paths_are_named_by_run_id() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = AuditPaths::new(temp.path(), "20261018_120000");
        assert!(paths.trace_path.ends_with("pipeline_run_20261018_120000.log"));
        assert!(paths.record_path.ends_with("pipeline_data_20261018_120000.json"));
    }

    #[test]
    fn claim_run_id_adds_suffix_when_taken() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (first, _, _) = claim_run_id(temp.path(), "base").expect("first");
        let (second, _, _) = claim_run_id(temp.path(), "base").expect("second");
        let (third, paths, _) = claim_run_id(temp.path(), "base").expect("third");
        assert_eq!(first, "base");
        assert_eq!(second, "base-2");
        assert_eq!(third, "base-3");
        assert!(paths.trace_path.is_file());
    }

    #[test]
    fn trace_writer_appends_one_line_per_entry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (_, paths, file) = claim_run_id(temp.path(), "run").expect("claim");
        let mut trace = TraceWriter::new(paths.trace_path.clone(), file);
        trace.append(&entry(1, "first")).expect("append");
        trace.append(&entry(2, "second")).expect("append");

        let contents = fs::read_to_string(&paths.trace_path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("| INFO     | [ACTION] worker: first"));
        assert!(lines[1].ends_with("[ACTION] worker: second"));
    }

    #[test]
    fn clipped_trace_line_keeps_payload_length() {
        let mut long = entry(1, "event");
        long.data = Some(summarize(&serde_json::json!("x".repeat(1200)), 500));
        let line = format_trace_line(&long);
        assert!(line.contains("total chars)"));
        assert!(line.ends_with(" [payload 1200 bytes]"));

        let short = format_trace_line(&entry(2, "brief"));
        assert!(!short.contains("total chars"));
        assert!(!short.contains("[payload"));
    }

    #[test]
    fn write_record_replaces_atomically_and_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pipeline_data_x.json");
        let mut record = RunRecord::new("x", Utc::now());
        record.entries.push(entry(1, "only"));

        write_record(&path, &record).expect("write");
        assert!(!path.with_extension("json.tmp").exists());
        let loaded = load_record(&path).expect("load");
        assert_eq!(loaded, record);
    }

    #[test]
    fn write_record_reports_unwritable_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("missing").join("record.json");
        let err = write_record(&path, &RunRecord::new("x", Utc::now())).unwrap_err();
        assert!(matches!(err, AuditError::Io { .. }));
    }
}
