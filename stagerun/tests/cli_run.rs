//! CLI tests for `stagerun`.
//!
//! Spawns the binary in a scratch directory and verifies exit codes for each
//! terminal run status, plus the `init`/`validate`/`report` round trip.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use stagerun::exit_codes;
use stagerun::io::audit_log::load_record;
use stagerun::io::config::{PipelineConfig, sample_config, write_config};

fn stagerun(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stagerun"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn stagerun")
}

fn record_path(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .find_map(|line| line.strip_prefix("record: "))
        .expect("record path in output")
        .to_string()
}

fn write_pipeline(dir: &Path, text: &str) {
    fs::write(dir.join("pipeline.toml"), text).expect("write pipeline");
}

const EXHAUSTING: &str = r#"
[seed]
progress = 0

[[nodes]]
kind = "loop"
name = "stalled"
max_iterations = 3

[[nodes.stages]]
type = "increment"
name = "noop"
key = "progress"
step = 0

[[nodes.stages]]
type = "condition"
name = "check"
key = "progress"
target = 100
"#;

#[test]
fn init_then_run_escalates_with_ok_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = stagerun(temp.path(), &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join("pipeline.toml").is_file());

    let validate = stagerun(temp.path(), &["validate"]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK));

    let run = stagerun(temp.path(), &["run", "--quiet"]);
    assert_eq!(run.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&run.stdout);
    assert!(stdout.contains(": escalated"));

    let record = load_record(&temp.path().join(record_path(&run.stdout))).expect("record");
    assert_eq!(record.final_state["progress"], 100);
    assert!(temp.path().join("logs").is_dir());
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(stagerun(temp.path(), &["init"]).status.code(), Some(0));
    let again = stagerun(temp.path(), &["init"]);
    assert_eq!(again.status.code(), Some(exit_codes::INVALID));
    let forced = stagerun(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[test]
fn exhausted_run_uses_exhausted_code_unless_allowed() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_pipeline(temp.path(), EXHAUSTING);

    let run = stagerun(temp.path(), &["run"]);
    assert_eq!(run.status.code(), Some(exit_codes::EXHAUSTED));

    let allowed = stagerun(temp.path(), &["run", "--exhausted-ok", "--quiet"]);
    assert_eq!(allowed.status.code(), Some(exit_codes::OK));
}

#[test]
fn failed_stage_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_pipeline(
        temp.path(),
        r#"
[[nodes]]
kind = "pipeline"
name = "p"

[[nodes.stages]]
type = "increment"
name = "bad"
key = "label"
step = 1
"#,
    );
    let run = stagerun(temp.path(), &["run", "--seed", r#"{"label": "text"}"#]);
    assert_eq!(run.status.code(), Some(exit_codes::INVALID));
    let stdout = String::from_utf8_lossy(&run.stdout);
    assert!(stdout.contains("[bad] failed:"));
    assert!(stdout.contains(": failed"));
}

#[test]
fn seed_flag_overrides_file_seed() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_pipeline(temp.path(), EXHAUSTING);
    let run = stagerun(
        temp.path(),
        &["run", "--quiet", "--seed", r#"{"progress": 100}"#],
    );
    assert_eq!(run.status.code(), Some(exit_codes::OK));
    let record = load_record(&temp.path().join(record_path(&run.stdout))).expect("record");
    assert_eq!(record.initial_state, serde_json::json!({"progress": 100}));
}

#[test]
fn invalid_pipeline_and_bad_seed_exit_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = stagerun(temp.path(), &["validate"]);
    assert_eq!(missing.status.code(), Some(exit_codes::INVALID));

    let mut cfg: PipelineConfig = sample_config();
    cfg.run.exhausted_ok = true;
    write_config(&temp.path().join("pipeline.toml"), &cfg).expect("write");
    let bad_seed = stagerun(temp.path(), &["run", "--seed", "[1, 2]"]);
    assert_eq!(bad_seed.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&bad_seed.stderr).contains("seed must be a JSON object"));
}

#[cfg(unix)]
#[test]
fn unwritable_log_dir_exits_with_audit_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_pipeline(temp.path(), EXHAUSTING);
    fs::write(temp.path().join("blocker"), "file").expect("write blocker");
    let run = stagerun(
        temp.path(),
        &["run", "--quiet", "--log-dir", "blocker/logs"],
    );
    assert_eq!(run.status.code(), Some(exit_codes::AUDIT_FAILURE));
}

#[cfg(unix)]
#[test]
fn log_dir_removed_mid_run_exits_with_audit_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_pipeline(
        temp.path(),
        r#"
[[nodes]]
kind = "pipeline"
name = "p"

[[nodes.stages]]
type = "command"
name = "cleanup"
command = ["rm", "-rf", "logs"]
"#,
    );
    let run = stagerun(temp.path(), &["run", "--quiet"]);
    assert_eq!(run.status.code(), Some(exit_codes::AUDIT_FAILURE));
    let stderr = String::from_utf8_lossy(&run.stderr);
    assert!(stderr.contains("audit record was lost"));
    assert!(stderr.contains("(pipeline status: success)"));
}

#[cfg(unix)]
#[test]
fn closed_stdout_still_persists_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(stagerun(temp.path(), &["init"]).status.code(), Some(0));

    let mut child = Command::new(env!("CARGO_BIN_EXE_stagerun"))
        .current_dir(temp.path())
        .arg("run")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn stagerun");
    drop(child.stdout.take());
    let status = child.wait().expect("wait");
    assert_eq!(status.code(), Some(exit_codes::OK));

    let records: Vec<_> = fs::read_dir(temp.path().join("logs"))
        .expect("read logs")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    assert_eq!(records.len(), 1);
    let record = load_record(&records[0]).expect("record");
    assert_eq!(record.final_state["progress"], 100);
}

#[test]
fn report_replays_entries() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(stagerun(temp.path(), &["init"]).status.code(), Some(0));
    let run = stagerun(temp.path(), &["run", "--quiet"]);
    let record_path = record_path(&run.stdout);
    let record = load_record(&temp.path().join(&record_path)).expect("record");

    let report = stagerun(temp.path(), &["report", &record_path]);
    assert_eq!(report.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&report.stdout);
    assert!(stdout.contains(&format!("run {}: escalated", record.run_id)));
    assert!(stdout.contains("[AGENT START] progress_incrementer"));
    assert!(stdout.contains("[EVENT] run_complete"));
}
