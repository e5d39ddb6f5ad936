//! `stagerun`: run a pipeline file and keep its audit trail.
//!
//! Reads `pipeline.toml` (see `stagerun init`), executes its graph of pipelines
//! and loops against a seed state, and writes `pipeline_run_<id>.log` and
//! `pipeline_data_<id>.json` into the configured log directory.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use stagerun::coordinator::{RunCoordinator, build_graph};
use stagerun::core::event::Event;
use stagerun::core::record::RunRecord;
use stagerun::core::types::RunStatus;
use stagerun::error::RunError;
use stagerun::exit_codes;
use stagerun::io::audit_log::{format_trace_line, load_record};
use stagerun::io::config::{
    DEFAULT_PIPELINE_FILE, PipelineConfig, load_config, load_seed_file, parse_seed, sample_config,
    write_config,
};
use stagerun::logging;

#[derive(Parser)]
#[command(
    name = "stagerun",
    version,
    about = "Stateful multi-stage pipeline executor with a durable audit trail"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a sample pipeline file (a bounded increment loop).
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_PIPELINE_FILE)]
        path: PathBuf,
    },
    /// Parse and validate a pipeline file.
    Validate {
        #[arg(long, default_value = DEFAULT_PIPELINE_FILE)]
        path: PathBuf,
    },
    /// Execute a pipeline file and persist its audit trail.
    Run {
        #[arg(long, default_value = DEFAULT_PIPELINE_FILE)]
        path: PathBuf,
        /// Seed state as a JSON object (overrides the file's `[seed]` table).
        #[arg(long, conflicts_with = "seed_file")]
        seed: Option<String>,
        /// Read the seed state from a JSON file.
        #[arg(long)]
        seed_file: Option<PathBuf>,
        /// Override `run.log_dir`.
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Exit 0 when a loop exhausts its iterations.
        #[arg(long)]
        exhausted_ok: bool,
        /// Do not print events as they arrive.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Summarize a persisted run record and replay its entries.
    Report { record: PathBuf },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force, path } => cmd_init(&path, force),
        Command::Validate { path } => cmd_validate(&path),
        Command::Run {
            path,
            seed,
            seed_file,
            log_dir,
            exhausted_ok,
            quiet,
        } => cmd_run(RunArgs {
            path,
            seed,
            seed_file,
            log_dir,
            exhausted_ok,
            quiet,
        }),
        Command::Report { record } => cmd_report(&record),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &sample_config())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(path: &Path) -> Result<i32> {
    let cfg = load_config(path)?;
    build_graph(&cfg)?;
    let stages: usize = cfg.nodes.iter().map(|node| node.stages().len()).sum();
    println!(
        "{}: ok ({} nodes, {} stages)",
        path.display(),
        cfg.nodes.len(),
        stages
    );
    Ok(exit_codes::OK)
}

struct RunArgs {
    path: PathBuf,
    seed: Option<String>,
    seed_file: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    exhausted_ok: bool,
    quiet: bool,
}

fn cmd_run(args: RunArgs) -> Result<i32> {
    let cfg = load_config(&args.path)?;
    let seed = resolve_seed(&cfg, args.seed.as_deref(), args.seed_file.as_deref())?;
    let graph = build_graph(&cfg)?;

    let mut coordinator = RunCoordinator::from_settings(&cfg.run);
    if let Some(dir) = args.log_dir {
        coordinator = coordinator.with_log_dir(dir);
    }
    let exhausted_ok = args.exhausted_ok || cfg.run.exhausted_ok;

    let mut out = io::stdout().lock();
    let mut printing = !args.quiet;
    let result = coordinator.run(&graph, seed, |event| {
        if printing && writeln!(out, "{}", render_event(event)).is_err() {
            printing = false;
        }
    });
    match result {
        Ok(outcome) => {
            let printed = print_summary(&mut out, &outcome.record).and_then(|()| {
                writeln!(out, "trace: {}", outcome.paths.trace_path.display())?;
                writeln!(out, "record: {}", outcome.paths.record_path.display())
            });
            tolerate_closed_stdout(printed)?;
            Ok(status_exit_code(outcome.status, exhausted_ok))
        }
        Err(err) => {
            eprintln!("{}", err_with_status(&err));
            Ok(exit_codes::AUDIT_FAILURE)
        }
    }
}

fn err_with_status(err: &RunError) -> String {
    match err.pipeline_status() {
        Some(status) => format!("{err} (pipeline status: {status})"),
        None => err.to_string(),
    }
}

fn cmd_report(path: &Path) -> Result<i32> {
    let record = load_record(path)?;
    let mut out = io::stdout().lock();
    let printed = print_summary(&mut out, &record).and_then(|()| {
        for entry in &record.entries {
            writeln!(out, "{}", format_trace_line(entry))?;
        }
        Ok(())
    });
    tolerate_closed_stdout(printed)?;
    Ok(exit_codes::OK)
}

/// A reader that went away (`stagerun run | head`) is not a failure.
fn tolerate_closed_stdout(result: io::Result<()>) -> Result<()> {
    match result {
        Err(err) if err.kind() != io::ErrorKind::BrokenPipe => {
            Err(anyhow::Error::new(err).context("write to stdout"))
        }
        _ => Ok(()),
    }
}

/// CLI seed wins over the pipeline file's `[seed]` table.
fn resolve_seed(
    cfg: &PipelineConfig,
    seed: Option<&str>,
    seed_file: Option<&Path>,
) -> Result<Map<String, Value>> {
    match (seed, seed_file) {
        (Some(text), _) => parse_seed(text),
        (None, Some(path)) => load_seed_file(path),
        (None, None) => Ok(cfg.seed.clone()),
    }
}

fn status_exit_code(status: RunStatus, exhausted_ok: bool) -> i32 {
    match status {
        RunStatus::Success | RunStatus::Escalated => exit_codes::OK,
        RunStatus::Exhausted if exhausted_ok => exit_codes::OK,
        RunStatus::Exhausted => exit_codes::EXHAUSTED,
        RunStatus::Failed => exit_codes::INVALID,
    }
}

fn render_event(event: &Event) -> String {
    let content = event.content_text().unwrap_or_default();
    match (&event.error, event.escalate) {
        (Some(error), _) => format!("[{}] failed: {error}", event.author),
        (None, true) => format!("[{}] {content} (escalate)", event.author),
        (None, false) => format!("[{}] {content}", event.author),
    }
}

fn print_summary(out: &mut impl Write, record: &RunRecord) -> io::Result<()> {
    let status = record.status.map_or("unfinished", RunStatus::as_str);
    let metrics = &record.metrics;
    writeln!(out, "run {}: {status}", record.run_id)?;
    writeln!(
        out,
        "stages: {} total, {} succeeded, {} failed",
        metrics.total_stages, metrics.successful_stages, metrics.failed_stages
    )?;
    match metrics.duration_seconds {
        Some(secs) => writeln!(out, "data: {} bytes in {secs:.3}s", metrics.total_data_bytes)?,
        None => writeln!(out, "data: {} bytes", metrics.total_data_bytes)?,
    }
    for stage in record.stages.iter().filter(|stage| !stage.errors.is_empty()) {
        writeln!(out, "error in {}: {}", stage.name, stage.errors.join("; "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["stagerun", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }

    #[test]
    fn parse_run_with_seed_and_log_dir() {
        let cli = Cli::parse_from([
            "stagerun",
            "run",
            "--seed",
            r#"{"progress": 0}"#,
            "--log-dir",
            "out",
            "--quiet",
        ]);
        match cli.command {
            Command::Run {
                path,
                seed,
                log_dir,
                quiet,
                exhausted_ok,
                ..
            } => {
                assert_eq!(path, PathBuf::from("pipeline.toml"));
                assert_eq!(seed.as_deref(), Some(r#"{"progress": 0}"#));
                assert_eq!(log_dir, Some(PathBuf::from("out")));
                assert!(quiet);
                assert!(!exhausted_ok);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn seed_and_seed_file_conflict() {
        let result = Cli::try_parse_from([
            "stagerun",
            "run",
            "--seed",
            "{}",
            "--seed-file",
            "seed.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn exit_codes_follow_status() {
        assert_eq!(status_exit_code(RunStatus::Escalated, false), exit_codes::OK);
        assert_eq!(
            status_exit_code(RunStatus::Exhausted, false),
            exit_codes::EXHAUSTED
        );
        assert_eq!(status_exit_code(RunStatus::Exhausted, true), exit_codes::OK);
        assert_eq!(status_exit_code(RunStatus::Failed, true), exit_codes::INVALID);
    }

    #[test]
    fn closed_stdout_is_tolerated() {
        let closed = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(tolerate_closed_stdout(Err(closed)).is_ok());
        let full = io::Error::from(io::ErrorKind::StorageFull);
        assert!(tolerate_closed_stdout(Err(full)).is_err());
    }

    #[test]
    fn summary_lists_stage_errors() {
        let mut record = RunRecord::new("r1", chrono::Utc::now());
        record.status = Some(RunStatus::Failed);
        let mut buf = Vec::new();
        print_summary(&mut buf, &record).expect("write");
        let text = String::from_utf8(buf).expect("utf8");
        assert!(text.starts_with("run r1: failed\n"));
        assert!(text.contains("stages: 0 total"));
    }

    #[test]
    fn render_event_marks_escalation_and_failure() {
        let escalate = Event::message("check", "done").escalating();
        assert_eq!(render_event(&escalate), "[check] done (escalate)");
        let failure = Event::failure("fetch", "timeout");
        assert_eq!(render_event(&failure), "[fetch] failed: timeout");
    }
}
