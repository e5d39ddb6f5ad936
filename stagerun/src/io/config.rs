//! Pipeline file (`pipeline.toml`): run settings, seed state and the node graph.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::summary::DEFAULT_SUMMARY_LIMIT;

pub const DEFAULT_PIPELINE_FILE: &str = "pipeline.toml";

/// Pipeline configuration (TOML).
///
/// Edited by humans. Missing `[run]` fields default to the values in
/// [`RunSettings::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub run: RunSettings,

    /// Initial state for every run; overridden by `--seed` / `--seed-file`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub seed: Map<String, Value>,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunSettings {
    /// Directory holding `pipeline_run_<id>.log` and `pipeline_data_<id>.json`.
    pub log_dir: PathBuf,

    /// Characters kept from each audit payload summary.
    pub summary_limit: usize,

    /// Treat an exhausted loop as a successful exit.
    pub exhausted_ok: bool,

    /// Truncate command capability output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            summary_limit: DEFAULT_SUMMARY_LIMIT,
            exhausted_ok: false,
            output_limit_bytes: 100_000,
        }
    }
}

/// One node of the run graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Stages run once, in order.
    Pipeline {
        name: String,
        stages: Vec<StageConfig>,
    },
    /// Stages re-run until one escalates or `max_iterations` passes complete.
    Loop {
        name: String,
        max_iterations: u32,
        stages: Vec<StageConfig>,
    },
}

impl NodeConfig {
    pub fn name(&self) -> &str {
        match self {
            NodeConfig::Pipeline { name, .. } | NodeConfig::Loop { name, .. } => name,
        }
    }

    pub fn stages(&self) -> &[StageConfig] {
        match self {
            NodeConfig::Pipeline { stages, .. } | NodeConfig::Loop { stages, .. } => stages,
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

/// A built-in stage, selected by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageConfig {
    Increment {
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
        key: String,
        step: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cap: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counter_key: Option<String>,
    },
    Condition {
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
        key: String,
        target: f64,
    },
    Set {
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
        output_key: String,
        value: Value,
    },
    Complete {
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
        template: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_key: Option<String>,
        #[serde(default)]
        escalate: bool,
    },
    Command {
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        description: String,
        command: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_key: Option<String>,
        #[serde(default)]
        require_input: bool,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required_env: Vec<String>,
    },
}

impl StageConfig {
    pub fn name(&self) -> &str {
        match self {
            StageConfig::Increment { name, .. }
            | StageConfig::Condition { name, .. }
            | StageConfig::Set { name, .. }
            | StageConfig::Complete { name, .. }
            | StageConfig::Command { name, .. } => name,
        }
    }

    fn validate(&self) -> Result<()> {
        let name = self.name();
        match self {
            StageConfig::Increment { key, step, cap, .. } => {
                require_key(name, "key", key)?;
                if !step.is_finite() {
                    return Err(anyhow!("stage '{name}': step must be finite"));
                }
                if cap.is_some_and(|c| !c.is_finite()) {
                    return Err(anyhow!("stage '{name}': cap must be finite"));
                }
            }
            StageConfig::Condition { key, target, .. } => {
                require_key(name, "key", key)?;
                if !target.is_finite() {
                    return Err(anyhow!("stage '{name}': target must be finite"));
                }
            }
            StageConfig::Set { output_key, .. } => require_key(name, "output_key", output_key)?,
            StageConfig::Complete { template, .. } => {
                if template.trim().is_empty() {
                    return Err(anyhow!("stage '{name}': template must not be empty"));
                }
            }
            StageConfig::Command {
                command,
                timeout_secs,
                ..
            } => {
                if command.is_empty() || command[0].trim().is_empty() {
                    return Err(anyhow!("stage '{name}': command must be a non-empty array"));
                }
                if *timeout_secs == 0 {
                    return Err(anyhow!("stage '{name}': timeout_secs must be > 0"));
                }
            }
        }
        Ok(())
    }
}

fn require_key(stage: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("stage '{stage}': {field} must not be empty"));
    }
    Ok(())
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run.summary_limit == 0 {
            return Err(anyhow!("run.summary_limit must be > 0"));
        }
        if self.run.output_limit_bytes == 0 {
            return Err(anyhow!("run.output_limit_bytes must be > 0"));
        }
        if self.nodes.is_empty() {
            return Err(anyhow!("pipeline must define at least one node"));
        }
        for node in &self.nodes {
            let node_name = node.name();
            if node_name.trim().is_empty() {
                return Err(anyhow!("node name must not be empty"));
            }
            if let NodeConfig::Loop { max_iterations, .. } = node
                && *max_iterations == 0
            {
                return Err(anyhow!("loop '{node_name}': max_iterations must be >= 1"));
            }
            if node.stages().is_empty() {
                return Err(anyhow!("node '{node_name}' must contain at least one stage"));
            }
            let mut seen = HashSet::new();
            for stage in node.stages() {
                if stage.name().trim().is_empty() {
                    return Err(anyhow!("node '{node_name}': stage name must not be empty"));
                }
                if !seen.insert(stage.name()) {
                    return Err(anyhow!(
                        "node '{node_name}': duplicate stage name '{}'",
                        stage.name()
                    ));
                }
                stage.validate()?;
            }
        }
        Ok(())
    }
}

/// The sample pipeline written by `stagerun init`: a bounded increment loop.
pub fn sample_config() -> PipelineConfig {
    let mut seed = Map::new();
    seed.insert("progress".to_string(), Value::from(0));
    seed.insert("iteration".to_string(), Value::from(0));
    PipelineConfig {
        run: RunSettings::default(),
        seed,
        nodes: vec![
            NodeConfig::Loop {
                name: "progress_loop".to_string(),
                max_iterations: 8,
                stages: vec![
                    StageConfig::Increment {
                        name: "progress_incrementer".to_string(),
                        description: "Advance progress by a fixed step".to_string(),
                        key: "progress".to_string(),
                        step: 17.0,
                        cap: Some(100.0),
                        counter_key: Some("iteration".to_string()),
                    },
                    StageConfig::Condition {
                        name: "condition_checker".to_string(),
                        description: "Stop once progress reaches the target".to_string(),
                        key: "progress".to_string(),
                        target: 100.0,
                    },
                ],
            },
            NodeConfig::Pipeline {
                name: "wrap_up".to_string(),
                stages: vec![StageConfig::Complete {
                    name: "completion".to_string(),
                    description: "Report the final progress".to_string(),
                    template: "Reached {{ progress }}% after {{ iteration }} iterations".to_string(),
                    output_key: Some("completion_message".to_string()),
                    escalate: false,
                }],
            },
        ],
    }
}

/// Load and validate a pipeline file. A missing file is an error.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read pipeline file {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid pipeline file {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write a pipeline file (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize pipeline toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp pipeline file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace pipeline file {}", path.display()))?;
    Ok(())
}

/// Parse a seed given as JSON text. Only objects are accepted.
pub fn parse_seed(text: &str) -> Result<Map<String, Value>> {
    let value: Value = serde_json::from_str(text).context("parse seed json")?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!(
            "seed must be a JSON object, got {}",
            json_kind(&other)
        )),
    }
}

pub fn load_seed_file(path: &Path) -> Result<Map<String, Value>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read seed file {}", path.display()))?;
    parse_seed(&contents).with_context(|| format!("seed file {}", path.display()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
