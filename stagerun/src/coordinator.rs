//! Run coordinator: owns one run's state store and audit logger, drives the
//! node graph and finalizes the audit record exactly once.

use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::path::PathBuf;

use anyhow::Result;
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument, warn};

use crate::audit::{AuditConfig, AuditLogger};
use crate::core::event::Event;
use crate::core::record::RunRecord;
use crate::core::state::StateStore;
use crate::core::types::RunStatus;
use crate::error::RunError;
use crate::io::audit_log::AuditPaths;
use crate::io::config::{NodeConfig, PipelineConfig, RunSettings, StageConfig};
use crate::looping::{LoopController, LoopStop};
use crate::pipeline::{StageFault, panic_message, run_pass};
use crate::stages::{Stage, build_stage};

/// One node of the run graph.
pub enum Node {
    /// Stages run once, in order. Escalation here is recorded but has no effect.
    Pipeline {
        name: String,
        stages: Vec<Box<dyn Stage>>,
    },
    Loop(LoopController),
}

impl Node {
    pub fn pipeline(name: impl Into<String>, stages: Vec<Box<dyn Stage>>) -> Self {
        Node::Pipeline {
            name: name.into(),
            stages,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Pipeline { name, .. } => name,
            Node::Loop(controller) => controller.name(),
        }
    }

    pub fn from_config(config: &NodeConfig, run: &RunSettings) -> Result<Self> {
        let build = |stages: &[StageConfig]| -> Vec<Box<dyn Stage>> {
            stages.iter().map(|stage| build_stage(stage, run)).collect()
        };
        match config {
            NodeConfig::Pipeline { name, stages } => Ok(Node::pipeline(name, build(stages))),
            NodeConfig::Loop {
                name,
                max_iterations,
                stages,
            } => Ok(Node::Loop(LoopController::new(
                name,
                *max_iterations,
                build(stages),
            )?)),
        }
    }
}

/// Build the run graph described by a validated pipeline file.
pub fn build_graph(config: &PipelineConfig) -> Result<Vec<Node>> {
    config
        .nodes
        .iter()
        .map(|node| Node::from_config(node, &config.run))
        .collect()
}

/// Result of a run whose audit record was persisted.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub paths: AuditPaths,
    pub record: RunRecord,
}

impl RunOutcome {
    pub fn final_state(&self) -> &Value {
        &self.record.final_state
    }
}

#[derive(Debug, Default)]
struct GraphResult {
    nodes_run: usize,
    fault: Option<StageFault>,
    escalated: bool,
    exhausted: bool,
}

impl GraphResult {
    fn status(&self) -> RunStatus {
        if self.fault.is_some() {
            RunStatus::Failed
        } else if self.exhausted {
            RunStatus::Exhausted
        } else if self.escalated {
            RunStatus::Escalated
        } else {
            RunStatus::Success
        }
    }
}

/// Creates per-run identity and drives a node graph to a terminal status.
#[derive(Debug, Clone, Default)]
pub struct RunCoordinator {
    audit: AuditConfig,
}

impl RunCoordinator {
    pub fn new(audit: AuditConfig) -> Self {
        Self { audit }
    }

    pub fn from_settings(settings: &RunSettings) -> Self {
        Self::new(AuditConfig {
            log_dir: settings.log_dir.clone(),
            summary_limit: settings.summary_limit,
        })
    }

    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.audit.log_dir = log_dir;
        self
    }

    /// Execute `graph` against `seed`, forwarding every event to `on_event`.
    ///
    /// A failed pipeline is an `Ok` outcome with status `failed`. `Err` means the
    /// audit trail could not be created or persisted. If `on_event` panics, the
    /// record is finalized as `failed` before the panic resumes.
    #[instrument(skip_all, fields(nodes = graph.len()))]
    pub fn run<F: FnMut(&Event)>(
        &self,
        graph: &[Node],
        seed: Map<String, Value>,
        mut on_event: F,
    ) -> Result<RunOutcome, RunError> {
        let mut audit = AuditLogger::create(&self.audit).map_err(RunError::AuditInit)?;
        let run_id = audit.run_id().to_string();
        let paths = audit.paths().clone();
        info!(run_id = %run_id, "run started");

        let mut state = StateStore::from_seed(seed);
        audit.set_initial_state(state.snapshot().into_value());
        audit.event("run_start", json!({"run_id": run_id, "nodes": graph.len()}));

        let driven = catch_unwind(AssertUnwindSafe(|| {
            drive(graph, &mut state, &mut audit, &mut on_event)
        }));
        let result = match driven {
            Ok(result) => result,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(run_id = %run_id, reason = %reason, "run aborted by panic");
                audit.event("run_failed", json!({"reason": reason}));
                audit.event(
                    "run_complete",
                    json!({"status": RunStatus::Failed.as_str(), "aborted": true}),
                );
                let final_state = state.snapshot().into_value();
                if let Err(err) = audit.finalize(RunStatus::Failed, final_state) {
                    warn!(run_id = %run_id, err = %err, "audit record not persisted");
                }
                resume_unwind(payload);
            }
        };
        let status = result.status();
        audit.event(
            "run_complete",
            json!({
                "status": status.as_str(),
                "nodes_run": result.nodes_run,
                "failed_stage": result.fault.as_ref().map(|f| f.stage.as_str()),
            }),
        );

        match audit.finalize(status, state.snapshot().into_value()) {
            Ok(record) => {
                info!(run_id = %run_id, status = %status, "run finished");
                Ok(RunOutcome {
                    run_id,
                    status,
                    paths,
                    record,
                })
            }
            Err(source) => {
                warn!(
                    run_id = %run_id,
                    status = %status,
                    err = %source,
                    "audit record not persisted"
                );
                Err(RunError::AuditPersistence { status, source })
            }
        }
    }
}

fn drive<F: FnMut(&Event)>(
    graph: &[Node],
    state: &mut StateStore,
    audit: &mut AuditLogger,
    on_event: &mut F,
) -> GraphResult {
    let mut result = GraphResult::default();
    for node in graph {
        result.nodes_run += 1;
        match node {
            Node::Pipeline { stages, .. } => {
                let pass = run_pass(stages, state, audit, on_event);
                result.escalated |= pass.escalated();
                if let Some(fault) = pass.fault {
                    result.fault = Some(fault);
                }
            }
            Node::Loop(controller) => {
                let outcome = controller.run(state, audit, on_event);
                match outcome.stop {
                    LoopStop::Escalated => result.escalated = true,
                    LoopStop::Exhausted => result.exhausted = true,
                    LoopStop::Faulted(fault) => result.fault = Some(fault),
                }
            }
        }
        if let Some(fault) = &result.fault {
            warn!(
                node = node.name(),
                stage = %fault.stage,
                "node faulted, skipping remaining nodes"
            );
            break;
        }
    }
    result
}
