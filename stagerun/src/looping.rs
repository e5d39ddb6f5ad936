//! Escalation-driven loop over a stage list.

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::info;

use crate::audit::AuditLogger;
use crate::core::event::Event;
use crate::core::loop_state::{LoopMachine, LoopState};
use crate::core::state::StateStore;
use crate::pipeline::{StageFault, run_pass};
use crate::stages::Stage;

/// Reason why a loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// A stage requested escalation; the loop stopped after that pass.
    Escalated,
    /// `max_iterations` passes completed without escalation.
    Exhausted,
    /// A stage faulted; the loop stopped after the faulted pass.
    Faulted(StageFault),
}

impl LoopStop {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopStop::Escalated => "escalated",
            LoopStop::Exhausted => "exhausted",
            LoopStop::Faulted(_) => "faulted",
        }
    }
}

/// Summary of one loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub passes: u32,
    pub stop: LoopStop,
    /// All events from all passes, in order.
    pub events: Vec<Event>,
}

/// Re-runs its stages until one escalates or the iteration cap is reached.
pub struct LoopController {
    name: String,
    max_iterations: u32,
    stages: Vec<Box<dyn Stage>>,
}

impl LoopController {
    /// `max_iterations` must be at least 1.
    pub fn new(
        name: impl Into<String>,
        max_iterations: u32,
        stages: Vec<Box<dyn Stage>>,
    ) -> Result<Self> {
        let name = name.into();
        if max_iterations == 0 {
            return Err(anyhow!("loop '{name}': max_iterations must be >= 1"));
        }
        Ok(Self {
            name,
            max_iterations,
            stages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run passes until escalation, exhaustion or a stage fault.
    pub fn run<F: FnMut(&Event)>(
        &self,
        state: &mut StateStore,
        audit: &mut AuditLogger,
        on_event: &mut F,
    ) -> LoopOutcome {
        audit.event(
            "loop_start",
            json!({"loop": self.name, "max_iterations": self.max_iterations}),
        );
        let mut machine = LoopMachine::new(self.max_iterations);
        let mut events = Vec::new();
        let mut passes = 0u32;

        let stop = loop {
            passes += 1;
            audit.event("loop_pass_start", json!({"loop": self.name, "pass": passes}));
            let pass = run_pass(&self.stages, state, audit, on_event);
            let escalated = pass.escalated();
            audit.event(
                "loop_pass_complete",
                json!({"loop": self.name, "pass": passes, "escalated": escalated}),
            );
            events.extend(pass.events);

            if let Some(fault) = pass.fault {
                break LoopStop::Faulted(fault);
            }
            match machine.after_pass(escalated) {
                LoopState::Running => continue,
                LoopState::Escalated => break LoopStop::Escalated,
                LoopState::Exhausted => break LoopStop::Exhausted,
            }
        };

        audit.event(
            "loop_complete",
            json!({"loop": self.name, "passes": passes, "stop": stop.as_str()}),
        );
        info!(loop_name = %self.name, passes, stop = stop.as_str(), "loop finished");
        LoopOutcome {
            passes,
            stop,
            events,
        }
    }
}
