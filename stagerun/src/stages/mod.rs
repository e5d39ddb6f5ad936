//! Stage abstraction and the built-in stages.
//!
//! A [`Stage`] is an opaque, possibly fallible unit of work. It reads and writes
//! the shared [`StateStore`] through a [`StageContext`] and returns the events it
//! produced. The executor owns everything around the call: audit bracketing,
//! rollback on fault, and forwarding events.

use std::time::Duration;

use crate::audit::AuditLogger;
use crate::core::event::Event;
use crate::core::state::StateStore;
use crate::error::StageError;
use crate::io::capability::CommandCapability;
use crate::io::config::{RunSettings, StageConfig};

pub mod capability;
pub mod completion;
pub mod condition;
pub mod increment;
pub mod set;

pub use capability::CapabilityStage;
pub use completion::CompletionStage;
pub use condition::ConditionStage;
pub use increment::IncrementStage;
pub use set::SetStage;

/// What a stage may touch during one invocation.
pub struct StageContext<'a> {
    pub state: &'a mut StateStore,
    /// Lets a stage record perceptions and actions under its own name.
    pub audit: &'a mut AuditLogger,
}

impl<'a> StageContext<'a> {
    pub fn new(state: &'a mut StateStore, audit: &'a mut AuditLogger) -> Self {
        Self { state, audit }
    }
}

pub trait Stage {
    /// Unique within its pipeline; used as the event author and audit stage name.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// State key holding the stage's principal result, if it writes one.
    fn output_key(&self) -> Option<&str> {
        None
    }

    /// Run once to completion against the current state.
    ///
    /// Events are buffered per invocation: the executor records and forwards
    /// them, in order, only after `invoke` returns, and always before the next
    /// stage starts. A stage that faults delivers none of its events.
    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError>;
}

/// Build a stage from its pipeline-file description.
pub fn build_stage(config: &StageConfig, run: &RunSettings) -> Box<dyn Stage> {
    match config {
        StageConfig::Increment {
            name,
            description,
            key,
            step,
            cap,
            counter_key,
        } => {
            let mut stage = IncrementStage::new(name, key, *step).with_description(description);
            if let Some(cap) = cap {
                stage = stage.with_cap(*cap);
            }
            if let Some(counter) = counter_key {
                stage = stage.with_counter(counter);
            }
            Box::new(stage)
        }
        StageConfig::Condition {
            name,
            description,
            key,
            target,
        } => Box::new(ConditionStage::new(name, key, *target).with_description(description)),
        StageConfig::Set {
            name,
            description,
            output_key,
            value,
        } => Box::new(SetStage::new(name, output_key, value.clone()).with_description(description)),
        StageConfig::Complete {
            name,
            description,
            template,
            output_key,
            escalate,
        } => {
            let mut stage = CompletionStage::new(name, template).with_description(description);
            if let Some(key) = output_key {
                stage = stage.with_output_key(key);
            }
            if *escalate {
                stage = stage.escalating();
            }
            Box::new(stage)
        }
        StageConfig::Command {
            name,
            description,
            command,
            input_key,
            output_key,
            require_input,
            timeout_secs,
            required_env,
        } => {
            let capability = CommandCapability::new(name, command.clone())
                .with_timeout(Duration::from_secs(*timeout_secs))
                .with_output_limit(run.output_limit_bytes)
                .with_required_env(required_env.clone());
            let mut stage = CapabilityStage::new(name, Box::new(capability))
                .with_description(description)
                .requiring_input(*require_input);
            if let Some(key) = input_key {
                stage = stage.with_input_key(key);
            }
            if let Some(key) = output_key {
                stage = stage.with_output_key(key);
            }
            Box::new(stage)
        }
    }
}
