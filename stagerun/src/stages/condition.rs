//! Threshold check that escalates the enclosing loop.

use crate::core::event::Event;
use crate::core::state::number_value;
use crate::error::StageError;
use crate::stages::increment::read_number;
use crate::stages::{Stage, StageContext};

/// Escalates once `key >= target`. Absent keys read as 0.
#[derive(Debug, Clone)]
pub struct ConditionStage {
    name: String,
    description: String,
    key: String,
    target: f64,
}

impl ConditionStage {
    pub fn new(name: impl Into<String>, key: impl Into<String>, target: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            key: key.into(),
            target,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Stage for ConditionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        let value = read_number(ctx, &self.key)?;
        let shown = number_value(value);
        let target = number_value(self.target);
        ctx.audit.perceive(&self.name, &format!("state: {}", self.key), &shown);

        if value >= self.target {
            let message = format!("{} reached {shown} (target {target})", self.key);
            return Ok(vec![Event::message(&self.name, message).escalating()]);
        }
        let remaining = number_value(self.target - value);
        Ok(vec![Event::message(
            &self.name,
            format!("{} at {shown}, {remaining} remaining to {target}", self.key),
        )])
    }
}
