//! Bounded numeric increment.

use serde_json::Value;
use tracing::debug;

use crate::core::event::Event;
use crate::core::state::number_value;
use crate::error::StageError;
use crate::stages::{Stage, StageContext};

/// Adds `step` to a numeric key (absent reads as 0), clamped to an optional
/// cap, and optionally bumps a counter key by one.
#[derive(Debug, Clone)]
pub struct IncrementStage {
    name: String,
    description: String,
    key: String,
    step: f64,
    cap: Option<f64>,
    counter_key: Option<String>,
}

impl IncrementStage {
    pub fn new(name: impl Into<String>, key: impl Into<String>, step: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            key: key.into(),
            step,
            cap: None,
            counter_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_cap(mut self, cap: f64) -> Self {
        self.cap = Some(cap);
        self
    }

    pub fn with_counter(mut self, key: impl Into<String>) -> Self {
        self.counter_key = Some(key.into());
        self
    }
}

/// Read `key` as a number; absent is 0, anything non-numeric is an error.
pub(crate) fn read_number(ctx: &StageContext<'_>, key: &str) -> Result<f64, StageError> {
    match ctx.state.get_opt(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(value) => value.as_f64().ok_or_else(|| StageError::InvalidState {
            key: key.to_string(),
            reason: format!("expected a number, found {value}"),
        }),
    }
}

impl Stage for IncrementStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.key)
    }

    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        let current = read_number(ctx, &self.key)?;
        ctx.audit.perceive(
            &self.name,
            &format!("state: {}", self.key),
            &number_value(current),
        );

        let mut next = current + self.step;
        if let Some(cap) = self.cap {
            next = next.min(cap);
        }
        let next_value = number_value(next);

        let counter = match &self.counter_key {
            Some(counter_key) => {
                let count = read_number(ctx, counter_key)? + 1.0;
                ctx.state.set(counter_key.as_str(), number_value(count));
                Some((counter_key.as_str(), number_value(count)))
            }
            None => None,
        };
        ctx.state.set(self.key.as_str(), next_value.clone());
        ctx.audit.act(
            &self.name,
            "increment",
            &format!("{} {} -> {next_value}", self.key, number_value(current)),
        );
        debug!(stage = %self.name, key = %self.key, value = %next_value, "incremented");

        let message = match counter {
            Some((counter_key, count)) => {
                format!("{} is now {next_value} ({counter_key} {count})", self.key)
            }
            None => format!("{} is now {next_value}", self.key),
        };
        Ok(vec![Event::message(&self.name, message)])
    }
}
