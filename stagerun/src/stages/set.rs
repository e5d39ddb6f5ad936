//! Constant write.

use serde_json::Value;

use crate::core::event::Event;
use crate::error::StageError;
use crate::stages::{Stage, StageContext};

/// Writes a fixed JSON value to its output key.
#[derive(Debug, Clone)]
pub struct SetStage {
    name: String,
    description: String,
    output_key: String,
    value: Value,
}

impl SetStage {
    pub fn new(name: impl Into<String>, output_key: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            output_key: output_key.into(),
            value,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Stage for SetStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn output_key(&self) -> Option<&str> {
        Some(&self.output_key)
    }

    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        ctx.state.set(self.output_key.as_str(), self.value.clone());
        Ok(vec![Event::message(&self.name, self.value.clone())])
    }
}
