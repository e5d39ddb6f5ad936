//! Templated completion message rendered from the current state.

use minijinja::Environment;
use tracing::debug;

use crate::core::event::Event;
use crate::error::StageError;
use crate::stages::{Stage, StageContext};

/// Renders a minijinja template with every state key as a variable.
///
/// Unknown variables render empty. When `escalate` is set the emitted event
/// requests escalation, which lets a completion stage end a loop.
#[derive(Debug, Clone)]
pub struct CompletionStage {
    name: String,
    description: String,
    template: String,
    output_key: Option<String>,
    escalate: bool,
}

impl CompletionStage {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            template: template.into(),
            output_key: None,
            escalate: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }
}

impl Stage for CompletionStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        let snapshot = ctx.state.snapshot();
        ctx.audit.perceive(&self.name, "state", &snapshot.clone().into_value());

        let env = Environment::new();
        let rendered = env
            .render_str(&self.template, &snapshot)
            .map_err(|err| StageError::Template(err.to_string()))?;
        debug!(stage = %self.name, bytes = rendered.len(), "rendered completion");

        if let Some(key) = &self.output_key {
            ctx.state.set(key.as_str(), rendered.as_str());
        }
        let event = Event::message(&self.name, rendered);
        Ok(vec![if self.escalate {
            event.escalating()
        } else {
            event
        }])
    }
}
