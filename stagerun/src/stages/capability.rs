//! Stage wrapping an external [`Capability`].

use serde_json::Value;

use crate::core::event::Event;
use crate::error::StageError;
use crate::io::capability::Capability;
use crate::stages::{Stage, StageContext};

/// Reads a request from `input_key` (absent reads as `null`), calls the
/// capability and writes the response to `output_key`.
pub struct CapabilityStage {
    name: String,
    description: String,
    capability: Box<dyn Capability>,
    input_key: Option<String>,
    output_key: Option<String>,
    require_input: bool,
}

impl CapabilityStage {
    pub fn new(name: impl Into<String>, capability: Box<dyn Capability>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            capability,
            input_key: None,
            output_key: None,
            require_input: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Fail with `StateKeyMissing` instead of sending `null` when the input key is absent.
    pub fn requiring_input(mut self, require: bool) -> Self {
        self.require_input = require;
        self
    }

    fn request(&self, ctx: &StageContext<'_>) -> Result<Value, StageError> {
        let Some(key) = &self.input_key else {
            return Ok(Value::Null);
        };
        match ctx.state.get_opt(key) {
            Some(value) => Ok(value.clone()),
            None if self.require_input => Err(StageError::StateKeyMissing(key.clone())),
            None => Ok(Value::Null),
        }
    }
}

impl Stage for CapabilityStage {
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
        let request = self.request(ctx)?;
        let label = match &self.input_key {
            Some(key) => format!("state: {key}"),
            None => "request".to_string(),
        };
        ctx.audit.perceive(&self.name, &label, &request);
        ctx.audit.act(&self.name, "call", self.capability.name());

        let response = self.capability.call(&request)?;

        if let Some(key) = &self.output_key {
            ctx.state.set(key.as_str(), response.clone());
        }
        Ok(vec![Event::message(&self.name, response)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::test_support::{AuditFixture, ScriptedCapability};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn passes_input_and_stores_response() {
        let capability = ScriptedCapability::new("search", vec![Ok(json!({"hits": 2}))]);
        let requests = capability.requests();
        let stage = CapabilityStage::new("search", Box::new(capability))
            .with_input_key("query")
            .with_output_key("results");
        let mut fixture = AuditFixture::new(json!({"query": "rust"}));

        let events = fixture.invoke(&stage).expect("invoke");
        assert_eq!(fixture.state.get("results", json!(null)), json!({"hits": 2}));
        assert_eq!(events[0].content, Some(json!({"hits": 2})));
        assert_eq!(*requests.borrow(), vec![json!("rust")]);
    }

    #[test]
    fn absent_input_sends_null_unless_required() {
        let capability = ScriptedCapability::new("search", vec![Ok(json!(1))]);
        let requests = capability.requests();
        let stage = CapabilityStage::new("search", Box::new(capability)).with_input_key("query");
        let mut fixture = AuditFixture::new(json!({}));
        fixture.invoke(&stage).expect("invoke");
        assert_eq!(*requests.borrow(), vec![json!(null)]);

        let strict = CapabilityStage::new(
            "search",
            Box::new(ScriptedCapability::new("search", vec![Ok(json!(1))])),
        )
        .with_input_key("query")
        .requiring_input(true);
        let err = fixture.invoke(&strict).unwrap_err();
        assert!(matches!(err, StageError::StateKeyMissing(ref key) if key == "query"));
    }

    #[test]
    fn capability_error_becomes_stage_error() {
        let capability = ScriptedCapability::new(
            "search",
            vec![Err(CapabilityError::Timeout {
                capability: "search".into(),
                timeout: Duration::from_secs(3),
            })],
        );
        let stage = CapabilityStage::new("search", Box::new(capability)).with_output_key("out");
        let mut fixture = AuditFixture::new(json!({}));
        let err = fixture.invoke(&stage).unwrap_err();
        assert!(matches!(
            err,
            StageError::Capability(CapabilityError::Timeout { .. })
        ));
        assert!(fixture.state.get_opt("out").is_none());
    }
}
