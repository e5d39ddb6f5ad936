//! Test-only stages, capabilities and fixtures.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use serde_json::{Map, Value};
use tempfile::TempDir;

use crate::audit::{AuditConfig, AuditLogger};
use crate::core::event::Event;
use crate::core::state::StateStore;
use crate::error::{CapabilityError, StageError};
use crate::io::capability::Capability;
use crate::stages::{Stage, StageContext};

/// A state store and audit logger backed by a scratch log directory.
pub struct AuditFixture {
    pub state: StateStore,
    pub audit: AuditLogger,
    pub dir: TempDir,
}

impl AuditFixture {
    /// `seed` must be a JSON object.
    pub fn new(seed: Value) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let audit = AuditLogger::create(&AuditConfig {
            log_dir: dir.path().join("logs"),
            ..AuditConfig::default()
        })
        .expect("create audit logger");
        Self {
            state: StateStore::from_seed(seed_map(seed)),
            audit,
            dir,
        }
    }

    /// Invoke a stage directly, outside any executor.
    pub fn invoke(&mut self, stage: &dyn Stage) -> Result<Vec<Event>, StageError> {
        let mut ctx = StageContext::new(&mut self.state, &mut self.audit);
        stage.invoke(&mut ctx)
    }
}

/// Unwrap a JSON object literal into a seed map.
pub fn seed_map(seed: Value) -> Map<String, Value> {
    match seed {
        Value::Object(map) => map,
        other => panic!("seed must be an object, got {other}"),
    }
}

/// A stage whose behavior is fixed up front. Counts its invocations.
pub struct ScriptedStage {
    name: String,
    writes: Vec<(String, Value)>,
    copies: Vec<(String, String)>,
    emits: Vec<Event>,
    output_key: Option<String>,
    escalate_on_call: Option<u32>,
    calls: Rc<Cell<u32>>,
}

impl ScriptedStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            writes: Vec::new(),
            copies: Vec::new(),
            emits: Vec::new(),
            output_key: None,
            escalate_on_call: None,
            calls: Rc::new(Cell::new(0)),
        }
    }

    pub fn writes(mut self, key: &str, value: Value) -> Self {
        self.writes.push((key.to_string(), value));
        self
    }

    /// Copy `from` into `to` (absent reads as `null`).
    pub fn copies(mut self, from: &str, to: &str) -> Self {
        self.copies.push((from.to_string(), to.to_string()));
        self
    }

    pub fn emits(mut self, event: Event) -> Self {
        self.emits.push(event);
        self
    }

    pub fn with_output_key(mut self, key: &str) -> Self {
        self.output_key = Some(key.to_string());
        self
    }

    /// Append an escalating event on the `n`th invocation (1-based) and after.
    pub fn escalate_on_call(mut self, n: u32) -> Self {
        self.escalate_on_call = Some(n);
        self
    }

    pub fn calls(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.calls)
    }
}

impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        for (key, value) in &self.writes {
            ctx.state.set(key.as_str(), value.clone());
        }
        for (from, to) in &self.copies {
            let value = ctx.state.get(from, Value::Null);
            ctx.state.set(to.as_str(), value);
        }
        let mut events = self.emits.clone();
        if self.escalate_on_call.is_some_and(|n| call >= n) {
            let message = format!("escalate on call {call}");
            events.push(Event::message(&self.name, message).escalating());
        }
        Ok(events)
    }
}

/// A stage that applies its writes and then fails.
pub struct FailingStage {
    name: String,
    writes: Vec<(String, Value)>,
}

impl FailingStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            writes: Vec::new(),
        }
    }

    pub fn writing(mut self, key: &str, value: Value) -> Self {
        self.writes.push((key.to_string(), value));
        self
    }
}

impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        for (key, value) in &self.writes {
            ctx.state.set(key.as_str(), value.clone());
        }
        Err(CapabilityError::Other {
            capability: self.name.clone(),
            reason: "scripted failure".to_string(),
        }
        .into())
    }
}

/// A stage that panics.
pub struct PanickingStage {
    name: String,
}

impl PanickingStage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _ctx: &mut StageContext<'_>) -> Result<Vec<Event>, StageError> {
        panic!("scripted panic in {}", self.name);
    }
}

/// A capability that replays predetermined responses and records requests.
pub struct ScriptedCapability {
    name: String,
    responses: RefCell<VecDeque<Result<Value, CapabilityError>>>,
    requests: Rc<RefCell<Vec<Value>>>,
}

impl ScriptedCapability {
    pub fn new(name: &str, responses: Vec<Result<Value, CapabilityError>>) -> Self {
        Self {
            name: name.to_string(),
            responses: RefCell::new(responses.into()),
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Rc<RefCell<Vec<Value>>> {
        Rc::clone(&self.requests)
    }
}

impl Capability for ScriptedCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, request: &Value) -> Result<Value, CapabilityError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(CapabilityError::Other {
                    capability: self.name.clone(),
                    reason: "no scripted response left".to_string(),
                })
            })
    }
}

/// Collects forwarded events.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
}

impl EventCollector {
    pub fn push(&mut self, event: &Event) {
        self.events.push(event.clone());
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }
}
