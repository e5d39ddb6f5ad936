//! Single pass over an ordered stage list.
//!
//! The executor is the fault boundary: a stage that returns `Err` or panics has
//! its state writes rolled back and is recorded as a failed completion, and the
//! rest of the pass is skipped. Event content is never interpreted here.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::audit::AuditLogger;
use crate::core::event::{Event, requests_escalation};
use crate::core::state::StateStore;
use crate::error::StageError;
use crate::stages::{Stage, StageContext};

/// A stage that faulted during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFault {
    pub stage: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutcome {
    /// Every event of the pass in emission order, including a synthesized
    /// failure event when a stage faulted.
    pub events: Vec<Event>,
    pub fault: Option<StageFault>,
}

impl PassOutcome {
    pub fn escalated(&self) -> bool {
        requests_escalation(&self.events)
    }
}

/// Invoke each stage once, in order, forwarding its events to `on_event`
/// before the next stage starts.
#[instrument(skip_all, fields(stages = stages.len()))]
pub fn run_pass<F: FnMut(&Event)>(
    stages: &[Box<dyn Stage>],
    state: &mut StateStore,
    audit: &mut AuditLogger,
    on_event: &mut F,
) -> PassOutcome {
    let mut outcome = PassOutcome::default();
    for stage in stages {
        let name = stage.name();
        audit.start(name, stage.description());
        let before = state.snapshot();

        match invoke_guarded(stage.as_ref(), state, audit) {
            Ok(events) => {
                for event in &events {
                    let label = if event.escalate { "escalate" } else { "event" };
                    let detail = event.content_text().unwrap_or_default();
                    audit.act(name, label, &detail);
                    on_event(event);
                }
                if let Some(output) = principal_output(stage.as_ref(), state, &events) {
                    audit.output(name, &output);
                }
                audit.complete(name, true, None);
                debug!(stage = name, events = events.len(), "stage completed");
                outcome.events.extend(events);
            }
            Err(err) => {
                state.restore(before);
                let message = err.to_string();
                warn!(stage = name, err = %message, "stage failed, state rolled back");
                audit.complete(name, false, Some(&message));
                let failure = Event::failure(name, message.clone());
                on_event(&failure);
                outcome.events.push(failure);
                outcome.fault = Some(StageFault {
                    stage: name.to_string(),
                    message,
                });
                break;
            }
        }
    }
    outcome
}

fn invoke_guarded(
    stage: &dyn Stage,
    state: &mut StateStore,
    audit: &mut AuditLogger,
) -> Result<Vec<Event>, StageError> {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut ctx = StageContext::new(state, audit);
        stage.invoke(&mut ctx)
    }));
    match result {
        Ok(result) => result,
        Err(payload) => Err(StageError::Panicked(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// The value at the stage's output key, else the content of its last event.
fn principal_output(stage: &dyn Stage, state: &StateStore, events: &[Event]) -> Option<Value> {
    if let Some(value) = stage.output_key().and_then(|key| state.get_opt(key)) {
        return Some(value.clone());
    }
    events.last().and_then(|event| event.content.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StageStatus;
    use crate::test_support::{
        AuditFixture, EventCollector, FailingStage, PanickingStage, ScriptedStage,
    };
    use serde_json::json;

    fn run(fixture: &mut AuditFixture, stages: &[Box<dyn Stage>]) -> (PassOutcome, Vec<Event>) {
        let mut collector = EventCollector::default();
        let outcome = run_pass(
            stages,
            &mut fixture.state,
            &mut fixture.audit,
            &mut |event: &Event| collector.push(event),
        );
        (outcome, collector.into_events())
    }

    #[test]
    fn writes_are_visible_to_later_stages() {
        let mut fixture = AuditFixture::new(json!({}));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(ScriptedStage::new("writer").writes("topic", json!("rust"))),
            Box::new(ScriptedStage::new("reader").copies("topic", "seen")),
        ];
        let (outcome, forwarded) = run(&mut fixture, &stages);
        assert!(outcome.fault.is_none());
        assert_eq!(fixture.state.get("seen", json!(null)), json!("rust"));
        assert_eq!(forwarded, outcome.events);
    }

    #[test]
    fn failing_stage_rolls_back_and_skips_rest() {
        let mut fixture = AuditFixture::new(json!({"n": 1}));
        let never = ScriptedStage::new("never");
        let calls = never.calls();
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(FailingStage::new("broken").writing("n", json!(99))),
            Box::new(never),
        ];
        let (outcome, forwarded) = run(&mut fixture, &stages);

        let fault = outcome.fault.expect("fault");
        assert_eq!(fault.stage, "broken");
        assert!(!fault.message.is_empty());
        assert_eq!(fixture.state.get("n", json!(null)), json!(1));
        assert_eq!(calls.get(), 0);
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].is_failure());

        let record = fixture.audit.record();
        assert_eq!(record.stages.len(), 1);
        assert_eq!(record.stages[0].status, StageStatus::Failed);
        assert!(!record.stages[0].errors[0].is_empty());
    }

    #[test]
    fn panicking_stage_is_recorded_as_failure() {
        let mut fixture = AuditFixture::new(json!({}));
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(PanickingStage::new("boom"))];
        let (outcome, _) = run(&mut fixture, &stages);
        let fault = outcome.fault.expect("fault");
        assert!(fault.message.contains("stage panicked"));
        assert_eq!(fixture.audit.record().metrics.failed_stages, 1);
    }

    #[test]
    fn escalation_is_labelled_in_actions() {
        let mut fixture = AuditFixture::new(json!({}));
        let stages: Vec<Box<dyn Stage>> = vec![Box::new(
            ScriptedStage::new("check").emits(Event::message("check", "done").escalating()),
        )];
        let (outcome, _) = run(&mut fixture, &stages);
        assert!(outcome.escalated());
        let actions = &fixture.audit.record().stages[0].actions;
        assert_eq!(actions[0].action, "escalate");
        assert_eq!(actions[0].details.as_deref(), Some("done"));
    }

    #[test]
    fn output_prefers_output_key_over_last_event() {
        let mut fixture = AuditFixture::new(json!({}));
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(
                ScriptedStage::new("keyed")
                    .writes("result", json!("from state"))
                    .with_output_key("result")
                    .emits(Event::message("keyed", "from event")),
            ),
            Box::new(ScriptedStage::new("plain").emits(Event::message("plain", "last word"))),
        ];
        run(&mut fixture, &stages);
        let record = fixture.audit.record();
        let outputs: Vec<&str> = record
            .stages
            .iter()
            .filter_map(|s| s.output_summary.as_ref())
            .map(|s| s.summary.as_str())
            .collect();
        assert_eq!(outputs, vec!["from state", "last word"]);
    }
}
