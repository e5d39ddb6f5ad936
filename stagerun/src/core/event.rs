//! Events emitted by stage invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable record produced by one stage invocation.
///
/// `escalate` is the only termination signal a stage can send to an enclosing
/// loop. `error` is set only on the completion event the executor synthesizes
/// for a faulted stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: None,
            escalate: false,
            error: None,
        }
    }

    /// Status event carrying `content`.
    pub fn message(author: impl Into<String>, content: impl Into<Value>) -> Self {
        Self::new(author).with_content(content)
    }

    pub fn with_content(mut self, content: impl Into<Value>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn escalating(mut self) -> Self {
        self.escalate = true;
        self
    }

    /// Completion event for a stage that faulted.
    pub fn failure(author: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(author)
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Text form of `content`, if any. Strings are returned unquoted.
    pub fn content_text(&self) -> Option<String> {
        match self.content.as_ref()? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// True when any event in `events` requests escalation.
pub fn requests_escalation(events: &[Event]) -> bool {
    events.iter().any(|event| event.escalate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escalate_defaults_to_false() {
        let event: Event = serde_json::from_value(json!({"author": "a"})).expect("parse");
        assert!(!event.escalate);
        assert!(!requests_escalation(&[event]));
    }

    #[test]
    fn any_escalating_event_requests_escalation() {
        let events = vec![
            Event::message("a", "working"),
            Event::message("b", "done").escalating(),
        ];
        assert!(requests_escalation(&events));
        assert!(!requests_escalation(&[]));
    }

    #[test]
    fn content_text_unquotes_strings() {
        assert_eq!(
            Event::message("a", "hi").content_text(),
            Some("hi".to_string())
        );
        assert_eq!(
            Event::message("a", json!({"n": 1})).content_text(),
            Some("{\"n\":1}".to_string())
        );
        assert_eq!(Event::new("a").content_text(), None);
    }

    #[test]
    fn failure_events_are_marked() {
        let event = Event::failure("fetch", "network down");
        assert!(event.is_failure());
        assert!(!event.escalate);
    }
}
