//! Shared key/value state threaded through every stage of a run.

use serde::Serialize;
use serde_json::{Map, Value};

/// Mutable state shared by all stages of one run.
///
/// Writes are last-write-wins and keys are never removed implicitly. Reads of an
/// absent key return a caller-supplied default so stages tolerate partial state
/// (notably on the first pass of a loop).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateStore {
    values: Map<String, Value>,
}

/// Immutable copy of the state at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StateSnapshot(Map<String, Value>);

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a seed object.
    pub fn from_seed(seed: Map<String, Value>) -> Self {
        Self { values: seed }
    }

    /// Read `key`, falling back to `default` when absent.
    pub fn get(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn get_opt(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot(self.values.clone())
    }

    /// Replace the whole store with a previously taken snapshot.
    pub fn restore(&mut self, snapshot: StateSnapshot) {
        self.values = snapshot.0;
    }
}

impl StateSnapshot {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Store a JSON number, preferring an integer representation when `value` is whole.
pub fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}
