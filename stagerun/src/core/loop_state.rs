//! Pure state machine for bounded, escalation-terminated loops.

use serde::{Deserialize, Serialize};

/// Loop controller state. `Escalated` and `Exhausted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Escalated,
    Exhausted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoopState::Running)
    }
}

/// Iteration bookkeeping for one loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopMachine {
    state: LoopState,
    iterations: u32,
    max_iterations: u32,
}

impl LoopMachine {
    /// `max_iterations` must be at least 1; callers validate this up front.
    pub fn new(max_iterations: u32) -> Self {
        Self {
            state: LoopState::Running,
            iterations: 0,
            max_iterations,
        }
    }

    /// Passes completed without escalation.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Apply the transition rule after a pass completes.
    ///
    /// Escalation wins over the cap: a pass that escalates on the final
    /// permitted iteration ends `Escalated`, not `Exhausted`.
    pub fn after_pass(&mut self, escalated: bool) -> LoopState {
        if self.state.is_terminal() {
            return self.state;
        }
        if escalated {
            self.state = LoopState::Escalated;
            return self.state;
        }
        self.iterations += 1;
        if self.iterations >= self.max_iterations {
            self.state = LoopState::Exhausted;
        }
        self.state
    }
}
