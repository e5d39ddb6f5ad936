//! Stable exit codes for `stagerun` commands.

/// Command succeeded; for `run`, the pipeline ended `success` or `escalated`.
pub const OK: i32 = 0;
/// Invalid input (config, seed, arguments) or a run that ended `failed`.
pub const INVALID: i32 = 1;
/// A loop reached its iteration cap without escalating (unless exhaustion is allowed).
pub const EXHAUSTED: i32 = 2;
/// The pipeline ran but its audit trail could not be created or persisted.
pub const AUDIT_FAILURE: i32 = 3;
