//! Stateful multi-stage pipeline executor with conditional looping and a
//! durable audit trail.
//!
//! A run threads one shared [`core::state::StateStore`] through an ordered graph
//! of pipelines and loops. Every stage transition is recorded by a per-run
//! [`audit::AuditLogger`], which writes an incremental text trace and, once the
//! run ends, a structured JSON record.
//!
//! - **[`core`]**: Pure, deterministic logic (state, events, loop transitions,
//!   record bookkeeping). No I/O.
//! - **[`io`]**: Side-effecting operations (audit files, pipeline files, child
//!   processes).
//!
//! Orchestration modules ([`pipeline`], [`looping`], [`coordinator`]) combine the
//! two to execute a run.

pub mod audit;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod pipeline;
pub mod stages;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
