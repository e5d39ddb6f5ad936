//! Deterministic, pure logic shared by the pipeline executor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod event;
pub mod loop_state;
pub mod record;
pub mod state;
pub mod summary;
pub mod types;
