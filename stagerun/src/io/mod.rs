//! Side-effecting helpers: audit files, pipeline files, child processes.

pub mod audit_log;
pub mod capability;
pub mod config;
pub mod process;
