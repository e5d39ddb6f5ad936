//! Typed error taxonomy for stages, capabilities and audit persistence.
//!
//! Stage-level errors are always recovered by the pipeline executor into a failed
//! completion. Run-level errors ([`RunError`]) reach the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::RunStatus;

/// An external capability call failed.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("failed to spawn {capability}: {reason}")]
    Spawn { capability: String, reason: String },

    #[error("{capability} exited with status {status:?}: {stderr}")]
    Failed {
        capability: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("{capability} timed out after {timeout:?}")]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    #[error("malformed response from {capability}: {reason}")]
    Malformed { capability: String, reason: String },

    #[error("missing credential for {capability}: {variable} is not set")]
    MissingCredential {
        capability: String,
        variable: String,
    },

    #[error("{capability} failed: {reason}")]
    Other { capability: String, reason: String },
}

/// Why a stage invocation faulted.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("required state key '{0}' is missing")]
    StateKeyMissing(String),

    #[error("invalid value for state key '{key}': {reason}")]
    InvalidState { key: String, reason: String },

    #[error("template error: {0}")]
    Template(String),

    #[error("stage panicked: {0}")]
    Panicked(String),
}

/// The durable audit sink could not be written.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize run record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not claim a unique run id in {dir} (base '{base}')")]
    RunIdExhausted { dir: PathBuf, base: String },
}

impl AuditError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AuditError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Run-level failure surfaced to the caller of the coordinator.
#[derive(Debug, Error)]
pub enum RunError {
    /// The audit logger could not be created; no stage ran.
    #[error("audit logger could not be initialized: {0}")]
    AuditInit(#[source] AuditError),

    /// The pipeline reached `status` but its audit record was not persisted.
    #[error("pipeline finished with status {status} but the audit record was lost: {source}")]
    AuditPersistence {
        status: RunStatus,
        #[source]
        source: AuditError,
    },
}

impl RunError {
    /// Terminal status the pipeline reached before the failure, if it ran.
    pub fn pipeline_status(&self) -> Option<RunStatus> {
        match self {
            RunError::AuditInit(_) => None,
            RunError::AuditPersistence { status, .. } => Some(*status),
        }
    }
}
