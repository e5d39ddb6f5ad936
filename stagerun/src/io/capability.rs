//! Capability abstraction for external calls made by stages.
//!
//! The [`Capability`] trait decouples stages from whatever service answers a
//! request. [`CommandCapability`] spawns a configured command and speaks JSON
//! over stdin/stdout; tests use scripted capabilities that never spawn.

use std::process::Command;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::CapabilityError;
use crate::io::process::run_command_with_timeout;

/// An external service a stage can call.
pub trait Capability {
    fn name(&self) -> &str;

    /// Send `request` and return the parsed response.
    fn call(&self, request: &Value) -> Result<Value, CapabilityError>;
}

/// Capability backed by a child process.
///
/// The request is written to stdin as JSON; stdout must hold exactly one JSON
/// value. An empty stdout is reported as `null`.
#[derive(Debug, Clone)]
pub struct CommandCapability {
    name: String,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    required_env: Vec<String>,
}

impl CommandCapability {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            timeout: Duration::from_secs(60),
            output_limit_bytes: 100_000,
            required_env: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    /// Environment variables that must be set before the command may run.
    pub fn with_required_env(mut self, vars: Vec<String>) -> Self {
        self.required_env = vars;
        self
    }

    fn check_env(&self) -> Result<(), CapabilityError> {
        for var in &self.required_env {
            let present = std::env::var_os(var).is_some_and(|v| !v.is_empty());
            if !present {
                return Err(CapabilityError::MissingCredential {
                    capability: self.name.clone(),
                    variable: var.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Capability for CommandCapability {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(capability = %self.name))]
    fn call(&self, request: &Value) -> Result<Value, CapabilityError> {
        self.check_env()?;
        let Some((program, args)) = self.command.split_first() else {
            return Err(CapabilityError::Spawn {
                capability: self.name.clone(),
                reason: "command is empty".to_string(),
            });
        };
        let payload = serde_json::to_vec(request).map_err(|err| CapabilityError::Other {
            capability: self.name.clone(),
            reason: format!("serialize request: {err}"),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(&payload),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| CapabilityError::Spawn {
            capability: self.name.clone(),
            reason: format!("{err:#}"),
        })?;

        if output.timed_out {
            return Err(CapabilityError::Timeout {
                capability: self.name.clone(),
                timeout: self.timeout,
            });
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "capability command failed");
            return Err(CapabilityError::Failed {
                capability: self.name.clone(),
                status: output.status.code(),
                stderr: output.stderr_lossy(),
            });
        }
        if output.stdout_truncated > 0 {
            return Err(CapabilityError::Malformed {
                capability: self.name.clone(),
                reason: format!(
                    "response exceeded {} bytes ({} truncated)",
                    self.output_limit_bytes, output.stdout_truncated
                ),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        if text.trim().is_empty() {
            debug!("capability returned empty response");
            return Ok(Value::Null);
        }
        serde_json::from_str(text.trim()).map_err(|err| CapabilityError::Malformed {
            capability: self.name.clone(),
            reason: err.to_string(),
        })
    }
}
