use std::io;
use std::time::Duration;

use thiserror::Error;
use zip;

/// Error taxonomy for one deployer invocation.
///
/// Idempotence is the recovery strategy: none of these trigger compensating
/// actions, the operator re-runs the same command.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("manifest error at {field}: {reason}")]
    Manifest { field: String, reason: String },

    #[error("credential error: {0}")]
    Credential(String),

    #[error("vault error at {path}: {reason}")]
    Vault { path: String, reason: String },

    #[error("distribution error for registry {registry}: {reason}")]
    Distribution { registry: String, reason: String },

    #[error("{operation} failed: {reason}")]
    Provider { operation: String, reason: String },

    #[error("timed out after {}s waiting for {what}", budget.as_secs())]
    Timeout { what: String, budget: Duration },

    #[error("{what} reached terminal state {state}: {message}")]
    TerminalFailure {
        what: String,
        state: String,
        message: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl DeployError {
    pub fn manifest(field: impl Into<String>, reason: impl ToString) -> Self {
        DeployError::Manifest {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    pub fn vault(path: impl Into<String>, reason: impl ToString) -> Self {
        DeployError::Vault {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn distribution(registry: impl Into<String>, reason: impl ToString) -> Self {
        DeployError::Distribution {
            registry: registry.into(),
            reason: reason.to_string(),
        }
    }

    pub fn provider(operation: impl Into<String>, reason: impl ToString) -> Self {
        DeployError::Provider {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
