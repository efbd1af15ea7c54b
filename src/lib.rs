#![deny(unsafe_code)]

pub mod config;
pub mod credentials;
pub mod docker;
pub mod error;
pub mod manifest;
pub mod orchestrator;
pub mod poll;
pub mod providers;
pub mod redact;
pub mod registry;
pub mod secrets;
pub mod telemetry;
pub mod vault;

pub use config::{CliArgs, CommandKind, OutputFormat, RunConfig};
pub use credentials::CredentialBundle;
pub use error::{DeployError, Result};
pub use manifest::Manifest;
pub use providers::{DeploymentResult, DeploymentStatus, ProviderEngine};
