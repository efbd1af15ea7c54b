use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::error::{DeployError, Result};

/// Operations the deployer performs; one per invocation.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Deploy,
    Stop,
    Destroy,
    Status,
    Rollback,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Deploy => "deploy",
            CommandKind::Stop => "stop",
            CommandKind::Destroy => "destroy",
            CommandKind::Status => "status",
            CommandKind::Rollback => "rollback",
        }
    }
}

/// Output rendering for command results.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Top-level CLI surface.
#[derive(Debug, Parser)]
#[command(
    name = "cloud-deploy",
    version,
    about = "Manifest-driven application deployer for AWS Elastic Beanstalk, GCP Cloud Run, and Azure Container Instances.",
    long_about = "One invocation performs one command (deploy | stop | destroy | status | rollback) \
                  against the deployment described by the manifest, then exits. Re-running the same \
                  command converges live cloud state toward the manifest."
)]
pub struct CliArgs {
    /// Command to run against the manifest's deployment.
    #[arg(short, long, value_enum)]
    pub command: CommandKind,

    /// Path to the deployment manifest (YAML).
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Output format for results (text|json).
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Validated configuration for one invocation.
#[derive(Debug)]
pub struct RunConfig {
    pub command: CommandKind,
    pub manifest_path: PathBuf,
    pub output: OutputFormat,
}

impl RunConfig {
    pub fn from_args(args: CliArgs) -> Result<Self> {
        if !args.manifest.exists() {
            return Err(DeployError::manifest(
                "<cli>",
                format!("manifest path {} does not exist", args.manifest.display()),
            ));
        }
        Ok(Self {
            command: args.command,
            manifest_path: args.manifest,
            output: args.output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn parses_command_and_manifest() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "application: {{name: a}}").expect("writes");
        let path = file.path().to_str().expect("utf-8 path");

        let args = CliArgs::parse_from(["cloud-deploy", "--command", "deploy", "--manifest", path]);
        let config = RunConfig::from_args(args).expect("config builds");
        assert_eq!(config.command, CommandKind::Deploy);
        assert_eq!(config.output, OutputFormat::Text);
    }

    #[test]
    fn accepts_short_flags_and_json_output() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let path = file.path().to_str().expect("utf-8 path");

        let args =
            CliArgs::parse_from(["cloud-deploy", "-c", "status", "-m", path, "--output", "json"]);
        let config = RunConfig::from_args(args).expect("config builds");
        assert_eq!(config.command, CommandKind::Status);
        assert_eq!(config.output, OutputFormat::Json);
    }

    #[test]
    fn rejects_missing_manifest_path() {
        let args = CliArgs::parse_from([
            "cloud-deploy",
            "--command",
            "deploy",
            "--manifest",
            "/nonexistent/deploy.yaml",
        ]);
        let err = RunConfig::from_args(args).unwrap_err();
        assert!(err.to_string().contains("does not exist"), "{err}");
    }

    #[test]
    fn rejects_unknown_command() {
        let parsed = CliArgs::try_parse_from([
            "cloud-deploy",
            "--command",
            "restart",
            "--manifest",
            "deploy.yaml",
        ]);
        assert!(parsed.is_err());
    }
}
