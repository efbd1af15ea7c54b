use clap::Parser;

use cloud_deploy::config::{CliArgs, RunConfig};
use cloud_deploy::{orchestrator, telemetry};

#[tokio::main]
async fn main() {
    telemetry::init();
    let args = CliArgs::parse();
    match RunConfig::from_args(args) {
        Ok(config) => {
            if let Err(err) = orchestrator::run(config).await {
                eprintln!("error: {err}");
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    }
}
