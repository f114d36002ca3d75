use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sptth::config::{AppConfig, LogLevel};
use sptth::{logging, server, tls};

#[derive(Parser)]
#[command(name = "sptth")]
#[command(version)]
#[command(about = "Local DNS overrides with a private CA and TLS reverse proxy")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(default_value = "config.toml")]
    config: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            logging::init(LogLevel::default());
            tracing::error!(config = %args.config.display(), "invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(config.log_level);

    tracing::info!("sptth v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(config = %args.config.display(), "configuration loaded");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let installer = Arc::from(tls::platform_installer());
    match rt.block_on(server::run(&config, installer)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
