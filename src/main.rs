//! `webserver`: runs an HTTP server with a managed lifecycle.
//!
//! ```text
//! webserver [--config server.toml] [--name NAME] [--address HOST:PORT] [--log-level LEVEL]
//! ```
//!
//! Without a config file the server starts with the operational preset
//! (`/api/v1/liveness`, `/api/v1/readiness`, `/api/v1/stop`,
//! `/api/v1/debug/vars`). SIGINT or SIGTERM drains it; the same signal again
//! kills it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use webserver::config::loader::load_config;
use webserver::config::{LogLevel, LoggingConfig, ServerBuilder, ServerConfig};
use webserver::observability::{logging, metrics};
use webserver::{Endpoint, ReadinessDeterminer};

#[derive(Parser)]
#[command(name = "webserver")]
#[command(about = "HTTP server with graceful, bounded shutdown", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server name, overrides the config file.
    #[arg(short, long)]
    name: Option<String>,

    /// Listen address (host:port), overrides the config file.
    #[arg(short, long)]
    address: Option<String>,

    /// Console log level: none, fatal, error, warn, info, debug or trace.
    #[arg(long)]
    log_level: Option<LogLevel>,
}

fn builder_from(cli: &Cli) -> Result<ServerBuilder, Box<dyn std::error::Error>> {
    let Some(path) = &cli.config else {
        let defaults = ServerConfig::default();
        let name = cli.name.clone().unwrap_or(defaults.name);
        let address = cli.address.clone().unwrap_or(defaults.address);
        return Ok(ServerBuilder::with_defaults(name, address));
    };

    let mut config = load_config(path)?;
    if let Some(name) = &cli.name {
        config.name = name.clone();
    }
    if let Some(address) = &cli.address {
        config.address = address.clone();
    }

    let published = if config.enable_metrics {
        vec![
            metrics::command_line(),
            metrics::server_info(config.name.clone(), config.address.clone()),
            metrics::uptime(),
        ]
    } else {
        Vec::new()
    };
    let enable_metrics = config.enable_metrics;

    let mut builder = ServerBuilder::from_config(config)
        .with_endpoints(vec![Endpoint::liveness(), Endpoint::stop()]);
    if enable_metrics {
        builder = builder.with_metrics(published);
    }
    Ok(builder)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = match builder_from(&cli) {
        Ok(builder) => builder,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut logging_config = builder
        .config()
        .logging
        .clone()
        .unwrap_or_else(|| LoggingConfig::new(LogLevel::Info, LogLevel::Info));
    if let Some(level) = cli.log_level {
        logging_config.console_level = level;
    }
    let dispatch = match logging::init(&logging_config) {
        Ok(dispatch) => dispatch,
        Err(err) => {
            eprintln!("Error: failed to initialize logging: {}", err);
            return ExitCode::FAILURE;
        }
    };
    builder = builder.with_logging(logging_config).with_dispatch(dispatch);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "webserver starting");

    let startup = ReadinessDeterminer::new("startup");
    let server = match builder.with_readiness(vec![startup.clone()]).build() {
        Ok(server) => server,
        Err(err) => {
            tracing::error!(error = %err, code = err.error_code(), "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let watcher = server.clone();
    tokio::spawn(async move {
        if let Some(addr) = watcher.serving_addr().await {
            startup.set_ready(true);
            tracing::info!(address = %addr, "Ready");
        }
    });

    match server.start().await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(
                error = %err,
                code = err.error_code(),
                suggestion = err.suggestion().unwrap_or("-"),
                "Server exited with an error"
            );
            ExitCode::FAILURE
        }
    }
}
