//! agent-bridge-worker
//!
//! Runs an agent engine in a separate process and bridges it to the host
//! over newline-delimited JSON on stdin/stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent_bridge_worker::{config::Config, engine::EchoEngineFactory, lifecycle, transport};

#[derive(Parser, Debug)]
#[command(name = "agent-bridge-worker")]
#[command(about = "Worker-side bridge between a host application and an agent engine")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default timeout for callbacks to the host, in milliseconds
    #[arg(long)]
    callback_timeout_ms: Option<u64>,
}

fn main() -> ExitCode {
    lifecycle::install_panic_hook();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(u8::try_from(lifecycle::report_error(&e)).unwrap_or(1)),
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for the bridge protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ms) = args.callback_timeout_ms {
        config.callbacks.default_timeout_ms = ms;
    }

    info!(
        default_timeout_ms = config.callbacks.default_timeout_ms,
        max_line_bytes = config.protocol.max_line_bytes,
        "Loaded configuration"
    );

    transport::serve_stdio(config, Arc::new(EchoEngineFactory)).await
}
