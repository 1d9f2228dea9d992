//! Serve command - run the HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::info;

use meter_core::create_pipeline;
use meter_server::AppState;

use super::load_config;

/// Arguments for the serve command.
#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind, overrides `server.bind_addr`
    #[arg(short, long)]
    addr: Option<String>,

    /// Per-request timeout in seconds, overrides `server.request_timeout_secs`
    #[arg(long)]
    timeout: Option<u64>,
}

pub fn run(args: ServeArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(addr) = args.addr {
        config.server.bind_addr = addr;
    }
    if let Some(timeout) = args.timeout {
        config.server.request_timeout_secs = timeout;
    }

    // Blocking HTTP clients inside the pipeline must be created and dropped
    // outside the async runtime.
    let pipeline = Arc::new(create_pipeline(&config).context("Failed to build OCR pipeline")?);
    info!(
        "Pipeline ready (detector: {:?})",
        config.detector.backend
    );

    let state = AppState::new(
        Arc::clone(&pipeline),
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime
        .block_on(meter_server::start_server(&config.server.bind_addr, state))
        .with_context(|| format!("Server on {} failed", config.server.bind_addr))?;
    drop(runtime);

    Ok(())
}
