use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

use smsdispatch::bootstrap::{wait_for_signal, Server, ShutdownReason};
use smsdispatch::config::{ConfigGate, Configuration, DispatchConfig};
use smsdispatch::dispatch::Dispatcher;
use smsdispatch::endpoint::EndpointRegistry;
use smsdispatch::retry::RetryScheduler;
use smsdispatch::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "smsdispatch")]
#[command(author, version, about = "Keyword-triggered SMS dispatcher")]
struct Args {
    /// Path to config file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let code = runtime.block_on(run(args));

    // Stdin is read on a blocking thread that only returns at the next line.
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

/// The binary registers no custom endpoints; `type: custom` entries only
/// load when the library is embedded with its own [`EndpointRegistry`].
async fn run(args: Args) -> Result<ExitCode> {
    // Read configuration first (to get log settings), validate once logging is up
    let config = DispatchConfig::read(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    init_tracing(&TracingConfig::from(&config.logging))?;

    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        patterns = config.patterns.len(),
        endpoints = config.endpoints.len(),
        mappings = config.mappings.len(),
        "configuration loaded"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let scheduler = RetryScheduler::spawn();
    let registry = EndpointRegistry::new();
    let gate = ConfigGate::new();
    let configuration = gate
        .load(|| Configuration::build(&config, &registry, &scheduler))
        .context("failed to build configuration")?
        .into_configuration();

    configuration
        .init_network_resources()
        .await
        .context("failed to initialize content renderer")?;
    configuration.start_retry_tasks();

    let server = Server::new(Dispatcher::new(configuration.clone()));
    let shutdown = server.shutdown_handle();
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.start_drain(ShutdownReason::Signal);
    });

    let served = server
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;
    signals.abort();

    let stats = server.dispatcher().stats();
    info!(
        handled = stats.handled,
        not_handled = stats.not_handled,
        delivered = stats.delivered,
        queued_for_retry = stats.queued_for_retry,
        transform_failures = stats.transform_failures,
        persist_failures = stats.persist_failures,
        "dispatch statistics"
    );

    configuration.stop_retry_tasks();
    scheduler.shutdown();

    let summary = served.context("host loop failed")?;
    if summary.is_fatal() {
        error!(fatal = summary.fatal, "stopped after a fatal dispatch error");
        return Ok(ExitCode::FAILURE);
    }

    info!("smsdispatch stopped");
    Ok(ExitCode::SUCCESS)
}
