//! tcplb - a least-connections TCP (Layer 4) load balancer
//!
//! Usage:
//!     tcplb --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tcplb::balancer::LoadBalancer;
use tcplb::config::{load_config, Config, GlobalConfig, LogFormat};
use tcplb::frontend::ProxyListener;
use tcplb::metrics::{MetricsCollector, MetricsServer};
use tracing_subscriber::EnvFilter;

/// A least-connections TCP (Layer 4) load balancer written in Rust.
#[derive(Parser, Debug)]
#[command(name = "tcplb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    init_logging(&config.global, cli.log_level.as_deref());

    if cli.validate {
        info!("Configuration is valid");
        println!("Configuration is valid.");
        println!(
            "  Listener: {} on {}",
            config.listener.name, config.listener.listen
        );
        println!("  Upstreams: {}", config.upstreams.len());
        for upstream in &config.upstreams {
            println!("    - {}", upstream.endpoint());
        }
        return Ok(());
    }

    info!(
        config_path = %cli.config.display(),
        listen = %config.listener.listen,
        upstreams = config.upstreams.len(),
        "tcplb starting"
    );

    run(config)
}

/// Initialize the logging system.
///
/// Level precedence: `RUST_LOG`, then the CLI override, then the config.
fn init_logging(config: &GlobalConfig, cli_level: Option<&str>) {
    let level = cli_level.unwrap_or(&config.log_level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

/// Run the load balancer with the given configuration.
fn run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async { run_async(config).await })
}

/// Async entry point for the load balancer.
async fn run_async(config: Config) -> Result<()> {
    let endpoints = config.upstreams.iter().map(|u| Some(u.endpoint())).collect();
    let balancer = Arc::new(LoadBalancer::with_connect_timeout(
        endpoints,
        config.listener.connect_timeout,
    )?);

    let metrics = MetricsCollector::new();
    let shutdown = CancellationToken::new();

    let listener = ProxyListener::bind(&config.listener, Arc::clone(&balancer), metrics.clone())
        .await
        .context("failed to bind listener")?;

    let listener_task = tokio::spawn(listener.run(shutdown.clone()));

    let metrics_task = if config.metrics.enabled {
        let server = MetricsServer::new(
            config.metrics.address,
            config.metrics.path.clone(),
            metrics,
            Arc::clone(&balancer),
        );
        Some(tokio::spawn(server.run(shutdown.clone())))
    } else {
        None
    };

    info!("tcplb is running");
    info!("press Ctrl+C to stop");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received shutdown signal");
        }
        Err(e) => {
            error!(error = %e, "failed to listen for shutdown signal");
        }
    }

    shutdown.cancel();

    let _ = listener_task.await;
    if let Some(task) = metrics_task {
        let _ = task.await;
    }

    info!("tcplb shut down");
    Ok(())
}
