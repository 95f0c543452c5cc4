//! poolbalancer - health-aware load balancer daemon
//!
//! Usage:
//!     poolbalancer --config <path>
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use poolbalancer::config::{Config, ConfigWatcher, HealthCheckType, load_config};
use poolbalancer::dispatcher::Dispatcher;
use poolbalancer::health::{HealthChecker, HealthTransport, HttpTransport, TcpTransport};
use poolbalancer::metrics::{MetricsCollector, MetricsServer, MetricsSink};
use poolbalancer::util::{ShutdownSignal, init_logging};

/// Health-aware load balancer.
#[derive(Parser, Debug)]
#[command(name = "poolbalancer")]
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

    if cli.validate {
        print_summary(&config);
        return Ok(());
    }

    // CLI overrides config
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.global.log_level);
    init_logging(log_level, &config.global.log_format).context("failed to initialize logging")?;

    info!(
        config_path = %cli.config.display(),
        backends = config.backends.len(),
        algorithm = ?config.balancer.algorithm,
        "poolbalancer starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(run(cli.config, config))
}

fn print_summary(config: &Config) {
    println!("Configuration is valid.");
    println!("  Algorithm: {:?}", config.balancer.algorithm);
    println!(
        "  Health check: {:?} every {:?} (timeout {:?}, fail {}, recover {})",
        config.health_check.check_type,
        config.health_check.interval,
        config.health_check.timeout,
        config.health_check.fail_threshold,
        config.health_check.success_threshold
    );
    println!("  Backends: {}", config.backends.len());
    for backend in &config.backends {
        println!("    - {} (weight {})", backend.address, backend.weight);
    }
}

fn build_transport(config: &Config) -> Arc<dyn HealthTransport> {
    let hc = &config.health_check;
    match hc.check_type {
        HealthCheckType::Tcp => Arc::new(TcpTransport),
        HealthCheckType::Http => Arc::new(HttpTransport::new(
            hc.path.clone().unwrap_or_else(|| "/".to_string()),
            hc.expected_status,
        )),
    }
}

async fn run(config_path: PathBuf, config: Config) -> Result<()> {
    let shutdown = ShutdownSignal::new();
    let collector = MetricsCollector::new();
    let metrics: Arc<dyn MetricsSink> = Arc::new(collector.clone());

    let dispatcher = Arc::new(Dispatcher::new(
        &config.balancer,
        config.health_config(),
        Arc::clone(&metrics),
    ));
    for spec in config.backend_specs() {
        dispatcher
            .register(spec.clone())
            .with_context(|| format!("failed to register backend {}", spec.id))?;
    }

    let mut handles = Vec::new();

    let checker = HealthChecker::new(
        Arc::clone(dispatcher.registry()),
        Arc::clone(dispatcher.health()),
        build_transport(&config),
        Arc::clone(&metrics),
    )
    .with_interval(config.health_check.interval)
    .with_timeout(config.health_check.timeout);
    handles.push(tokio::spawn(checker.run(shutdown.subscribe())));

    {
        let dispatcher = Arc::clone(&dispatcher);
        let rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            dispatcher.run_maintenance(rx).await;
        }));
    }

    if config.global.metrics.enabled {
        let server = MetricsServer::new(
            config.global.metrics.address,
            config.global.metrics.path.clone(),
            collector,
            Arc::clone(&dispatcher),
        );
        let rx = shutdown.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = server.run(rx).await {
                error!(error = %e, "metrics server failed");
            }
        }));
    }

    let watcher = {
        let dispatcher = Arc::clone(&dispatcher);
        let initial = config.clone();
        ConfigWatcher::new(
            config_path,
            Box::new(move |new_config: Config| {
                // Algorithm and health settings are fixed at startup
                if new_config.balancer.algorithm != initial.balancer.algorithm {
                    warn!("algorithm change requires a restart, ignoring");
                }
                dispatcher.reconcile(&new_config.backend_specs());
            }),
        )
    };
    handles.push(tokio::spawn(watcher.run(shutdown.subscribe())));

    info!(
        policy = dispatcher.policy_name(),
        backends = dispatcher.backends(None).len(),
        "poolbalancer is running, press Ctrl+C to stop"
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    shutdown.shutdown();
    for handle in handles {
        let _ = handle.await;
    }

    info!(in_flight = dispatcher.in_flight(), "poolbalancer shut down complete");
    Ok(())
}
