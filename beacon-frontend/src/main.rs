//! Beacon frontend - agent-facing HTTPS endpoint.
//!
//! Startup order: logging, configuration, metrics, lifecycle and signal
//! handlers, admin server, TLS listener. Any failure before the listener is
//! serving aborts the process; shutdown problems are only logged.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use prometheus_client::registry::Registry;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use beacon_core::config::{find_config_file, load_and_validate};
use beacon_core::{
    DrainResult, FrontendMetrics, LifecycleManager, LoopbackPipeline, NotificationRegistry,
};
use beacon_frontend::{AdminServer, Frontend};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    /// If not specified, searches: BEACON_CONFIG env, /etc/beacon/frontend.yaml, ./frontend.yaml
    #[arg(long, env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    // Held until exit so buffered log lines are flushed.
    let _guard = init_tracing(cli.log_format);

    let path = find_config_file(cli.config.as_deref())?;
    info!(path = %path.display(), "Loading configuration file");
    let (config, validation) = load_and_validate(&path)?;
    for warning in &validation.warnings {
        warn!(warning = %warning, "Configuration warning");
    }

    let mut prom_registry = Registry::default();
    let metrics = FrontendMetrics::new(&mut prom_registry);
    let prom_registry = Arc::new(prom_registry);

    let lifecycle = Arc::new(LifecycleManager::new(config.timing.shutdown_grace));
    setup_signal_handlers(Arc::clone(&lifecycle));

    if let Some(admin) = &config.admin {
        let server = AdminServer::new(admin.socket_addr(), lifecycle.health(), prom_registry);
        let shutdown = lifecycle.shutdown_token();
        tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!(error = %e, "Admin server error");
            }
        });
    }

    let registry = Arc::new(NotificationRegistry::new());
    warn!("No crypto backend linked; serving with the loopback pipeline");
    let pipeline = Arc::new(LoopbackPipeline::new(Arc::clone(&registry)));

    let frontend = Frontend::bind(
        &config,
        pipeline,
        Arc::clone(&lifecycle),
        registry,
        metrics,
    )
    .await?;

    info!(
        addr = %config.tls_listen_addr(),
        concurrency = config.limits.concurrency,
        max_poll_secs = config.timing.max_poll.as_secs(),
        "Beacon frontend starting"
    );

    match frontend.run().await {
        DrainResult::Complete => info!("All connections drained, shutting down cleanly"),
        DrainResult::Timeout { remaining } => {
            error!(remaining = remaining, "Shutdown grace exceeded, connections dropped");
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
    let builder = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        );
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    guard
}

/// SIGINT and SIGTERM both begin graceful shutdown.
fn setup_signal_handlers(lifecycle: Arc<LifecycleManager>) {
    let lifecycle_sigint = Arc::clone(&lifecycle);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                lifecycle_sigint.begin_shutdown();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                lifecycle.begin_shutdown();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });

    #[cfg(not(unix))]
    let _ = lifecycle;
}
