//! Site Prober Binary

use clap::{Parser, ValueEnum};
use site_prober::{Config, Result, Scheduler, SiteMonitor};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Parser)]
#[command(name = "site_prober", version, about = "Probe HTTP sites and alert on failure streaks")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    /// Run a single probe cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(cli.log_format);

    info!("Starting site prober v{}", env!("CARGO_PKG_VERSION"));
    info!("Loading configuration from {}", cli.config.display());

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    log_configuration(&config);

    let mut monitor = SiteMonitor::new(&config)?;

    if monitor.resolver().is_enabled() {
        info!("Testing Clash API connection");
        monitor.resolver().test_connection().await;
    }

    if cli.once {
        monitor.run_cycle().await;
        return Ok(());
    }

    let scheduler = Scheduler::new(config.poll_interval());
    let handle = scheduler.handle();

    info!(
        "Probing every {} seconds, press Ctrl+C to stop",
        config.poll_interval().as_secs()
    );

    tokio::spawn(async move {
        shutdown_signal().await;
        handle.stop();
    });

    let ticks = scheduler.run(&mut monitor).await;
    info!("Scheduler finished after {} ticks", ticks);

    info!("Site prober stopped after {} completed cycles", monitor.cycles());
    Ok(())
}

fn log_configuration(config: &Config) {
    info!("Probe interval: {}s", config.poll_interval().as_secs());
    info!("Sites: {}", config.sites.len());

    match config.active_proxy() {
        Some(proxy) => info!("Proxy: enabled ({})", proxy.url()),
        None => info!("Proxy: disabled"),
    }

    match config.active_clash() {
        Some(clash) => info!("Clash API: enabled ({})", clash.api_url),
        None => info!("Clash API: disabled"),
    }

    if config.feishu.enabled {
        info!(
            "Notifications: enabled (origin: {}, template: {}@{})",
            config.feishu.origin, config.feishu.template_id, config.feishu.template_version
        );
    } else {
        info!("Notifications: disabled");
    }

    info!(
        "Alert threshold: {} consecutive failures",
        config.failure_threshold()
    );
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Initialize structured logging
fn initialize_tracing(format: LogFormat) {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false);

    let registry = tracing_subscriber::registry().with(filter_layer);

    match format {
        LogFormat::Json => registry.with(fmt_layer.json()).init(),
        LogFormat::Text => registry.with(fmt_layer).init(),
    }
}
