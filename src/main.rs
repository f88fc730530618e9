//! Main entry point for the Pickup Room lobby service
//!
//! Loads configuration, initializes logging and runs the service until
//! SIGINT or SIGTERM, then shuts down within the configured timeout.

use anyhow::Result;
use clap::Parser;
use pickup_room::config::{validate_config, AppConfig};
use pickup_room::service::{dry_run, AppState, HealthCheck, ServiceProbe};
use std::path::PathBuf;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Pickup Room - captain-draft pickup lobbies with Glicko-2 ratings
#[derive(Parser)]
#[command(
    name = "pickup-room",
    version,
    about = "Captain-draft pickup lobby service",
    long_about = "Pickup Room queues players into lobbies, lets two captains draft teams in \
                 turns, takes the result from both captains and updates Glicko-2 ratings. \
                 Commands are consumed from and events published to an AMQP broker."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override health/metrics HTTP port")]
    http_port: Option<u16>,

    /// Data file override
    #[arg(long, value_name = "FILE", help = "JSON file holding players and maps")]
    data_file: Option<PathBuf>,

    /// Team size override
    #[arg(long, value_name = "N", help = "Override players per team")]
    team_size: Option<usize>,

    /// Random seed override
    #[arg(long, value_name = "SEED", help = "Seed captain and map selection")]
    seed: Option<u64>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and data file, then exit without connecting"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log a health summary every 30 seconds
async fn health_check_task(probe: ServiceProbe) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while probe.is_running().await {
        interval.tick().await;

        match HealthCheck::check(&probe).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} active lobbies, {} queued, {} completed",
                    health.status,
                    health.stats.active_lobbies,
                    health.stats.queued_players,
                    health.stats.lobbies_completed
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Pickup Room lobby service v{}", pickup_room::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!(
        "   AMQP queue/exchange: {} / {}",
        config.amqp.command_queue, config.amqp.events_exchange
    );
    info!("   Players per team: {}", config.lobby.players_per_team);
    match &config.storage.data_file {
        Some(path) => info!("   Data file: {}", path.display()),
        None => info!("   Data file: none (in memory)"),
    }
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }
    if let Some(http_port) = args.http_port {
        config.service.health_port = http_port;
    }
    if let Some(data_file) = &args.data_file {
        config.storage.data_file = Some(data_file.clone());
    }
    if let Some(team_size) = args.team_size {
        config.lobby.players_per_team = team_size;
    }
    if let Some(seed) = args.seed {
        config.service.rng_seed = Some(seed);
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        match dry_run(&config).await {
            Ok(report) => {
                info!(
                    "Dry run OK: lobbies of {} players, {} maps available",
                    report.lobby_size, report.maps
                );
                return Ok(());
            }
            Err(e) => {
                error!("Dry run failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.probe()));

    info!("Pickup Room is running. Press Ctrl+C to shut down");
    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, beginning graceful shutdown...");

    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Pickup Room stopped");
    Ok(())
}
