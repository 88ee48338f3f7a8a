//! Main entry point for the trivia quorum coordinator
//!
//! Reads chat events as JSON lines on stdin, writes outbound messages as JSON
//! lines on stdout and serves health and metrics endpoints over HTTP.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};
use trivia_quorum::config::{validate_config, AppConfig};
use trivia_quorum::service::{AppState, HealthCheck};

/// Trivia Quorum - admission and quorum coordinator for chat trivia games
#[derive(Parser)]
#[command(
    name = "trivia-quorum",
    version,
    about = "Admission queue and quorum coordinator for chat-hosted trivia games",
    long_about = "Trivia Quorum collects /join requests per chat channel, caps the number of \
                 concurrently running games, queues channels behind that cap and starts a game \
                 once enough distinct players joined. Chat events are exchanged as JSON lines \
                 on stdin and stdout."
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

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(long, value_name = "PORT", help = "Override health server port")]
    health_port: Option<u16>,

    #[arg(long, value_name = "N", help = "Override the number of concurrently running games")]
    max_games: Option<usize>,

    #[arg(long, value_name = "N", help = "Override the number of players needed to start")]
    min_quorum: Option<usize>,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level.
///
/// Logs go to stderr because stdout carries the outbound chat messages.
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_writer(std::io::stderr)
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
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;

        let health = HealthCheck::check(&app_state).await;
        info!(
            "Health check: {} - {} channels ({} queued, {} running), {} games started",
            health.status,
            health.stats.active_channels,
            health.stats.waiting_for_slot,
            health.stats.running,
            health.stats.games_started
        );
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("🚀 Trivia Quorum Coordinator");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   Bot name: {}", config.service.bot_name);
    info!(
        "   Quorum: {} players within {}s",
        config.game.min_quorum, config.game.quorum_wait_seconds
    );
    info!("   Max concurrent games: {}", config.game.max_concurrent_games);
    info!("   Seeded channels: {}", config.channels.len());
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load configuration from file or environment and apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }
    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }
    if let Some(max_games) = args.max_games {
        config.game.max_concurrent_games = max_games;
    }
    if let Some(min_quorum) = args.min_quorum {
        config.game.min_quorum = min_quorum;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    let app_state = match AppState::new(config.clone()) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = app_state
        .attach_transport(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
    {
        error!("Failed to attach chat transport: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("✅ Trivia Quorum Coordinator is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;
    info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(()) => info!("✅ Graceful shutdown completed successfully"),
        Err(_) => warn!("⚠️  Shutdown timeout exceeded, forcing exit"),
    }

    info!("🛑 Trivia Quorum Coordinator stopped");
    // stdin is read on a blocking thread that never returns on its own
    std::process::exit(0);
}
