use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botforge::billing::spawn_refund_sweeper;
use botforge::config::Config;
use botforge::notifications::{EmailService, WorkflowNotifier};
use botforge::AppState;

#[derive(Parser, Debug)]
#[command(name = "botforge")]
#[command(author, version, about = "Multi-tenant chatbot platform backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "botforge.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting BotForge v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir)?;

    // Initialize database
    let db = botforge::db::init(&config.server.data_dir, config.database.max_connections).await?;

    // Ensure the bootstrap admin account exists
    botforge::api::auth::ensure_admin_account(&db, &config).await?;

    // Verify the environment before accepting traffic
    let report = botforge::startup::run_startup_checks(&config, &db).await;
    if !report.can_serve() {
        anyhow::bail!("Startup checks failed: {}", report.summary());
    }

    // Background refund processing
    spawn_refund_sweeper(db.clone(), config.billing.clone());

    let mailer = EmailService::new(config.email.clone());
    let workflow = WorkflowNotifier::new(config.workflow.clone());
    let state = Arc::new(AppState::new(config.clone(), db, mailer, workflow));

    let app = botforge::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
