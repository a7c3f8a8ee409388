use clap::{Parser, Subcommand};
use slotswap::adapters::{LineClient, LineNotifier, WebhookState};
use slotswap::config::AppConfig;
use slotswap::error::{Result, SwapError};
use slotswap::lifecycle::Controller;
use slotswap::registration::MemorySessions;
use slotswap::store::PostgresStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slotswap", about = "Reservation slot-swap matching bot")]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations and exit
    Migrate,
    /// Serve the LINE webhook
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;

    init_logging(&config);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("config error: {error}");
        }
        return Err(SwapError::Internal("invalid configuration".to_string()));
    }

    match cli.command {
        Commands::Migrate => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
        }
        Commands::Serve => serve(config).await?,
    }

    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    let store = Arc::new(
        PostgresStore::new(&config.database.url, config.database.max_connections).await?,
    );
    store.migrate().await?;

    let line = Arc::new(LineClient::new(
        &config.line.api_base,
        &config.line.channel_access_token,
    ));
    let sessions = Arc::new(MemorySessions::new(config.dialogue.idle_timeout_secs));
    let notifier = Arc::new(LineNotifier::new(Arc::clone(&line)));
    let controller = Arc::new(Controller::new(
        store,
        sessions,
        notifier,
        config.matching.max_retries,
    ));

    let app = slotswap::adapters::router(Arc::new(WebhookState {
        controller,
        line,
        channel_secret: config.line.channel_secret.clone(),
    }));

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Webhook server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "Failed to listen for shutdown signal");
    }
    info!("Shutting down");
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
