//! Racefeed binary entrypoint: poller plus streaming server.

use anyhow::Context;
use api_server::{ApiServer, AppState, ServerConfig};
use auth::{IdentityClient, SessionManager};
use clap::Parser;
use exchange_core::api::BettingClient;
use exchange_core::config::{Config, MarketSource};
use exchange_core::db::{self, InMemoryResultsSink, ResultsSink, SettlementRepository};
use exchange_core::market_set::{MarketSetProvider, PgMarketSet, StaticMarketSet};
use market_poller::Poller;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const DEFAULT_LOG_FILTER: &str =
    "api_server=info,market_poller=info,exchange_core=info,auth=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Live exchange market feed", long_about = None)]
struct Args {
    /// TOML configuration file. Environment variables are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Skip database migrations.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let log_json = args.log_json
        || std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
    init_tracing(log_json);

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("invalid configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;

    info!(
        region = ?config.exchange.region,
        certificate = config.credentials.has_certificate(),
        market_source = ?config.markets.source,
        "Starting racefeed"
    );

    // Persistence and market set
    let (sink, markets): (Arc<dyn ResultsSink>, Arc<dyn MarketSetProvider>) =
        match &config.database {
            Some(database) => {
                let pool = db::create_pool(database)
                    .await
                    .context("failed to connect to database")?;

                let skip_migrations = args.skip_migrations
                    || std::env::var("SKIP_MIGRATIONS")
                        .map(|v| v == "true" || v == "1")
                        .unwrap_or(false);
                if !skip_migrations {
                    info!("Running database migrations...");
                    db::run_migrations(&pool)
                        .await
                        .context("failed to run database migrations")?;
                } else {
                    info!("Skipping migrations");
                }

                let markets: Arc<dyn MarketSetProvider> = match config.markets.source {
                    MarketSource::Database => Arc::new(PgMarketSet::new(pool.clone())),
                    MarketSource::Static => {
                        Arc::new(StaticMarketSet::new(config.markets.market_ids.clone()))
                    }
                };
                (Arc::new(SettlementRepository::new(pool)), markets)
            }
            None => {
                warn!("No DATABASE_URL configured, settlements are kept in memory only");
                (
                    Arc::new(InMemoryResultsSink::new()),
                    Arc::new(StaticMarketSet::new(config.markets.market_ids.clone())),
                )
            }
        };

    // Exchange access
    let identity = IdentityClient::new(&config.exchange, &config.credentials);
    let sessions = Arc::new(SessionManager::new(Arc::new(identity)));
    let betting = Arc::new(BettingClient::new(&config.exchange)?);

    // Pipeline
    let broadcaster = server_config.broadcaster();
    let poller = Poller::new(
        config.poller.clone(),
        sessions.clone(),
        betting,
        markets,
        sink,
        Arc::new(broadcaster.clone()),
    );

    let shutdown = CancellationToken::new();
    let poller_handle = poller.spawn(shutdown.clone());

    let state = AppState::new(
        broadcaster,
        sessions,
        poller_handle.shared_stats(),
        server_config.heartbeat(),
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let server_result = ApiServer::new(server_config, state)
        .run(shutdown.clone())
        .await;

    shutdown.cancel();
    poller_handle.stop().await;
    info!("Shutdown complete");

    server_result
}

/// Resolve on Ctrl-C or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM, waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
