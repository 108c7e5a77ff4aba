use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refresh_flow_config::{Config, LogConfig, StoreBackend};
use refresh_flow_service::{
    ExchangeCoordinator, HmacRefreshTokenStrategy, Hs256Signer, OAuthRefreshHandler,
    OidcRefreshHandler, RefreshFlowServer,
};
use refresh_flow_store::{
    EventSubscription, KeyValueBackend, MemoryBackend, NoOpAccessTokenStore, RedisBackend,
    RefreshTokenRepository, SqliteBackend, subscribe_events,
};
use refresh_flow_types::{ExchangeHandler, RefreshTokenStore, WorkerPool};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt::writer::BoxMakeWriter};

/// Buffered events between the Redis subscriber and the ingestion pool.
const EVENT_BUFFER: usize = 1024;
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(name = "refresh-flow", about = "refresh-flow: OAuth2/OIDC refresh token grant service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the refresh token exchange service.
    Serve {
        /// Path to the YAML configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Override the listening port (default: 38003).
        #[arg(short, long)]
        port: Option<u16>,
        /// Override the listening address (default: 127.0.0.1).
        #[arg(long)]
        host: Option<String>,
    },
    /// Delete a stored refresh token.
    Revoke {
        /// The refresh token to delete.
        token: String,
        /// Path to the YAML configuration file.
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port, host } => cmd_serve(config, port, host).await,
        Commands::Revoke { token, config } => cmd_revoke(&token, config).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    Config::load(path.as_deref()).map_err(|e| anyhow::anyhow!("config error: {e}"))
}

fn init_logging(log: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .with_context(|| format!("invalid log level '{}'", log.level))?;

    let (writer, guard) = match &log.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "refresh-flow.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    let installed = if log.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;
    Ok(guard)
}

async fn cmd_serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(p) = port {
        config.service.port = p;
    }
    if let Some(h) = host {
        config.service.host = h;
    }
    config.validate()?;
    let _log_guard = init_logging(&config.log)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting refresh-flow");

    let shutdown = CancellationToken::new();
    let backend = open_backend(&config, &shutdown).await?;
    let store = Arc::new(RefreshTokenRepository::new(
        backend,
        config.service.refresh_token_lifespan(),
    )?);

    let subscription = if config.store.backend == StoreBackend::Redis {
        let events = subscribe_events(
            &config.redis.url(),
            &config.redis.events_channel,
            EVENT_BUFFER,
        )
        .await
        .context("failed to subscribe to refresh token events")?;
        let pool = WorkerPool::new("ingest", config.store.ingest_concurrency);
        Some(EventSubscription::start(Arc::clone(&store), events, pool))
    } else {
        tracing::info!("event subscription requires the redis backend; disabled");
        None
    };

    let strategy = Arc::new(HmacRefreshTokenStrategy::from_base64(
        &config.service.refresh_token_key,
    )?);
    let signer = Arc::new(Hs256Signer::from_base64(&config.service.signing_key)?);
    let issuer = &config.discovery.issuer;

    let mut handlers: Vec<Arc<dyn ExchangeHandler>> = vec![Arc::new(OAuthRefreshHandler::new(
        store,
        Arc::new(NoOpAccessTokenStore),
        strategy,
        signer.clone(),
        issuer.clone(),
        config.service.access_token_lifespan(),
    ))];
    if config.service.oidc {
        handlers.push(Arc::new(OidcRefreshHandler::new(
            signer,
            issuer.clone(),
            config.service.id_token_lifespan(),
        )));
    }
    let coordinator = Arc::new(ExchangeCoordinator::new(
        handlers,
        config.service.session_kind(),
        config.service.concurrency,
    ));

    let addr: SocketAddr = format!("{}:{}", config.service.host, config.service.port)
        .parse()
        .context("invalid listen address")?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
        }
        signal.cancel();
    });

    let served = refresh_flow_service::serve(
        addr,
        RefreshFlowServer::new(coordinator),
        shutdown.clone(),
    )
    .await;
    shutdown.cancel();
    if let Some(subscription) = subscription {
        subscription.stop().await;
    }
    served.context("rpc server failed")?;
    Ok(())
}

async fn cmd_revoke(token: &str, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;
    let shutdown = CancellationToken::new();
    let backend = open_backend(&config, &shutdown).await?;
    let store = RefreshTokenRepository::new(backend, config.service.refresh_token_lifespan())?;
    store
        .delete(token)
        .await
        .map_err(|e| anyhow::anyhow!("revoke failed: {e}"))?;
    shutdown.cancel();
    eprintln!("refresh token revoked");
    Ok(())
}

/// Opens the configured backend. SQLite also gets a purge loop that runs
/// until `shutdown` fires.
async fn open_backend(
    config: &Config,
    shutdown: &CancellationToken,
) -> Result<Arc<dyn KeyValueBackend>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; sessions are lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        StoreBackend::Sqlite => {
            let backend = Arc::new(
                SqliteBackend::new(&config.store.sqlite_url)
                    .await
                    .map_err(|e| anyhow::anyhow!("database error: {e}"))?,
            );
            tokio::spawn(purge_loop(Arc::clone(&backend), shutdown.clone()));
            Ok(backend)
        }
        StoreBackend::Redis => {
            let backend = RedisBackend::connect(&config.redis.url())
                .await
                .map_err(|e| anyhow::anyhow!("redis error: {e}"))?;
            Ok(Arc::new(backend))
        }
    }
}

async fn purge_loop(backend: Arc<SqliteBackend>, shutdown: CancellationToken) {
    let mut ticks = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticks.tick() => match backend.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(purged = n, "removed expired refresh tokens"),
                Err(e) => tracing::warn!(error = %e, "purge of expired refresh tokens failed"),
            },
        }
    }
}
