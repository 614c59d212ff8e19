use std::time::Duration;

use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use tokio_util::sync::CancellationToken;

use bridge_relay_logic::aggregator::Aggregator;
use bridge_relay_logic::chain::build_chain_client;
use bridge_relay_logic::config::AppConfig;
use bridge_relay_logic::listener::{reconciliation_task, Listener};
use bridge_relay_logic::queue::NatsQueue;
use bridge_relay_logic::relayer::InMemoryRelayer;
use bridge_relay_logic::store::{PostgresStore, Store};

use crate::cli::{Cli, LogFormat};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub fn init_tracing(cli: &Cli, environment: &str) {
    let human = match cli.log_format {
        Some(LogFormat::Human) => true,
        Some(LogFormat::Json) => false,
        None => matches!(environment, "development" | "testnet"),
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if human {
        subscriber.init();
    } else {
        subscriber.json().init();
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = AppConfig::load(&cli.config)?;
    init_tracing(&cli, &cfg.environment);

    tracing::info!(environment = %cfg.environment, chains = cfg.chains.len(), "starting bridge relay");

    let db = Database::connect(&cfg.database.dsn).await?;
    migration::Migrator::up(&db, None).await?;
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(PostgresStore::new(db));

    let queue = std::sync::Arc::new(NatsQueue::connect(cfg.queue.clone()).await?);
    let relayer = std::sync::Arc::new(InMemoryRelayer);

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    for chain_cfg in cfg.chains.iter().filter(|c| c.enabled) {
        let chain = build_chain_client(chain_cfg);
        let listener = Listener::new(chain_cfg.clone(), chain, store.clone(), queue.clone(), cancel.clone());
        let chain_name = chain_cfg.name.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                tracing::error!(chain = %chain_name, error = %e, "listener task exited with error");
            }
        }));
    }

    tasks.push(tokio::spawn(reconciliation_task(store.clone(), queue.clone(), cancel.clone())));

    let aggregator = std::sync::Arc::new(Aggregator::new(cfg.clone(), store.clone(), queue.clone(), relayer));
    let aggregator_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        aggregator.run(aggregator_cancel).await;
    }));

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, cancelling tasks");
    cancel.cancel();

    let shutdown = futures_join_all_with_timeout(tasks, SHUTDOWN_GRACE).await;
    if shutdown {
        tracing::info!("graceful shutdown complete");
    } else {
        tracing::warn!("graceful shutdown timed out, some tasks may not have exited cleanly");
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let interrupt = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}

/// Waits for every task to finish, bounded by `grace`; returns whether all
/// tasks finished within that window.
async fn futures_join_all_with_timeout(tasks: Vec<tokio::task::JoinHandle<()>>, grace: Duration) -> bool {
    let all = futures::future::join_all(tasks);
    tokio::time::timeout(grace, all).await.is_ok()
}
