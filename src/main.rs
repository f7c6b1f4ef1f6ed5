//! Outbox relay binary.
//!
//! Loads configuration from `OUTBOX_RELAY__*` environment variables, connects
//! to PostgreSQL and Redis, then runs the relay scheduler and lease sweeper
//! until SIGINT or SIGTERM.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use outbox_relay::adapters::{PgChangeNotifier, PostgresOutboxStore, RedisStreamPublisher};
use outbox_relay::application::{LeaseSweeper, OutboxRelay, RelayScheduler, RelaySchedulerConfig};
use outbox_relay::config::{AppConfig, ServiceConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config.service)?;

    info!(
        instance = %config.service.instance_name,
        environment = ?config.service.environment,
        workers = config.relay.workers,
        notifications = config.relay.notifications_enabled,
        "Starting outbox relay"
    );

    let pool = PgPoolOptions::new()
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .idle_timeout(Some(config.database.idle_timeout()))
        .max_lifetime(Some(config.database.max_lifetime()))
        .connect(&config.database.url)
        .await?;

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations applied");
    }

    let redis = redis::Client::open(config.redis.url.as_str())?;
    let redis_conn = redis.get_multiplexed_tokio_connection().await?;
    let publisher = Arc::new(
        RedisStreamPublisher::new(redis_conn)
            .with_stream_prefix(config.redis.stream_prefix.clone())
            .with_max_len(config.redis.stream_max_len)
            .with_timeout(config.redis.timeout()),
    );

    let store = Arc::new(PostgresOutboxStore::new(pool.clone()));
    let policy = config.relay.retry_policy();

    let relay = OutboxRelay::new(store.clone(), publisher)
        .with_retry_policy(policy)
        .with_identity(config.relay.message_identity());

    let mut scheduler = RelayScheduler::new(Arc::new(relay)).with_config(
        RelaySchedulerConfig::default()
            .with_poll_interval(config.relay.poll_interval())
            .with_workers(config.relay.workers)
            .with_notify_channel(config.relay.notify_channel.clone())
            .with_reconnect_delay(config.relay.notify_reconnect_delay()),
    );
    if config.relay.notifications_enabled {
        scheduler = scheduler.with_notifier(Arc::new(PgChangeNotifier::new(pool.clone())));
    }

    let sweeper = LeaseSweeper::new(store, policy, config.relay.lease_timeout())
        .with_interval(config.relay.sweep_interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { scheduler.run(shutdown).await }
    });
    let sweeper_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

    wait_for_shutdown_signal().await;
    info!("Shutdown requested, finishing in-flight publishes");

    // Receivers are gone only if both tasks already exited.
    let _ = shutdown_tx.send(true);

    scheduler_task.await??;
    sweeper_task.await??;

    pool.close().await;
    info!("Outbox relay stopped");
    Ok(())
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(service: &ServiceConfig) -> Result<(), BoxError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&service.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if service.json_logs() {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to register Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
