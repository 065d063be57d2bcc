use std::sync::Arc;

use camview_events::EventBus;
use camview_rpc::{ConnectionCache, HttpConnector};
use camview_scanner::{PgScanStore, ScanLocks, Scanner};
use camview_worker::jobs::{run_device_sync, ScanContext};
use camview_worker::supervisor::{task_factory, BoxError};
use camview_worker::{BackoffConfig, PgDeviceRegistry, Supervisor, TaskArena, WorkerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "camview_worker=info,camview_rpc=info,camview_scanner=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    // --- Database ---
    let pool = match camview_db::create_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            std::process::exit(1);
        }
    };
    if let Err(e) = camview_db::run_migrations(&pool).await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }
    tracing::info!("Database ready");

    // --- Device sessions and scanning ---
    let bus = Arc::new(EventBus::default());
    let connector = match HttpConnector::new(config.rpc.request_timeout) {
        Ok(connector) => Arc::new(connector),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };
    let registry = Arc::new(PgDeviceRegistry::new(pool.clone()));
    let cache = Arc::new(
        ConnectionCache::new(registry.clone(), connector, config.rpc.clone())
            .with_events(Arc::clone(&bus)),
    );
    let store = Arc::new(PgScanStore::new(pool));
    let scanner = Arc::new(
        Scanner::new(store.clone(), store, config.scan.clone()).with_events(Arc::clone(&bus)),
    );

    let ctx = Arc::new(ScanContext {
        directory: registry,
        cache: Arc::clone(&cache),
        scanner,
        locks: Arc::new(ScanLocks::new()),
        quick_interval: config.quick_interval,
        full_interval: config.full_interval,
        sync_interval: config.sync_interval,
        backoff: BackoffConfig::default(),
    });
    let arena = Arc::new(TaskArena::new(config.shutdown_timeout));

    // --- Supervised services ---
    let supervisor = Supervisor::new(BackoffConfig::default(), config.shutdown_timeout);

    let invalidation = {
        let cache = Arc::clone(&cache);
        let bus = Arc::clone(&bus);
        task_factory(move |cancel| {
            let cache = Arc::clone(&cache);
            let bus = Arc::clone(&bus);
            async move {
                let subscription = bus.subscribe();
                cache.run_invalidation(subscription, cancel).await;
                Ok::<(), BoxError>(())
            }
        })
    };
    supervisor.add("cache-invalidation", invalidation).await;

    let device_sync = {
        let ctx = Arc::clone(&ctx);
        let arena = Arc::clone(&arena);
        let bus = Arc::clone(&bus);
        task_factory(move |cancel| {
            let ctx = Arc::clone(&ctx);
            let arena = Arc::clone(&arena);
            let bus = Arc::clone(&bus);
            async move {
                run_device_sync(ctx, arena, bus, cancel)
                    .await
                    .map_err(BoxError::from)
            }
        })
    };
    supervisor.add("device-sync", device_sync).await;

    tracing::info!("Worker started");

    shutdown_signal().await;

    supervisor.shutdown().await;
    arena.shutdown().await;
    cache.close_all().await;

    tracing::info!("Worker stopped");
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
