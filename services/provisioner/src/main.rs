//! Stackflow provisioner
//!
//! Runs provisioning and cluster bootstrap flows on a bounded worker pool,
//! periodically syncs settled stacks with the cloud, and serves the
//! operational health endpoints.

use std::sync::Arc;

use anyhow::Result;
use stackflow_provisioner::{
    api,
    cloud::MockCloudConnector,
    cluster_manager::MockClusterManager,
    config::{self, StoreKind},
    db::Database,
    events::{EventService, EventSink, TracingEventSink},
    facade::FacadeServices,
    flow::{FlowDispatcher, FlowExecutor, FlowManager},
    orchestrator::OrchestratorRegistry,
    state::AppState,
    store::{InMemoryStackStore, StackStore},
    worker::StackSyncWorker,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to STACKFLOW_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting stackflow provisioner");
    info!(
        listen_addr = %config.listen_addr,
        store = ?config.store,
        orchestrator = %config.orchestrator,
        "Configuration loaded"
    );

    let (store, sink): (Arc<dyn StackStore>, Arc<dyn EventSink>) = match config.store {
        StoreKind::Memory => (Arc::new(InMemoryStackStore::new()), Arc::new(TracingEventSink)),
        StoreKind::Postgres => {
            let db = match Database::connect(&config.database).await {
                Ok(db) => {
                    info!("Database connection established");
                    db
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to database");
                    return Err(e.into());
                }
            };

            if config.dev_mode {
                info!("Running database migrations (dev mode)");
                if let Err(e) = db.run_migrations().await {
                    error!(error = %e, "Failed to run migrations");
                    return Err(e.into());
                }
            }
            (Arc::new(db.stack_store()), Arc::new(db.event_sink()))
        }
    };

    // Only the mock backends are linked into this binary; real ones are
    // registered by embedders through the library.
    let orchestrator = OrchestratorRegistry::builtin().resolve(config.orchestrator)?;
    if !config.dev_mode {
        warn!("Running with mock cloud and cluster manager backends outside dev mode");
    }

    let services = FacadeServices {
        store: store.clone(),
        connector: Arc::new(MockCloudConnector::new()),
        orchestrator,
        cluster_manager: Arc::new(MockClusterManager::new()),
        events: EventService::with_default_messages(sink),
        images: config.images.clone(),
        polling: config.polling,
        request_timeout: config.cloud_request_timeout,
    };

    let executor = Arc::new(FlowExecutor::start(config.executor));
    let dispatcher = Arc::new(FlowDispatcher::from_services(&services));
    let flows = Arc::new(FlowManager::new(dispatcher, executor.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_handle = if config.sync_interval.is_zero() {
        info!("Stack sync worker disabled");
        None
    } else {
        let worker = StackSyncWorker::new(store.clone(), flows.clone(), config.sync_interval);
        let shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            worker.run(shutdown_rx).await;
        }))
    };

    let state = AppState::new(store, flows);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Some(handle) = sync_handle {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Stack sync worker did not shut down in time");
        }
    }

    if tokio::time::timeout(shutdown_timeout, executor.shutdown())
        .await
        .is_err()
    {
        warn!("Flow executor did not shut down in time");
    }

    info!("Provisioner shutdown complete");
    Ok(())
}
