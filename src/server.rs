/// Server setup and initialization
///
/// Wires together all components: database, storages, plan catalog, payment
/// gateway, background job worker and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    approval::ApprovalStorage,
    config::{Config, JobConfig},
    content::ContentStorage,
    database::Database,
    flow::FlowStorage,
    membership::{HttpPaymentGateway, MembershipStorage, PaymentGateway, PlanRegistry},
    organisation::OrganisationStorage,
    runtime::{DomainJobHandler, JobQueue, JobSchedulerService, JobWorker},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the shared application state on top of an open database
///
/// Loads the plan catalog; the gateway is injected so tests can replace it.
pub async fn create_state(db: &Database, config: &Config, gateway: Arc<dyn PaymentGateway>) -> Result<AppState> {
    let jobs = JobQueue::new(db, &config.jobs);
    let memberships = MembershipStorage::new(db, jobs.clone());

    tracing::info!("📊 Initializing plan catalog");
    let plans = Arc::new(PlanRegistry::new(memberships.clone()));
    plans
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load plans from storage: {}", e))?;

    Ok(AppState {
        organisations: OrganisationStorage::new(db),
        flows: FlowStorage::new(db, jobs.clone()),
        content: ContentStorage::new(db),
        approvals: ApprovalStorage::new(db),
        memberships,
        plans,
        gateway,
        jobs,
        operator_token: config.server.operator_token.clone(),
    })
}

/// Job worker dispatching queued jobs to the state's storages
pub fn create_worker(state: &AppState, config: &JobConfig) -> JobWorker {
    let handler = DomainJobHandler::new(state.flows.clone(), state.memberships.clone());
    JobWorker::new(state.jobs.clone(), Arc::new(handler), config.batch_size, config.lease_secs)
}

/// HTTP router over an application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(state))
}

/// Create the main Axum application with all routes and background services
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🗄️ Connecting to database");
    let db = Database::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database '{}': {}", config.database.url, e))?;

    tracing::info!("💳 Initializing payment gateway client ({})", config.gateway.base_url);
    let gateway = HttpPaymentGateway::new(config.gateway.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize payment gateway: {}", e))?;

    let state = create_state(&db, &config, Arc::new(gateway)).await?;

    tracing::info!("⚙️ Initializing job worker");
    let worker = Arc::new(create_worker(&state, &config.jobs));
    let scheduler = JobSchedulerService::new(worker, &config.jobs)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize job scheduler: {}", e))?;

    // Start the job scheduler in background; the task owns it until shutdown
    tracing::info!("🚀 Starting job scheduler");
    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            tracing::error!("❌ Failed to start job scheduler: {}", e);
            return;
        }
        shutdown_signal().await;
        if let Err(e) = scheduler.stop().await {
            tracing::error!("❌ Failed to stop job scheduler: {}", e);
        }
    });

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = create_router(state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Log verbosity comes from `DOCFLOW_LOG` (e.g. `docflow=debug`), defaulting to `info`.
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("DOCFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting docflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_check() -> &'static str {
    "ok"
}
