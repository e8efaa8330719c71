//! Lead Marketplace Backend Server
//!
//! Runs the lead expiry scheduler in the background and serves the bank
//! action API in front of the lifecycle engine.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};

use leadmarket_server::clock::{Clock, SystemClock};
use leadmarket_server::config::{Config, StoreBackend};
use leadmarket_server::db;
use leadmarket_server::lead::{
    ActionGateway, BankDirectory, LeadIntake, LeadStore, MemoryLeadStore, PgLeadStore,
};
use leadmarket_server::routes;
use leadmarket_server::scheduler::{JobScheduler, SchedulerSettings};
use leadmarket_server::state::AppState;
use leadmarket_server::sweeper::{AutoExpirySweeper, SweepJob};

const SWEEP_JOB: &str = "lead-expiry-sweep";

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        backend = ?config.store_backend,
        auction_window_hours = config.auction_window_hours,
        sweep_interval_minutes = config.sweep_interval_minutes,
        max_purchasers = ?config.max_purchasers_per_lead,
        "Starting lead marketplace server"
    );

    let (store, directory) = match init_store(&config).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!("Failed to initialize lead store: {}", e);
            std::process::exit(1);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Build the scheduler and its jobs
    let sweeper = Arc::new(AutoExpirySweeper::new(
        store.clone(),
        directory,
        config.sweeper_settings(),
    ));
    let mut scheduler = JobScheduler::new(SchedulerSettings {
        graceful_stop_timeout: config.graceful_stop_timeout(),
        metrics_window: config.metrics_window,
    });
    scheduler.register(
        SWEEP_JOB,
        config.sweep_interval(),
        Arc::new(SweepJob::new(sweeper, store.clone(), clock.clone())),
    );
    let scheduler = Arc::new(scheduler);

    if let Err(e) = scheduler.start().await {
        tracing::error!("Failed to start scheduler: {}", e);
        std::process::exit(1);
    }

    let gateway = Arc::new(ActionGateway::new(store.clone(), config.lifecycle_rules()));
    let intake = Arc::new(LeadIntake::new(store.clone(), config.auction_window()));
    let app_state = AppState::new(gateway, intake, store, scheduler.clone(), clock);

    let app = routes::app_router(app_state).layer(configure_cors(&config));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Health check at http://{}/health", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            scheduler.stop().await;
            std::process::exit(1);
        }
    };

    // Serve with graceful shutdown
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    let report = scheduler.stop().await;
    if report.timed_out {
        tracing::warn!("Background jobs did not finish within the grace period");
    }

    tracing::info!("Server shutdown complete");
}

async fn init_store(
    config: &Config,
) -> Result<(Arc<dyn LeadStore>, Arc<dyn BankDirectory>), Box<dyn std::error::Error>> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let pool = db::create_pool(config).await?;
            db::run_migrations(&pool).await?;
            let store = Arc::new(PgLeadStore::new(pool));
            let lead_store: Arc<dyn LeadStore> = store.clone();
            let directory: Arc<dyn BankDirectory> = store;
            Ok((lead_store, directory))
        }
        StoreBackend::Memory => {
            if config.environment.is_production() {
                return Err("the memory store backend is not allowed in production".into());
            }
            tracing::warn!(
                bank_users = config.bank_users.len(),
                "Using in-memory lead store, state is lost on restart"
            );
            let store = Arc::new(MemoryLeadStore::with_bank_users(config.bank_users.clone()));
            let lead_store: Arc<dyn LeadStore> = store.clone();
            let directory: Arc<dyn BankDirectory> = store;
            Ok((lead_store, directory))
        }
    }
}

fn configure_cors(config: &Config) -> CorsLayer {
    let Some(allowed) = config.cors_allowed_origins.as_deref() else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    };

    let origins: Vec<HeaderValue> = allowed
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
