//! Customer/License API — Main Application Entry Point
//!
//! An API-key-gated access layer over a customer/license table. Callers
//! authenticate with an opaque key carried in the JSON payload, are
//! classified into a privilege tier (customer, admin, super), and invoke
//! one of a small set of named operations: help, query, license, update,
//! create. Row- and field-level access control is enforced per tier.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: opaque API keys classified into tiers
//! - **Format**: JSON requests/responses with a uniform envelope
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Construct the repository, key store, and audit collaborators
//! 5. Build HTTP router and start serving on the configured port

mod config;
mod db;
mod error;
mod handlers;
mod models;
mod repository;
mod services;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::db::DbPool;
use crate::repository::{FileAuditSink, PgCustomerRepository, PgKeyStore};
use crate::services::auth_service::AuthorizationEngine;
use crate::services::operation_service::OperationDispatcher;

/// Shared application state: the pool for plumbing endpoints and the
/// dispatcher that owns the authorization-and-dispatch core.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub dispatcher: Arc<OperationDispatcher>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging. Reads RUST_LOG, defaults to "info".
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    // Construct the collaborators explicitly and hand them to the engine;
    // nothing in the core reaches for ambient state.
    let keys = Arc::new(PgKeyStore::new(pool.clone()));
    let repo = Arc::new(PgCustomerRepository::new(pool.clone()));
    let audit = Arc::new(FileAuditSink::new(&config.audit_log_path));
    let dispatcher = Arc::new(OperationDispatcher::new(
        AuthorizationEngine::new(keys),
        repo,
        audit,
    ));

    let state = AppState { pool, dispatcher };

    // One route pair carries the whole operation surface: the verb selects
    // read- vs write-intent, the payload names the operation.
    let app = Router::new()
        .route(
            "/api",
            get(handlers::api::api_get).post(handlers::api::api_post),
        )
        .route("/health", get(handlers::health::health_check))
        // Distributed tracing middleware for observability
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
