mod config;
mod db;
mod error;
mod handlers;
mod helper;
mod metadata;
mod middleware;
mod models;
mod services;
mod storage;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DatabaseBackend};
use crate::db::Database;
use crate::metadata::{MemoryStore, MetadataStore};
use crate::services::reservation::UPLOADING_TTL;
use crate::services::{
    ChunkAssembler, ContentStore, DownloadTracker, EngineSettings, FileEngine, RateLimiters,
    UploadReservations,
};
use crate::storage::StorageManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: FileEngine,
    pub assembler: ChunkAssembler,
    pub reservations: UploadReservations,
    pub limiters: RateLimiters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dropvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DropVault...");

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    // Metadata backend
    let store: Arc<dyn MetadataStore> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            let db = Database::new(&config.database.path).await?;
            db.run_migrations().await?;
            tracing::info!("Database initialized at {}", config.database.path);
            Arc::new(db)
        }
        DatabaseBackend::Memory => {
            tracing::warn!("Using in-memory metadata, file links will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Storage and core services
    let storage = StorageManager::from_config(&config);
    tracing::info!("New uploads go to {} storage", storage.default_location().storage_type());
    let content = ContentStore::new(
        storage,
        config.storage.data_path(),
        config.storage.max_memory_bytes(),
    );
    let engine = FileEngine::new(
        store,
        content,
        DownloadTracker::new(),
        EngineSettings::from_config(&config),
    );

    let state = AppState {
        config: config.clone(),
        engine,
        assembler: ChunkAssembler::new(config.storage.data_path()),
        reservations: UploadReservations::new(),
        limiters: RateLimiters::new(),
    };

    spawn_background_tasks(&state);

    // Build router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn spawn_background_tasks(state: &AppState) {
    state
        .engine
        .cleanup()
        .spawn_periodic(Duration::from_secs(state.config.cleanup.interval_secs.max(1)));
    state.limiters.spawn_sweeper();

    let tracker = state.engine.tracker().clone();
    let assembler = state.assembler.clone();
    let reservations = state.reservations.clone();
    let interval = Duration::from_secs(state.config.cleanup.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let expired = tracker.sweep();
            if expired > 0 {
                tracing::debug!("Dropped {} expired download markers", expired);
            }
            reservations.reap();
            if let Err(e) = assembler.sweep_stale(UPLOADING_TTL).await {
                tracing::warn!("Stale upload sweep failed: {}", e);
            }
        }
    });
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth = axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::auth::auth_middleware,
    );

    // Public routes, deletion excepted (API token required when configured)
    let public_routes = Router::new()
        .route(
            "/api/files/:id",
            get(handlers::file::get_file)
                .merge(delete(handlers::file::delete_file).layer(auth.clone())),
        )
        .route("/d/:id", get(handlers::file::download_file))
        .route("/h/:hotlink_id", get(handlers::file::hotlink));

    // Protected routes (API token required when configured)
    let protected_routes = Router::new()
        .route("/api/files", post(handlers::file::upload_file))
        .route("/api/chunks/reserve", post(handlers::chunk::reserve))
        .route("/api/chunks/:session_id", post(handlers::chunk::upload_chunk))
        .route(
            "/api/chunks/:session_id/complete",
            post(handlers::chunk::complete),
        )
        .layer(auth);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
