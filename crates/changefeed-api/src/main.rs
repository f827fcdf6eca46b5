// Changefeed API server
// Decision: DATABASE_URL selects PostgreSQL storage; without it everything runs in memory
// Decision: Live feeds are SSE; offsets are sequence numbers so clients resume with Last-Event-ID

mod changes;
mod common;
mod directory;
mod notifications;
mod streams;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use changefeed_core::{
    run_migrations, Changefeed, ChangefeedConfig, EntityDirectory, Event, InMemoryDirectory,
    InMemoryEventLog, InMemoryNotificationStore, Notification, NotificationType,
    PostgresDirectory, PostgresEventLog, PostgresNotificationStore, RecordedChange,
    RedriveReport, RepositoryRecord, UserSettings,
};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::common::{AppState, CountResponse, ListResponse};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        changes::record_change,
        changes::reconcile,
        streams::list_events,
        streams::stream_sse,
        streams::redrive,
        notifications::list_notifications,
        notifications::unread_count,
        notifications::mark_all_read,
        notifications::get_notification,
        notifications::mark_read,
        notifications::archive,
        directory::put_repository,
        directory::put_user_settings,
    ),
    components(
        schemas(
            Event, Notification, NotificationType, RecordedChange, RedriveReport,
            RepositoryRecord, UserSettings, CountResponse,
            ListResponse<Notification>,
            changes::RecordChangeRequest,
            streams::EventsResponse,
            directory::PutRepositoryRequest,
        )
    ),
    tags(
        (name = "changes", description = "Mutation intake"),
        (name = "streams", description = "Catch-up reads and live event streams (SSE)"),
        (name = "notifications", description = "Notification inbox"),
        (name = "directory", description = "Repository owners and user settings")
    ),
    info(
        title = "Changefeed API",
        version = "0.1.0",
        description = "Change feed, live subscriptions and notification inbox",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "changefeed_api=debug,changefeed_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("changefeed-api starting...");

    let config = ChangefeedConfig::from_env();
    tracing::info!(
        backlog_limit = config.backlog_limit,
        read_batch_size = config.read_batch_size,
        retry_attempts = config.retry.max_attempts,
        "Changefeed configured"
    );

    let (changefeed, directory): (Changefeed, Arc<dyn EntityDirectory>) =
        match std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
            Some(database_url) => {
                let pool = PgPoolOptions::new()
                    .max_connections(20)
                    .connect(&database_url)
                    .await
                    .context("Failed to connect to database")?;
                run_migrations(&pool)
                    .await
                    .context("Failed to run migrations")?;
                tracing::info!("Connected to database");
                let directory: Arc<dyn EntityDirectory> =
                    Arc::new(PostgresDirectory::new(pool.clone()));
                let changefeed = Changefeed::new(
                    Arc::new(PostgresEventLog::new(pool.clone())),
                    Arc::new(PostgresNotificationStore::new(pool)),
                    directory.clone(),
                    config,
                );
                (changefeed, directory)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory storage (data is lost on restart)");
                let directory: Arc<dyn EntityDirectory> = Arc::new(InMemoryDirectory::new());
                let changefeed = Changefeed::new(
                    Arc::new(InMemoryEventLog::new()),
                    Arc::new(InMemoryNotificationStore::new()),
                    directory.clone(),
                    config,
                );
                (changefeed, directory)
            }
        };
    let state = AppState::new(Arc::new(changefeed), directory);

    // Retry notifications for changes whose derivation failed
    let reconcile_interval = std::env::var("RECONCILE_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    spawn_reconciler(state.clone(), Duration::from_secs(reconcile_interval));

    // Load API prefix from environment (default: empty)
    // Example: API_PREFIX="/api" results in routes like /api/v1/changes
    let api_prefix = std::env::var("API_PREFIX").unwrap_or_default();
    if !api_prefix.is_empty() {
        tracing::info!(prefix = %api_prefix, "API prefix configured");
    }

    // Load CORS allowed origins from environment (optional)
    // Only needed when UI is served from a different origin than the API
    // Example: CORS_ALLOWED_ORIGINS="https://app.example.com,https://admin.example.com"
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
    }

    let app = build_app(state, &api_prefix);

    // Add Swagger UI
    let app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    // Add CORS layer only if origins are configured
    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::CACHE_CONTROL,
                    header::HeaderName::from_static("last-event-id"),
                ])
                .allow_credentials(true),
        )
    } else {
        app
    };

    // Add tracing
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:9300".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Periodically retry parked changes
fn spawn_reconciler(state: AppState, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if state.changefeed.pending_count() == 0 {
                continue;
            }
            match state.changefeed.reconcile().await {
                Ok(created) => tracing::info!(created, "Reconciled parked changes"),
                Err(e) => tracing::warn!("Reconciliation failed: {}", e),
            }
        }
    });
}

/// All routes with state applied, health unprefixed
fn build_app(state: AppState, api_prefix: &str) -> Router {
    let api_routes = Router::new()
        .merge(changes::routes(state.clone()))
        .merge(streams::routes(state.clone()))
        .merge(notifications::routes(state.clone()))
        .merge(directory::routes(state));

    Router::new()
        .route("/health", get(health))
        .merge(build_router_with_prefix(api_routes, api_prefix))
}

/// Build router with optional API prefix (extracted for testing)
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}
