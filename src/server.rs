//! # Server Configuration
//!
//! Application wiring: loads the integrations file and credential store,
//! boots the integration manager and serves the HTTP surface.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::Method,
    middleware,
    response::Json,
    routing::{get, post},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use utoipa::OpenApi;

use crate::config::{AppConfig, ConfigError, IntegrationsConfig};
use crate::credentials::{
    CredentialLifecycle, CredentialStore, FileCredentialStore, RenewalError, StoreError,
};
use crate::handlers;
use crate::manager::{IntegrationManager, mail_auth_middleware};
use crate::models::SourceKind;
use crate::routing::RoutingSurface;
use crate::sources::DefaultSourceFactory;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub manager: Arc<IntegrationManager>,
    pub lifecycle: Arc<CredentialLifecycle>,
    /// Routes mounted by sources (mail OAuth handshake)
    pub routes: RoutingSurface,
    /// Whether feed routes are gated on an authorized mail source
    pub mail_auth_enabled: bool,
}

/// Errors that abort startup
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Renewal(#[from] RenewalError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Load the integrations file and credential store, then build the initial
/// source set. A missing credential store is created empty; anything
/// malformed is fatal.
pub async fn build_state(config: Arc<AppConfig>) -> Result<AppState, StartupError> {
    let integrations = IntegrationsConfig::load(&config.integrations_path).await?;
    let store = Arc::new(FileCredentialStore::new(&config.credentials_path));
    let credentials = store.load().await?;
    info!(
        enabled = ?integrations.enabled_kinds(),
        stored_credentials = credentials.len(),
        "Integrations loaded"
    );

    let factory = Arc::new(DefaultSourceFactory::new(config.default_mail_redirect_uri()));
    let manager = Arc::new(IntegrationManager::new(factory, config.fetch_timeout()));
    let routes = RoutingSurface::new();
    let mail_auth_enabled = integrations.is_enabled(SourceKind::Mail);

    let lifecycle = CredentialLifecycle::new(
        manager.clone(),
        store,
        config.integrations_path.clone(),
        routes.clone(),
        integrations,
        credentials,
    );
    lifecycle.bootstrap().await?;

    Ok(AppState {
        config,
        manager,
        lifecycle,
        routes,
        mail_auth_enabled,
    })
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let gate = state.manager.auth_middleware_for(state.mail_auth_enabled);
    let feed = Router::new()
        .route("/", get(handlers::feed::index))
        .route("/api/notifications", get(handlers::feed::list_notifications))
        .route_layer(middleware::from_fn_with_state(gate, mail_auth_middleware));

    let routes = state.routes.clone();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .merge(feed)
        .route("/receive-cookie", post(handlers::credentials::receive_cookie))
        .route("/healthz", get(handlers::healthz))
        .route("/openapi.json", get(openapi_json))
        .fallback(move |request: Request| {
            let routes = routes.clone();
            async move { routes.dispatch(request).await }
        })
        .with_state(state)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Starts the server and serves until `shutdown` is cancelled
pub async fn run_server(config: AppConfig, shutdown: CancellationToken) -> Result<(), StartupError> {
    let addr = config
        .bind_addr()
        .map_err(|source| ConfigError::InvalidBindAddr {
            value: config.api_bind_addr.clone(),
            source,
        })?;

    let state = build_state(Arc::new(config)).await?;
    let manager = state.manager.clone();
    let profile = state.config.profile.clone();
    let app = create_app(state);

    // Warm the cache so `?cached=true` has something to return.
    let warmed = manager.fetch_all().await;
    info!(notifications = warmed.len(), "Initial fetch completed");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    info!(address = %addr, profile = %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(StartupError::Serve)?;

    info!("Server shutdown complete");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::healthz,
        crate::handlers::feed::index,
        crate::handlers::feed::list_notifications,
        crate::handlers::credentials::receive_cookie,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::NotificationRecord,
            crate::models::SourceKind,
            crate::handlers::feed::FeedResponse,
            crate::handlers::credentials::ReceiveCookieRequest,
            crate::handlers::credentials::ReceiveCookieResponse,
            crate::error::ApiError,
        )
    ),
    info(
        title = "notifeed API",
        description = "Merged notification feed across mail, code hosting, chat and notes",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
