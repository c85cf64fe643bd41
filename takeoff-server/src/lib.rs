//! HTTP front for the takeoff workflow: upload a drawing, let the model
//! propose rows, edit them, recompute and download the result.

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use vision_takeoff::GeminiConfig;

pub mod handlers;
pub mod session;

use handlers::*;
pub use session::{Session, SessionStore};

/// Uploads are base64 drawings; 10MB covers a large scanned sheet
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub gemini: GeminiConfig,
    /// Server-side key for callers that do not bring their own
    pub default_api_key: Option<String>,
}

impl AppState {
    pub fn new(gemini: GeminiConfig, default_api_key: Option<String>) -> Self {
        Self {
            sessions: SessionStore::new(),
            gemini,
            default_api_key,
        }
    }

    /// Use a store with non-default expiry limits
    pub fn with_sessions(mut self, sessions: SessionStore) -> Self {
        self.sessions = sessions;
        self
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}

pub fn create_app(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/analyze", post(analyze_handler))
        .route("/recompute", post(recompute_handler))
        .route(
            "/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/sessions/:id/rows", put(edit_rows_handler))
        .route("/sessions/:id/mode", put(change_mode_handler))
        .route("/sessions/:id/export/:format", get(export_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(addr: &str, state: AppState, allowed_origins: &[String]) -> anyhow::Result<()> {
    let app = create_app(state, allowed_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Tracing with `RUST_LOG`, defaulting to info
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
