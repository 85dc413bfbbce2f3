//! HTTP server for the study backend

pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::config::{Environment, StudyHubConfig};
use crate::error::{Error, RedactedBody, Result};
use crate::jobs::JobSweeper;
use crate::storage::DOCUMENTS_PREFIX;
use state::AppState;

/// Study HTTP server
pub struct StudyHubServer {
    config: StudyHubConfig,
    state: AppState,
}

impl StudyHubServer {
    /// Create a new server
    pub async fn new(config: StudyHubConfig) -> Result<Self> {
        let state = AppState::new(config.clone()).await?;
        Ok(Self { config, state })
    }

    /// Create a server around prepared state
    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config().clone(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn cors_layer(&self) -> CorsLayer {
        let server = &self.config.server;
        if !server.enable_cors {
            return CorsLayer::new();
        }

        let origins: Vec<HeaderValue> = server
            .allowed_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let documents = ServeDir::new(self.state.files().documents_dir());

        Router::new()
            // Health check
            .route("/health", get(health_check))
            .nest("/studies", routes::study_routes(self.config.server.max_upload_size))
            .nest("/api", routes::api_routes())
            .nest_service(&format!("/{}", DOCUMENTS_PREFIX), documents)
            .fallback(not_found)
            .with_state(self.state.clone())
            // Middleware layers (order matters - applied bottom to top)
            .layer(middleware::map_response_with_state(
                self.state.clone(),
                redact_internal_errors,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(CompressionLayer::new())
            .layer(self.cors_layer())
    }

    /// Start the server and run until ctrl-c or SIGTERM
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let router = self.build_router();

        let sweeper = JobSweeper::new(
            self.state.jobs().clone(),
            self.config.jobs.sweep_interval(),
            self.config.jobs.retention(),
        )
        .start();

        tracing::info!(
            "Starting study server on http://{} ({:?})",
            addr,
            self.config.server.environment
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)));

        sweeper.stop().await;
        tracing::info!("Server stopped");
        served
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Replace 500-class error detail with the generic body in production
async fn redact_internal_errors(State(state): State<AppState>, response: Response) -> Response {
    if state.config().server.environment != Environment::Production {
        return response;
    }
    match response.extensions().get::<RedactedBody>().cloned() {
        Some(RedactedBody(body)) => (response.status(), Json(body)).into_response(),
        None => response,
    }
}

/// Fallback for unknown routes
async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "success": false,
            "message": "Sorry, can't find that route!",
        })),
    )
}
