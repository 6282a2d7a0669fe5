//! HTTP transport.
//!
//! Exposes the query, collection and agent services as JSON endpoints under
//! `/api/v1`. See [`routes`] for the endpoint table.

pub mod routes;

use crate::collectors::CollectorRegistry;
use crate::config::{AppConfig, ConfigDir};
use crate::error::{Error, Result};
use crate::llm::LlmAgent;
use crate::orchestrator::CollectionService;
use crate::service::{AgentService, TrendService};
use crate::store::{TrendRepository, TrendStore};
use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Sources and profiles are re-read from here on every request.
    pub config_dir: ConfigDir,
    /// Profile whose sources `/collect` runs and whose store is served.
    pub profile: String,
    pub trends: TrendService,
    pub collector: CollectionService,
    /// `None` when no LLM key is configured.
    pub agent: Option<AgentService>,
}

impl AppState {
    /// Wire the services for `config.active_profile`.
    pub fn from_config(config_dir: ConfigDir, config: &AppConfig) -> Self {
        let repo: Arc<dyn TrendRepository> = Arc::new(TrendStore::new(
            &config.storage.base_path,
            &config.active_profile,
        ));
        let trends = TrendService::new(repo.clone());
        let collector = CollectionService::new(repo, CollectorRegistry::with_defaults(config));
        let agent = config.llm.is_configured().then(|| {
            AgentService::new(Arc::new(LlmAgent::new(&config.llm)), trends.clone())
        });
        Self {
            config_dir,
            profile: config.active_profile.clone(),
            trends,
            collector,
            agent,
        }
    }
}

/// Error response: `{"error": "<message>"}` with a mapped status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %e, "Request failed");
        }
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

/// The full application: API routes nested under `/api/v1`, request tracing
/// and a permissive CORS layer.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let agent = state.agent.as_ref().map(|a| a.agent_name().to_string());
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, agent = ?agent, "trendscope listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down server");
}
