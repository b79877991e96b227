//! Daemon Server Implementation
//!
//! HTTP front door for the router:
//! - `POST /v1/chat/completions` - OpenAI-compatible completions (JSON or SSE)
//! - `GET /dashboard/stats` - Quota usage, model catalogs and recent outcomes
//! - `GET /health` - Liveness
//!
//! Streaming responses are held back until the router produces its first
//! item, so a request that exhausts every provider before any output gets a
//! proper 503 instead of an empty event stream.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json,
};
use dashmap::DashMap;
use futures::{future::join_all, stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use switchboard_core::leaderboard::with_scores;
use switchboard_core::{
    CompletionProvider, CompletionRequest, GatewayConfig, ModelDetail, OutcomeRecord, Quota,
    Router, RouterError, StreamChunk,
};

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced to HTTP callers
#[derive(Debug)]
pub enum ApiError {
    /// Routing failed; always reported as 503
    Unavailable(RouterError),
    /// Building the response failed
    Internal(String),
}

impl From<RouterError> for ApiError {
    fn from(e: RouterError) -> Self {
        Self::Unavailable(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unavailable(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                format!("Service Unavailable: {e}"),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                message,
            ),
        };

        error!(error_type, message = %message, "Request failed");

        let body = json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Dashboard payloads
// ============================================================================

/// Per-provider dashboard row
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    name: String,
    default_model: String,
    models: Vec<ModelDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quota: Option<Quota>,
    usage: UsageCounts,
}

/// Current bucket counters
#[derive(Debug, Default, Serialize)]
pub struct UsageCounts {
    minute: u64,
    day: u64,
}

/// Body of `GET /dashboard/stats`
#[derive(Debug, Serialize)]
pub struct DashboardStats {
    providers: Vec<ProviderStats>,
    logs: Vec<OutcomeRecord>,
}

// ============================================================================
// Shared state
// ============================================================================

struct CachedModels {
    models: Vec<ModelDetail>,
    fetched_at: Instant,
}

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    router: Router,
    model_cache: Arc<DashMap<String, CachedModels>>,
    model_cache_ttl: Duration,
}

impl AppState {
    /// Wrap a router
    pub fn new(router: Router, model_cache_ttl: Duration) -> Self {
        Self {
            router,
            model_cache: Arc::new(DashMap::new()),
            model_cache_ttl,
        }
    }

    /// Scored model list for a provider, cached on success
    async fn models_for(&self, provider: &dyn CompletionProvider) -> Vec<ModelDetail> {
        let name = provider.name();
        if let Some(cached) = self.model_cache.get(name) {
            if cached.fetched_at.elapsed() < self.model_cache_ttl {
                return cached.models.clone();
            }
        }

        match provider.list_models().await {
            Ok(models) => {
                let models = with_scores(models);
                self.model_cache.insert(
                    name.to_string(),
                    CachedModels {
                        models: models.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                models
            }
            Err(e) => {
                warn!(provider = %name, error = %e, "Failed to fetch models");
                Vec::new()
            }
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn sse_event(chunk: &StreamChunk) -> Bytes {
    let payload = serde_json::to_string(chunk).unwrap_or_default();
    Bytes::from(format!("data: {payload}\n\n"))
}

async fn chat_completions(
    State(state): State<AppState>,
    Json(request): Json<CompletionRequest>,
) -> Result<Response, ApiError> {
    if !request.stream {
        let response = state.router.route(&request).await?;
        return Ok(Json(response).into_response());
    }

    let mut rx = state.router.route_stream(request);

    // Nothing has been sent yet, so exhaustion can still become a 503
    let first = match rx.recv().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(e)) => return Err(e.into()),
        // Clean finish without any output
        None => None,
    };

    let rest = stream::unfold(Some(rx), |rx| async move {
        let mut rx = rx?;
        match rx.recv().await {
            Some(Ok(chunk)) => Some((sse_event(&chunk), Some(rx))),
            Some(Err(e)) => {
                // Headers are gone; the stream just ends without [DONE]
                warn!(error = %e, "Stream exhausted after partial output");
                None
            }
            None => Some((Bytes::from_static(b"data: [DONE]\n\n"), None)),
        }
    });

    let events = stream::iter(first.as_ref().map(sse_event))
        .chain(rest)
        .map(Ok::<_, std::io::Error>);

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(events))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn dashboard_stats(State(state): State<AppState>) -> Json<DashboardStats> {
    let quota_stats = state.router.quota().stats();

    let providers = join_all(state.router.providers().iter().map(|provider| {
        let state = state.clone();
        let stats = quota_stats.get(provider.name()).copied();
        async move {
            let models = state.models_for(provider.as_ref()).await;
            ProviderStats {
                name: provider.name().to_string(),
                default_model: provider.default_model().to_string(),
                models,
                quota: stats.and_then(|s| s.quota),
                usage: stats
                    .map(|s| UsageCounts {
                        minute: s.minute,
                        day: s.day,
                    })
                    .unwrap_or_default(),
            }
        }
    }))
    .await;

    Json(DashboardStats {
        providers,
        logs: state.router.outcomes().recent(),
    })
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Build the HTTP application
pub fn app(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    axum::Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/dashboard/stats", get(dashboard_stats))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Daemon Server
// ============================================================================

/// The daemon server
pub struct DaemonServer {
    /// Interface to bind; a hostname or an IP literal
    host: String,
    /// Listen port
    port: u16,
    /// Shared handler state
    state: AppState,
}

impl DaemonServer {
    /// Create a server from resolved configuration
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let host = config.server.host.trim();
        if host.is_empty() {
            anyhow::bail!("Listen host must not be empty");
        }

        let router = Router::from_config(config);
        if router.providers().is_empty() {
            warn!("No providers enabled; every request will be rejected");
        }

        Ok(Self {
            host: host.to_string(),
            port: config.server.port,
            state: AppState::new(router, config.server.model_cache_ttl),
        })
    }

    /// Serve until `shutdown` resolves
    pub async fn run(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        // Hostnames resolve here; IPv6 literals need no brackets
        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .with_context(|| format!("Failed to bind {} port {}", self.host, self.port))?;
        let addr = listener
            .local_addr()
            .context("Listener has no local address")?;

        info!(
            addr = %addr,
            providers = ?self
                .state
                .router
                .providers()
                .iter()
                .map(|p| p.name().to_string())
                .collect::<Vec<_>>(),
            "Switchboard listening"
        );

        axum::serve(listener, app(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        info!("Server stopped");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
