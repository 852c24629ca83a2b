//! HTTP server for PressGate
//!
//! Serves the OAuth endpoints, the MCP Streamable HTTP endpoint and a small
//! REST surface over abilities, all on one axum router.

pub mod session;

use self::session::{SessionLayerState, SessionStore};
use crate::auth::{OAuthRouteState, RequestContext, RequestGuard, create_oauth_routes};
use crate::config::{Config, HttpConfig};
use crate::constants::ERROR_ABILITY_NOT_FOUND;
use crate::core::Dependencies;
use crate::error::{AbilityError, ApiError, StorageError};
use crate::mcp::{McpServerState, create_mcp_routes};
use crate::model::HostUser;
use crate::{PressGateError, Result};
use axum::{
    Router,
    extract::{Json, Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    LatencyUnit,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Interval between sweeps of expired codes and tokens
const PURGE_INTERVAL_SECS: u64 = 3600;

/// Application state shared across REST handlers
#[derive(Clone)]
pub struct AppState {
    deps: Dependencies,
}

/// Error type for HTTP handlers
#[derive(Debug)]
pub struct AppError(PressGateError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.0 {
            PressGateError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            PressGateError::Storage(StorageError::NotFound { entity, id }) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found: {}", entity, id),
            ),
            _ => {
                // Log full error details internally
                tracing::error!("Internal error: {:?}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        ApiError::new(code, message, status.as_u16()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<PressGateError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let http_config = config.http_config();
    let deps = crate::core::create_dependencies(&config).await?;

    // Generate signing keys up front rather than on the first token request
    deps.keys.get_private_key().await?;
    deps.keys.get_encryption_key().await?;

    spawn_purge_task(&deps);

    let session_store = Arc::new(SessionStore::new());
    let app = build_router(&deps, session_store);

    let addr = format!("{}:{}", http_config.host, http_config.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| PressGateError::config(format!("Invalid address {}: {}", addr, e)))?;

    tracing::info!("Starting HTTP server on {}", socket_addr);
    tracing::info!("   OAuth issuer: {}", http_config.issuer_url());
    tracing::info!("   MCP endpoint: {}/mcp", http_config.issuer_url());

    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| PressGateError::config(format!("Server error: {}", e)))?;

    Ok(())
}

/// Periodically delete expired codes and tokens
fn spawn_purge_task(deps: &Dependencies) {
    let storage = deps.storage.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(PURGE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match storage.purge_expired(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "Purged expired OAuth records"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge expired OAuth records"),
            }
        }
    });
}

/// Build the router with all endpoints
pub fn build_router(deps: &Dependencies, session_store: Arc<SessionStore>) -> Router {
    let http_config = deps.config.http_config();
    let issuer = http_config.issuer_url();

    let oauth_routes = create_oauth_routes(Arc::new(OAuthRouteState {
        authorization_server: deps.authorization_server.clone(),
        storage: deps.storage.clone(),
        issuer: issuer.clone(),
        site_name: deps.config.site_config().name,
        allow_localhost_redirects: http_config.allow_localhost_redirects,
        secure_cookies: http_config.secure,
    }));

    let mcp_routes = create_mcp_routes(Arc::new(McpServerState {
        abilities: deps.abilities.clone(),
        validator: deps.validator.clone(),
        issuer,
    }));

    let api_routes = Router::new()
        .route("/api/abilities", get(list_abilities_handler))
        .route("/api/abilities/{id}/run", post(run_ability_handler))
        .with_state(AppState { deps: deps.clone() });

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(oauth_routes)
        .merge(mcp_routes)
        .merge(api_routes)
        .layer(
            ServiceBuilder::new()
                // Tracing layer for request/response logging
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().include_headers(false))
                        .on_response(
                            DefaultOnResponse::new()
                                .level(tracing::Level::INFO)
                                .latency_unit(LatencyUnit::Micros),
                        ),
                )
                .layer(axum::middleware::from_fn(
                    crate::telemetry::track_http_metrics,
                ))
                .layer(cors_layer(&http_config))
                // Session cookie -> RequestContext for every request
                .layer(axum::middleware::from_fn_with_state(
                    SessionLayerState {
                        store: session_store,
                        storage: deps.storage.clone(),
                    },
                    session::session_middleware,
                )),
        )
}

/// CORS for the configured origins (localhost on the server port by default)
fn cors_layer(http_config: &HttpConfig) -> CorsLayer {
    let origins: Vec<String> = http_config.allowed_origins.clone().unwrap_or_else(|| {
        vec![
            format!("http://localhost:{}", http_config.port),
            format!("http://127.0.0.1:{}", http_config.port),
        ]
    });

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("mcp-session-id"),
            header::HeaderName::from_static("mcp-protocol-version"),
        ])
        .expose_headers([
            header::WWW_AUTHENTICATE,
            header::HeaderName::from_static("mcp-session-id"),
        ])
        .allow_credentials(true)
}

// ============================================================================
// SYSTEM HANDLERS
// ============================================================================

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> std::result::Result<(StatusCode, String), AppError> {
    let metrics = crate::telemetry::get_metrics()?;
    Ok((StatusCode::OK, metrics))
}

// ============================================================================
// ABILITY HANDLERS
// ============================================================================

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    ctx: &RequestContext,
) -> std::result::Result<HostUser, ApiError> {
    state
        .deps
        .validator
        .permission_callback()
        .authorize(headers, ctx)
        .await
}

async fn list_abilities_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ctx: RequestContext,
) -> Response {
    if let Err(e) = authorize(&state, &headers, &ctx).await {
        return e.into_response();
    }

    match state.deps.abilities.describe_abilities().await {
        Ok(abilities) => Json(json!({ "abilities": abilities })).into_response(),
        Err(e) => AppError(e).into_response(),
    }
}

async fn run_ability_handler(
    State(state): State<AppState>,
    AxumPath(ability_id): AxumPath<String>,
    headers: HeaderMap,
    ctx: RequestContext,
    body: Option<Json<Value>>,
) -> Response {
    if let Err(e) = authorize(&state, &headers, &ctx).await {
        return e.into_response();
    }

    let args = body.map(|Json(v)| v).unwrap_or_else(|| json!({}));

    match state
        .deps
        .abilities
        .guarded_execute(&ability_id, args, &ctx)
        .await
    {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => ability_error_response(e),
    }
}

/// Status from `data.status` when the ability sets one, 404 for unknown ids,
/// otherwise 200 with the error payload
fn ability_error_response(err: AbilityError) -> Response {
    let status = if err.code == ERROR_ABILITY_NOT_FOUND {
        StatusCode::NOT_FOUND
    } else {
        err.data
            .as_ref()
            .and_then(|d| d.get("status"))
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::OK)
    };

    (status, Json(json!({ "error": err }))).into_response()
}
