//! HTTP transport.
//!
//! | Method | Path      | Auth           | Description                         |
//! |--------|-----------|----------------|-------------------------------------|
//! | GET    | `/health` | No             | Liveness probe, reports auth mode   |
//! | POST   | `/mcp`    | Gateway mode\* | One JSON-RPC message or a batch     |
//! | *      | other     | No             | `404` with the list of endpoints    |
//!
//! \*In gateway mode every `/mcp` request must carry `X-Datto-API-Key` and
//! `X-Datto-API-Secret` (and optionally `X-Datto-Platform`). The
//! [`resolve_credentials`] middleware turns them into a [`RequestCredentials`]
//! extension that travels with that request only; concurrent requests for
//! different tenants never see each other's credentials. In env mode the
//! middleware attaches the startup credentials instead.

use std::future::Future;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::config::{AuthMode, Config};
use crate::credentials::{Credentials, REQUIRED_HEADERS};
use crate::mcp::McpServer;

/// Shared application state passed to every handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub server: McpServer,
    pub auth_mode: AuthMode,
    /// Startup environment credentials, used in env mode.
    pub env_credentials: Option<Credentials>,
}

/// Credentials resolved for the current request.
#[derive(Clone, Debug)]
pub struct RequestCredentials(pub Option<Credentials>);

/// Build the router for the given state.
pub fn router(state: AppState) -> Router {
    let mcp_routes = Router::new()
        .route(
            "/mcp",
            post(mcp_post).get(method_not_allowed).delete(method_not_allowed),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_credentials,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(mcp_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener and serve until `shutdown` resolves.
///
/// Only bind errors are returned; everything after that is reported in-band.
pub async fn serve<F>(config: &Config, server: McpServer, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = AppState {
        server,
        auth_mode: config.server.auth_mode,
        env_credentials: config.credentials.clone(),
    };

    let listener = TcpListener::bind(config.listen_addr()).await?;
    info!(
        "HTTP transport listening on {} (auth mode: {})",
        listener.local_addr()?,
        config.server.auth_mode
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Middleware that attaches [`RequestCredentials`] to `/mcp` requests.
///
/// # Error responses
///
/// - `401 Unauthorized` — gateway mode and the key or secret header is missing
pub async fn resolve_credentials(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = match state.auth_mode {
        AuthMode::Env => state.env_credentials.clone(),
        AuthMode::Gateway => match Credentials::from_headers(request.headers()) {
            Some(creds) => {
                debug!(platform = %creds.platform, "gateway credentials resolved");
                Some(creds)
            }
            None => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({
                        "error": "Missing credentials",
                        "message": "Gateway mode requires X-Datto-API-Key and X-Datto-API-Secret headers",
                        "required": REQUIRED_HEADERS,
                    })),
                )
                    .into_response();
            }
        },
    };

    request
        .extensions_mut()
        .insert(RequestCredentials(credentials));
    next.run(request).await
}

/// `POST /mcp` — one JSON-RPC message or batch in, the response out.
///
/// Notification-only payloads get `202 Accepted` with no body.
async fn mcp_post(
    State(state): State<AppState>,
    Extension(RequestCredentials(credentials)): Extension<RequestCredentials>,
    body: String,
) -> Response {
    match state.server.handle_payload(&body, credentials.as_ref()).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn method_not_allowed() -> (StatusCode, Json<Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({
            "error": "Method not allowed",
            "message": "Send JSON-RPC messages with POST /mcp",
        })),
    )
}

/// `GET /health` — liveness probe. No authentication required.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "transport": "http",
        "authMode": state.auth_mode.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "Not found",
            "endpoints": ["/mcp", "/health"],
        })),
    )
}
