//! REST surface of the gateway.
//!
//! Every `/api/*` route except `/api/health` sits behind the shared-secret
//! middleware: a missing or mismatched `X-API-Token` answers 401 before any
//! business logic runs. Failures use conventional HTTP statuses on this
//! surface; the RPC surface in [`crate::mcp`] folds them into its own
//! envelope instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use pgw_client::PortalClient;
use pgw_core::{GatewayError, SessionRecord};

use crate::config::GatewayConfig;
use crate::store::SessionStore;

/// Upper bound applied to caller-supplied `countLimit`.
pub(crate) const MAX_COUNT_LIMIT: u32 = 1000;

/// Shared application state, passed by handle to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub store: Arc<SessionStore>,
}

/// Build the full router: protected REST routes plus the open health and
/// RPC-schema routes.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/login", post(login))
        .route("/api/list-tenants", post(list_tenants))
        .route("/api/browse-global", post(browse_global))
        .route("/api/sessions", get(list_sessions))
        .route("/api/session/:key", get(get_session))
        .route("/api/logout", post(logout))
        .route("/api/proxy", post(proxy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_token,
        ));

    let open = Router::new()
        .route("/api/health", get(health))
        .route("/mcp", get(crate::mcp::schema).post(crate::mcp::call));

    protected.merge(open).with_state(state)
}

/// Shared-secret check. An unset token rejects everything.
async fn require_api_token(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if token_matches(&state, req.headers().get("x-api-token")) {
        next.run(req).await
    } else {
        ApiError::from(GatewayError::Unauthorized).into_response()
    }
}

pub(crate) fn token_matches(
    state: &AppState,
    presented: Option<&axum::http::HeaderValue>,
) -> bool {
    let Some(expected) = state.config.api_token.as_deref() else {
        return false;
    };
    matches!(presented.and_then(|v| v.to_str().ok()), Some(got) if got == expected)
}

/// A gateway error on its way out of the REST surface.
///
/// `context` names the failed operation in 500-class bodies, mirroring the
/// `{error, details}` shape callers already parse.
pub struct ApiError {
    context: Option<&'static str>,
    source: GatewayError,
}

impl ApiError {
    pub fn context(context: &'static str) -> impl FnOnce(GatewayError) -> Self {
        move |source| Self {
            context: Some(context),
            source,
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(source: GatewayError) -> Self {
        Self {
            context: None,
            source,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.source {
            GatewayError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, json!({"error": "Unauthorized"}))
            }
            GatewayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({"error": msg})),
            GatewayError::SessionNotFound(_) => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "Invalid or expired session"}),
            ),
            GatewayError::UpstreamAuth(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({"error": format!("Authentication failed - {msg}")}),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": self.context.unwrap_or("Request failed"),
                    "details": other.to_string(),
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Resolve a session key or fail exactly as an expired session would.
async fn resolve_session(state: &AppState, key: &str) -> Result<SessionRecord, ApiError> {
    if key.is_empty() {
        return Err(GatewayError::SessionNotFound("<empty>".into()).into());
    }
    state
        .store
        .get(key)
        .await
        .ok_or_else(|| GatewayError::SessionNotFound(key.to_string()).into())
}

fn portal_client(state: &AppState, host: &str) -> Result<PortalClient, ApiError> {
    PortalClient::new(host, &state.config.upstream).map_err(ApiError::from)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(host), Some(username), Some(password)) = (
        req.host.filter(|s| !s.is_empty()),
        req.username.filter(|s| !s.is_empty()),
        req.password.filter(|s| !s.is_empty()),
    ) else {
        return Err(GatewayError::BadRequest("Missing required parameters".into()).into());
    };

    info!(%host, %username, "login attempt");

    let client = portal_client(&state, &host)?;
    let token = client
        .authenticate(&username, &password)
        .await
        .map_err(ApiError::context("Login failed"))?;

    let key = state
        .store
        .create(SessionRecord::new(host.clone(), username.clone(), token))
        .await;
    info!(%host, %username, session_key = %key, "login successful");

    Ok(Json(json!({
        "sessionKey": key,
        "message": "Login successful",
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTenantsRequest {
    #[serde(default)]
    pub session_key: String,
    #[serde(default)]
    pub start_from: u32,
    #[serde(default = "default_count_limit")]
    pub count_limit: u32,
}

fn default_count_limit() -> u32 {
    50
}

async fn list_tenants(
    State(state): State<AppState>,
    Json(req): Json<ListTenantsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = resolve_session(&state, &req.session_key).await?;
    let client = portal_client(&state, &session.host)?;

    // Tenant listing is only valid from the global administrative scope;
    // a scope-switch failure aborts the listing with its own error.
    client
        .browse_global(&session.jsessionid)
        .await
        .map_err(ApiError::context("Failed to browse to Global Admin"))?;

    let count_limit = req.count_limit.min(MAX_COUNT_LIMIT);
    let tenants = client
        .query_tenants(&session.jsessionid, req.start_from, count_limit)
        .await
        .map_err(ApiError::context("Failed to list tenants"))?;

    Ok(Json(json!({
        "tenants": tenants,
        "count": tenants.len(),
        "startFrom": req.start_from,
        "countLimit": count_limit,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyRequest {
    #[serde(default)]
    pub session_key: String,
}

async fn browse_global(
    State(state): State<AppState>,
    Json(req): Json<SessionKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = resolve_session(&state, &req.session_key).await?;
    let client = portal_client(&state, &session.host)?;

    let status = client
        .browse_global(&session.jsessionid)
        .await
        .map_err(ApiError::context("Failed to browse to global admin"))?;

    Ok(Json(json!({
        "message": "Successfully browsed to global admin",
        "status": status,
    })))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.store.list().await;
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

/// Full record including the remote token. Trusted external tools use this
/// for introspection; it sits behind the same shared secret as everything
/// else.
async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = resolve_session(&state, &key).await?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<AppState>,
    Json(req): Json<SessionKeyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.session_key.is_empty() || !state.store.remove(&req.session_key).await {
        return Err(GatewayError::SessionNotFound(req.session_key).into());
    }
    info!(session_key = %req.session_key, "logged out");

    Ok(Json(json!({
        "message": "Successfully logged out",
        "sessionKey": req.session_key,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    #[serde(default)]
    pub session_key: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: Option<String>,
    pub data: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_method() -> String {
    "get".to_string()
}

/// Pass-through relay: one authenticated downstream call, status/body/headers
/// returned verbatim. The gateway response status mirrors the downstream
/// status.
async fn proxy(
    State(state): State<AppState>,
    Json(req): Json<ProxyRequest>,
) -> Result<Response, ApiError> {
    let session = resolve_session(&state, &req.session_key).await?;
    let Some(path) = req.path.filter(|p| !p.is_empty()) else {
        return Err(GatewayError::BadRequest("Missing path parameter".into()).into());
    };

    let client = portal_client(&state, &session.host)?;
    let body = req.data.map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    });

    let response = client
        .invoke(&session.jsessionid, &req.method, &path, body, &req.headers)
        .await
        .map_err(ApiError::context("Proxy request failed"))?;

    let data = serde_json::from_str::<Value>(&response.body)
        .unwrap_or(Value::String(response.body));
    let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
        warn!(status = response.status, "downstream returned unmappable status");
        StatusCode::BAD_GATEWAY
    });

    Ok((
        status,
        Json(json!({
            "status": response.status,
            "data": data,
            "headers": response.headers,
        })),
    )
        .into_response())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "activeSessions": state.store.count().await,
    }))
}
