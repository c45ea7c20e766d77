//! RPC surface: a uniform `{name, parameters}` call dispatch.
//!
//! Protocol quirk, preserved for existing callers: an embedded operation
//! failure still answers HTTP 200, with `error: true` and a message in the
//! body. Only an unknown function or missing parameters get a 400. The
//! schema document on GET is static and unauthenticated.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use pgw_client::PortalClient;
use pgw_core::SessionRecord;

use crate::api::{token_matches, AppState, MAX_COUNT_LIMIT};

#[derive(Debug, Deserialize)]
pub struct RpcCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

/// Embedded-failure envelope: transport says 200, body says error.
fn rpc_failure(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(json!({"error": true, "message": message.into()})),
    )
        .into_response()
}

/// Envelope for calls that never reached an operation (unknown function,
/// missing parameters).
fn rpc_rejected(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": true, "message": message.into()})),
    )
        .into_response()
}

pub async fn call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RpcCall>,
) -> Response {
    // Same shared secret as the REST surface, checked inside the handler so
    // the schema GET on this path stays open.
    if !token_matches(&state, headers.get("x-api-token")) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Unauthorized"})),
        )
            .into_response();
    }

    info!(name = %req.name, "rpc call");
    match req.name.as_str() {
        "login" => rpc_login(&state, &req.parameters).await,
        "listTenants" => rpc_list_tenants(&state, &req.parameters).await,
        other => rpc_rejected(format!("Unknown function: {other}")),
    }
}

async fn rpc_login(state: &AppState, params: &Value) -> Response {
    let (Some(host), Some(username), Some(password)) = (
        str_param(params, "host"),
        str_param(params, "username"),
        str_param(params, "password"),
    ) else {
        return rpc_rejected("Missing required parameters");
    };

    let client = match PortalClient::new(host, &state.config.upstream) {
        Ok(client) => client,
        Err(e) => return rpc_failure(format!("Login failed: {e}")),
    };

    match client.authenticate(username, password).await {
        Ok(token) => {
            let key = state
                .store
                .create(SessionRecord::new(
                    host.to_string(),
                    username.to_string(),
                    token,
                ))
                .await;
            (
                StatusCode::OK,
                Json(json!({"sessionKey": key, "message": "Login successful"})),
            )
                .into_response()
        }
        Err(e) => rpc_failure(format!("Login failed: {e}")),
    }
}

async fn rpc_list_tenants(state: &AppState, params: &Value) -> Response {
    let Some(session_key) = str_param(params, "sessionKey") else {
        return rpc_failure("Invalid or expired session");
    };
    let Some(session) = state.store.get(session_key).await else {
        return rpc_failure("Invalid or expired session");
    };

    let start_from = u32_param(params, "startFrom").unwrap_or(0);
    let count_limit = u32_param(params, "countLimit")
        .unwrap_or(50)
        .min(MAX_COUNT_LIMIT);

    let client = match PortalClient::new(&session.host, &state.config.upstream) {
        Ok(client) => client,
        Err(e) => return rpc_failure(format!("Failed to list tenants: {e}")),
    };

    if let Err(e) = client.browse_global(&session.jsessionid).await {
        return rpc_failure(format!("Failed to browse to Global Admin: {e}"));
    }

    match client
        .query_tenants(&session.jsessionid, start_from, count_limit)
        .await
    {
        Ok(tenants) => (
            StatusCode::OK,
            Json(json!({"tenants": tenants, "count": tenants.len()})),
        )
            .into_response(),
        Err(e) => rpc_failure(format!("Failed to list tenants: {e}")),
    }
}

fn str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn u32_param(params: &Value, name: &str) -> Option<u32> {
    params
        .get(name)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
}

/// Static function-schema document describing the RPC operations.
pub async fn schema() -> impl IntoResponse {
    Json(json!({
        "functions": [
            {
                "name": "login",
                "description": "Login to a portal",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "host": {
                            "type": "string",
                            "description": "Portal hostname or IP"
                        },
                        "username": {
                            "type": "string",
                            "description": "Username for login"
                        },
                        "password": {
                            "type": "string",
                            "description": "Password for login"
                        }
                    },
                    "required": ["host", "username", "password"]
                }
            },
            {
                "name": "listTenants",
                "description": "List tenants in the portal",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "sessionKey": {
                            "type": "string",
                            "description": "Session key from login"
                        }
                    },
                    "required": ["sessionKey"]
                }
            }
        ]
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{router, AppState};
    use crate::config::GatewayConfig;
    use crate::store::SessionStore;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    const TOKEN: &str = "test-secret";

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let config = GatewayConfig {
            port: 0,
            bind: "127.0.0.1".into(),
            api_token: Some(TOKEN.into()),
            upstream: pgw_client::ClientConfig::default(),
            session_file: dir.path().join("sessions.json"),
            snapshot_interval: std::time::Duration::from_secs(300),
        };
        AppState {
            config: Arc::new(config),
            store: Arc::new(SessionStore::load(dir.path().join("sessions.json"))),
        }
    }

    fn rpc_request(token: Option<&str>, body: Value) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("x-api-token", token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Two-connection portal stub: answers the scope switch then the tenant
    /// query, resolving with the raw bytes of the query request.
    async fn stub_portal_for_listing() -> (String, tokio::task::JoinHandle<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let xml = "<obj><att id=\"objects\"><list>\
                       <obj><att id=\"name\"><val>Acme</val></att></obj>\
                       </list></att></obj>";
            let browse =
                "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
            let query = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                xml.len(),
                xml
            );
            let mut last = String::new();
            for response in [browse, query] {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut tmp = [0u8; 1024];
                loop {
                    let n = socket.read(&mut tmp).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&tmp[..n]);
                    if request_complete(&buf) {
                        break;
                    }
                }
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
                last = String::from_utf8_lossy(&buf).to_string();
            }
            last
        });
        (format!("http://{addr}"), handle)
    }

    /// A request is complete once the headers have arrived along with
    /// `Content-Length` bytes of body.
    fn request_complete(buf: &[u8]) -> bool {
        let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
        let body_len = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= pos + 4 + body_len
    }

    #[tokio::test]
    async fn schema_is_open_and_lists_functions() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .method("GET")
                    .uri("/mcp")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let names: Vec<&str> = body["functions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["login", "listTenants"]);
    }

    #[tokio::test]
    async fn call_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(rpc_request(None, json!({"name": "login", "parameters": {}})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_function_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(rpc_request(
                Some(TOKEN),
                json!({"name": "dropTables", "parameters": {}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "Unknown function: dropTables");
    }

    #[tokio::test]
    async fn login_missing_parameters_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(rpc_request(
                Some(TOKEN),
                json!({"name": "login", "parameters": {"host": "h"}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], true);
    }

    #[tokio::test]
    async fn list_tenants_clamps_oversized_count_limit() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let (stub, query_request) = stub_portal_for_listing().await;

        let key = state
            .store
            .create(SessionRecord::new(stub, "admin".into(), "TOK".into()))
            .await;

        let response = router(state)
            .oneshot(rpc_request(
                Some(TOKEN),
                json!({
                    "name": "listTenants",
                    "parameters": {"sessionKey": key, "countLimit": 50_000},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["tenants"], json!(["Acme"]));

        let raw = query_request.await.unwrap();
        assert!(raw.contains("<att id=\"countLimit\"><val>1000</val></att>"));
    }

    #[test]
    fn out_of_range_count_limit_is_ignored() {
        let params = json!({"countLimit": u64::from(u32::MAX) + 1});
        assert_eq!(u32_param(&params, "countLimit"), None);
        assert_eq!(u32_param(&json!({"countLimit": 25}), "countLimit"), Some(25));
    }

    #[tokio::test]
    async fn stale_session_fails_embedded_with_transport_200() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(rpc_request(
                Some(TOKEN),
                json!({"name": "listTenants", "parameters": {"sessionKey": "gone"}}),
            ))
            .await
            .unwrap();
        // The protocol quirk: transport says 200, the body carries the error.
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["message"], "Invalid or expired session");
    }
}
