//! Proxy HTTP server for the knowledge-base API.
//!
//! Every handler is a pass-through: it validates the endpoint's required
//! parameters, forwards the call to the fixed upstream base URL with the
//! caller's authorization header, and relays the upstream status code and
//! body. Successful bodies are relayed verbatim (JSON when parseable, raw
//! text otherwise); upstream failures are wrapped in an `{error, details}`
//! envelope at the upstream status.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/auth` | Credential exchange against the auth provider |
//! | `GET`  | `/api/connections` | List storage connections |
//! | `GET`  | `/api/files` | List children of the root or of a folder |
//! | `GET`  | `/api/organizations/me/current` | Current organization |
//! | `GET`  | `/api/knowledge-bases` | List knowledge bases |
//! | `POST` | `/api/knowledge-bases` | Create a knowledge base |
//! | `GET`  | `/api/knowledge-bases/sync` | Trigger indexing |
//! | `PATCH` | `/api/knowledge-bases/{id}` | Replace source resource ids |
//! | `DELETE` | `/api/knowledge-bases/{id}` | Detach one resource by path |
//! | `GET`  | `/api/knowledge-bases/{id}/resources/children` | Indexed resources |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Authorization gate
//!
//! Requests under `/api` without an `Authorization` header are rejected with
//! `401 {"error": "Unauthorized"}` before reaching any handler. `/api/auth`
//! is the one exception, since it is how a token is obtained.

use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    /// One pooled upstream client reused by every handler.
    http: reqwest::Client,
}

/// Starts the proxy server on the configured bind address.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(Arc::new(config.clone()))?;

    info!("proxy listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Builds the proxy router. Split out from [`run_server`] so tests can
/// serve it on an ephemeral listener.
pub fn build_router(config: Arc<Config>) -> anyhow::Result<Router> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.timeout_secs))
        .build()?;
    let state = AppState { config, http };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/auth", post(handle_auth))
        .route("/api/connections", get(handle_connections))
        .route("/api/files", get(handle_files))
        .route("/api/organizations/me/current", get(handle_org))
        .route(
            "/api/knowledge-bases",
            get(handle_kb_list).post(handle_kb_create),
        )
        .route("/api/knowledge-bases/sync", get(handle_sync))
        .route(
            "/api/knowledge-bases/{id}",
            axum::routing::patch(handle_kb_update).delete(handle_kb_detach),
        )
        .route(
            "/api/knowledge-bases/{id}/resources/children",
            get(handle_kb_resources),
        )
        .route("/health", get(handle_health))
        .layer(middleware::from_fn(auth_gate))
        .layer(cors)
        .with_state(state);

    Ok(app)
}

/// Rejects any `/api` request lacking an `Authorization` header, except the
/// login endpoint itself.
async fn auth_gate(req: Request, next: Next) -> Response {
    let path = req.uri().path();
    if path.starts_with("/api") && path != "/api/auth" && !req.headers().contains_key(AUTHORIZATION)
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }
    next.run(req).await
}

// ============ Relay helpers ============

/// 400 with a named-field error message.
fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

/// 500 envelope for handler-level failures (the upstream was unreachable).
fn internal_error(details: impl ToString) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error", "details": details.to_string() })),
    )
        .into_response()
}

fn relay_status(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Body as parsed JSON when parseable, raw text otherwise.
fn json_or_text(status: StatusCode, body: String) -> Response {
    match serde_json::from_str::<Value>(&body) {
        Ok(v) => (status, Json(v)).into_response(),
        Err(_) => (status, body).into_response(),
    }
}

/// Standard relay: 2xx bodies pass through verbatim; non-2xx bodies are
/// wrapped as `{error, details}` at the upstream status.
async fn relay(error_label: &str, result: Result<reqwest::Response, reqwest::Error>) -> Response {
    let resp = match result {
        Ok(r) => r,
        Err(e) => {
            warn!("upstream request failed: {}", e);
            return internal_error(e);
        }
    };

    let status = relay_status(resp.status());
    let body = match resp.text().await {
        Ok(t) => t,
        Err(e) => return internal_error(e),
    };
    debug!(%status, "upstream responded");

    if status.is_success() {
        return json_or_text(status, body);
    }

    let details = serde_json::from_str::<Value>(&body).unwrap_or(Value::String(body));
    (
        status,
        Json(json!({ "error": error_label, "details": details })),
    )
        .into_response()
}

/// Verbatim relay: status and body pass through untouched regardless of
/// outcome. Used by the sync trigger, whose upstream has returned bare text
/// for both results.
async fn relay_verbatim(result: Result<reqwest::Response, reqwest::Error>) -> Response {
    let resp = match result {
        Ok(r) => r,
        Err(e) => {
            warn!("upstream request failed: {}", e);
            return internal_error(e);
        }
    };
    let status = relay_status(resp.status());
    match resp.text().await {
        Ok(body) => json_or_text(status, body),
        Err(e) => internal_error(e),
    }
}

fn auth_header(headers: &HeaderMap) -> &str {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

// ============ POST /api/auth ============

/// Exchanges email/password for an access token via the auth provider,
/// attaching the anonymous api key.
async fn handle_auth(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let email = body.get("email").and_then(|v| v.as_str());
    let password = body.get("password").and_then(|v| v.as_str());
    if email.is_none() || password.is_none() {
        return bad_request("email and password are required");
    }

    let result = state
        .http
        .post(format!(
            "{}?grant_type=password",
            state.config.upstream.auth_url
        ))
        .header("Apikey", &state.config.upstream.anon_key)
        .json(&json!({ "email": email, "password": password }))
        .send()
        .await;

    relay("Authentication failed", result).await
}

// ============ GET /api/connections ============

async fn handle_connections(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Response {
    let mut query: Vec<(&str, &str)> = Vec::new();
    if let Some(provider) = params.get("connection_provider") {
        query.push(("connection_provider", provider));
    }
    if let Some(limit) = params.get("limit") {
        query.push(("limit", limit));
    }

    let result = state
        .http
        .get(format!("{}/connections", state.config.upstream.base_url))
        .header(AUTHORIZATION, auth_header(&headers))
        .query(&query)
        .send()
        .await;

    relay("Failed to fetch connections", result).await
}

// ============ GET /api/files ============

/// Lists children of the connection root or of `resourceId`.
/// `connectionId` is required.
async fn handle_files(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Response {
    let Some(connection_id) = params.get("connectionId") else {
        return bad_request("connectionId is required");
    };

    let url = format!(
        "{}/connections/{}/resources/children",
        state.config.upstream.base_url, connection_id
    );
    let mut req = state
        .http
        .get(url)
        .header(AUTHORIZATION, auth_header(&headers));
    if let Some(resource_id) = params.get("resourceId") {
        req = req.query(&[("resource_id", resource_id)]);
    }

    relay("Failed to fetch files", req.send().await).await
}

// ============ GET /api/organizations/me/current ============

async fn handle_org(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = state
        .http
        .get(format!(
            "{}/organizations/me/current",
            state.config.upstream.base_url
        ))
        .header(AUTHORIZATION, auth_header(&headers))
        .send()
        .await;

    relay("Failed to fetch organization", result).await
}

// ============ /api/knowledge-bases ============

async fn handle_kb_list(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = state
        .http
        .get(format!(
            "{}/knowledge_bases",
            state.config.upstream.base_url
        ))
        .header(AUTHORIZATION, auth_header(&headers))
        .send()
        .await;

    relay("Failed to fetch knowledge bases", result).await
}

/// Creates a knowledge base. The body is forwarded verbatim; only the
/// presence of `connection_id` and `connection_source_ids` is checked here.
async fn handle_kb_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if body.get("connection_id").is_none() || body.get("connection_source_ids").is_none() {
        return bad_request("connection_id and connection_source_ids are required");
    }

    let result = state
        .http
        .post(format!(
            "{}/knowledge_bases",
            state.config.upstream.base_url
        ))
        .header(AUTHORIZATION, auth_header(&headers))
        .json(&body)
        .send()
        .await;

    relay("Failed to create knowledge base", result).await
}

async fn handle_kb_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let result = state
        .http
        .patch(format!(
            "{}/knowledge_bases/{}",
            state.config.upstream.base_url, id
        ))
        .header(AUTHORIZATION, auth_header(&headers))
        .json(&body)
        .send()
        .await;

    relay("Failed to update knowledge base", result).await
}

/// Detaches one resource from a knowledge base. `resourcePath` is required.
async fn handle_kb_detach(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Response {
    let Some(resource_path) = params.get("resourcePath") else {
        return bad_request("resourcePath is required");
    };

    let result = state
        .http
        .delete(format!(
            "{}/knowledge_bases/{}/resources",
            state.config.upstream.base_url, id
        ))
        .header(AUTHORIZATION, auth_header(&headers))
        .query(&[("resource_path", resource_path)])
        .send()
        .await;

    relay("Failed to detach resource", result).await
}

async fn handle_kb_resources(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Response {
    let resource_path = params
        .get("resource_path")
        .map(String::as_str)
        .unwrap_or("/");

    let result = state
        .http
        .get(format!(
            "{}/knowledge_bases/{}/resources/children",
            state.config.upstream.base_url, id
        ))
        .header(AUTHORIZATION, auth_header(&headers))
        .query(&[("resource_path", resource_path)])
        .send()
        .await;

    relay("Failed to fetch knowledge base resources", result).await
}

// ============ GET /api/knowledge-bases/sync ============

/// The one logical sync trigger. Forwards to the upstream's path-based
/// trigger endpoint and relays the answer untouched.
async fn handle_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Response {
    let (Some(kb_id), Some(org_id)) = (params.get("knowledgeBaseId"), params.get("orgId")) else {
        return bad_request("knowledgeBaseId and orgId are required");
    };

    let url = format!(
        "{}/knowledge_bases/sync/trigger/{}/{}",
        state.config.upstream.base_url, kb_id, org_id
    );
    debug!(%url, "forwarding sync trigger");

    let result = state
        .http
        .get(url)
        .header(AUTHORIZATION, auth_header(&headers))
        .send()
        .await;

    relay_verbatim(result).await
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bodies_relay_as_json() {
        let resp = json_or_text(StatusCode::OK, r#"{"a":1}"#.to_string());
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn non_json_bodies_relay_as_text() {
        let resp = json_or_text(StatusCode::OK, "plain sync output".to_string());
        assert_eq!(resp.status(), StatusCode::OK);
        assert_ne!(
            resp.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
