//! JSON-RPC front end.
//!
//! One endpoint, `POST /rpc`, speaking JSON-RPC 2.0 with four methods:
//! `policy_check`, `events_batch`, `http_request`, and `ping`. Callers
//! authenticate with a broker token header (authoritative) or an explicit
//! profile id header. Every decision fans out on the activity channel, and
//! exec decisions feed the rapid-exec chain tracker.
//!
//! The daemon never panics on a request: panics are caught at the layer
//! boundary and surfaced as internal JSON-RPC errors.

pub mod exec_chain;
pub mod token_cache;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::activity::ActivityChannel;
use crate::error::rpc_codes;
use crate::policy::{ExecutionContext, GuardedOperation, PolicyEngine};
use crate::proxy::ProxyPool;
use crate::security::ensure_public_url;
use crate::{Error, Result};

use exec_chain::ExecChainTracker;
use token_cache::TokenCache;

/// Broker token header; authoritative when present.
pub const BROKER_TOKEN_HEADER: &str = "x-shield-broker-token";
/// Explicit profile id header; ignored when a token is present.
pub const PROFILE_ID_HEADER: &str = "x-shield-profile-id";

/// Shared application state
pub struct AppState {
    /// Policy decision engine
    pub engine: Arc<PolicyEngine>,
    /// Activity fan-out channel
    pub activity: Arc<ActivityChannel>,
    /// Broker-token resolution cache
    pub token_cache: Arc<TokenCache>,
    /// Rapid-exec heuristic tracker
    pub exec_chain: Arc<ExecChainTracker>,
    /// Per-run proxy pool (health reporting)
    pub pool: Arc<ProxyPool>,
    /// Outbound client for daemon-side fetches
    pub http: reqwest::Client,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(_err: Box<dyn Any + Send + 'static>) -> Response<Body> {
    (
        StatusCode::OK,
        Json(json!({
            "jsonrpc": "2.0",
            "id": Value::Null,
            "error": { "code": rpc_codes::INTERNAL_ERROR, "message": "Internal error" }
        })),
    )
        .into_response()
}

fn rpc_error(id: Value, code: i32, message: impl Into<String>) -> Json<Value> {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    }))
}

/// POST /rpc handler. JSON-RPC envelopes always come back with HTTP 200;
/// failures live in the `error` member.
async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return rpc_error(Value::Null, rpc_codes::PARSE_ERROR, format!("invalid JSON: {e}"));
        }
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = request.get("method").and_then(Value::as_str) else {
        return rpc_error(id, rpc_codes::INVALID_REQUEST, "missing method");
    };
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));

    match dispatch(&state, method, params, &headers).await {
        Ok(result) => Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })),
        Err(e) => {
            debug!(method, error = %e, "rpc request failed");
            rpc_error(id, e.to_rpc_code(), e.to_string())
        }
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    method: &str,
    params: Value,
    headers: &HeaderMap,
) -> Result<Value> {
    let profile_id = resolve_profile(state, headers)?;
    match method {
        "ping" => Ok(json!({ "status": "ok" })),
        "policy_check" => policy_check(state, params, profile_id.as_deref()).await,
        "events_batch" => events_batch(state, &params),
        "http_request" => http_request(state, params, profile_id.as_deref()).await,
        other => Err(Error::MethodNotFound(other.to_string())),
    }
}

/// Resolve the caller's profile. A broker token is authoritative and must
/// resolve; the profile id header is a lower-precedence fallback.
fn resolve_profile(state: &AppState, headers: &HeaderMap) -> Result<Option<String>> {
    if let Some(token) = headers.get(BROKER_TOKEN_HEADER) {
        let token = token
            .to_str()
            .map_err(|_| Error::InvalidRequest("malformed broker token header".into()))?;
        return match state.token_cache.resolve(token)? {
            Some(profile_id) => Ok(Some(profile_id)),
            None => Err(Error::BadToken),
        };
    }
    if let Some(profile_id) = headers.get(PROFILE_ID_HEADER) {
        let profile_id = profile_id
            .to_str()
            .map_err(|_| Error::InvalidRequest("malformed profile id header".into()))?;
        return Ok(Some(profile_id.to_string()));
    }
    Ok(None)
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::InvalidRequest(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct PolicyCheckParams {
    operation: GuardedOperation,
    target: String,
    #[serde(default)]
    context: Option<ExecutionContext>,
}

async fn policy_check(
    state: &Arc<AppState>,
    params: Value,
    profile_id: Option<&str>,
) -> Result<Value> {
    let params: PolicyCheckParams = parse_params(params)?;
    let decision = state
        .engine
        .check(
            params.operation,
            &params.target,
            params.context.as_ref(),
            profile_id,
        )
        .await?;

    let kind = if decision.allowed { "allowed" } else { "denied" };
    state.activity.emit(
        kind,
        json!({
            "operation": params.operation,
            "target": params.target,
            "policyId": decision.policy_id,
            "reason": decision.reason,
        }),
    );

    if params.operation == GuardedOperation::Exec {
        if let Some(session) = params
            .context
            .as_ref()
            .and_then(|c| c.session_id.as_deref())
        {
            if let Some(count) = state.exec_chain.record(session) {
                warn!(session, count, target = %params.target, "rapid exec chain detected");
                state.activity.emit(
                    "security:warning",
                    json!({
                        "heuristic": "rapid-exec",
                        "sessionId": session,
                        "execsInWindow": count,
                        "target": params.target,
                    }),
                );
            }
        }
    }

    let mut result = serde_json::to_value(&decision)?;
    result["executionContext"] =
        serde_json::to_value(params.context.unwrap_or_default())?;
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct IngestEvent {
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct EventsBatchParams {
    events: Vec<IngestEvent>,
}

/// Out-of-band event ingestion from interceptors; each event fans out on
/// the activity channel as-is.
fn events_batch(state: &Arc<AppState>, params: &Value) -> Result<Value> {
    let params: EventsBatchParams = parse_params(params.clone())?;
    let accepted = params.events.len();
    for event in params.events {
        state.activity.emit(event.kind, event.data);
    }
    Ok(json!({ "accepted": accepted }))
}

#[derive(Debug, Deserialize)]
struct HttpRequestParams {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    context: Option<ExecutionContext>,
}

/// Daemon-side fetch: private-address guard, then the same policy check as
/// `policy_check(http_request, ...)`, then the forward. A deny is a
/// JSON-RPC error here, not a result.
async fn http_request(
    state: &Arc<AppState>,
    params: Value,
    profile_id: Option<&str>,
) -> Result<Value> {
    let params: HttpRequestParams = parse_params(params)?;
    ensure_public_url(&params.url)?;

    let decision = state
        .engine
        .check(
            GuardedOperation::HttpRequest,
            &params.url,
            params.context.as_ref(),
            profile_id,
        )
        .await?;

    let kind = if decision.allowed { "allowed" } else { "denied" };
    state.activity.emit(
        kind,
        json!({
            "operation": GuardedOperation::HttpRequest,
            "target": params.url,
            "policyId": decision.policy_id,
            "reason": decision.reason,
        }),
    );

    if !decision.allowed {
        let reason = decision
            .reason
            .unwrap_or_else(|| "denied by policy".to_string());
        return Err(Error::json_rpc(rpc_codes::INTERNAL_ERROR, reason));
    }

    let method = params.method.as_deref().unwrap_or("GET");
    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| Error::InvalidRequest(format!("bad method {method}")))?;
    let mut request = state.http.request(method, &params.url);
    for (name, value) in &params.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = params.body {
        request = request.body(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;
    let status = response.status();
    let mut headers = serde_json::Map::new();
    for (name, value) in response.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), Value::String(value.to_string()));
        }
    }
    let body = response
        .text()
        .await
        .map_err(|e| Error::Transport(e.to_string()))?;

    Ok(json!({
        "status": status.as_u16(),
        "statusText": status.canonical_reason().unwrap_or(""),
        "headers": headers,
        "body": body,
    }))
}

/// GET /health handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "proxyPool": { "size": state.pool.size() },
        "activitySubscribers": state.activity.subscriber_count(),
        "trackedSessions": state.exec_chain.session_count(),
    }))
}
