//! Optional HTTP surface (`server` feature): a thin `axum::Router` wiring
//! the mutation RPC methods and webhook ingress for local testing/demos.
//! Mirrors the teacher's `akh-medu-server` binary's handler/state shape,
//! minus workspace multiplexing — one server serves one `Engine`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::engine::Engine;
use crate::mutation::WantConfig;
use crate::store::WantFilter;
use crate::webhook::{self, WebhookTarget};

#[derive(Clone)]
struct ServerState {
    engine: Arc<Engine>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    want_count: usize,
}

#[derive(Deserialize)]
struct CreateWantsRequest {
    wants: Vec<WantConfig>,
}

#[derive(Serialize)]
struct CreateWantsResponse {
    ids: Vec<Uuid>,
}

async fn health(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        want_count: state.engine.list_wants().await.len(),
    })
}

/// Query parameters for `GET /wants` (spec §6.2 `listWants(filter)`). `label`
/// is `key=value`; an unparseable `label` is treated as absent rather than
/// rejected, matching the rest of this surface's tolerant-query behavior.
#[derive(Deserialize)]
struct ListWantsQuery {
    #[serde(rename = "type")]
    want_type: Option<String>,
    label: Option<String>,
    #[serde(default)]
    include_system_wants: bool,
}

async fn list_wants(
    State(state): State<ServerState>,
    Query(query): Query<ListWantsQuery>,
) -> Json<Vec<crate::store::WantSnapshot>> {
    let filter = WantFilter {
        want_type: query.want_type,
        label: query.label.as_deref().and_then(|raw| raw.split_once('=')).map(|(k, v)| (k.to_string(), v.to_string())),
        include_system_wants: query.include_system_wants,
    };
    Json(state.engine.list_wants_filtered(&filter).await)
}

#[derive(Deserialize)]
struct GetWantQuery {
    group_by: Option<String>,
    #[serde(default = "default_true")]
    include_connectivity: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct GetWantResponse {
    #[serde(flatten)]
    want: crate::want::Want,
    group: Option<String>,
}

async fn get_want(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    Query(query): Query<GetWantQuery>,
) -> Result<Json<GetWantResponse>, StatusCode> {
    let opts = crate::engine::GetWantOptions {
        group_by: query.group_by,
        include_connectivity: query.include_connectivity,
    };
    state
        .engine
        .get_want_with_opts(id, opts)
        .await
        .map(|result| Json(GetWantResponse { want: result.want, group: result.group }))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn create_wants(
    State(state): State<ServerState>,
    Json(request): Json<CreateWantsRequest>,
) -> Result<Json<CreateWantsResponse>, (StatusCode, String)> {
    let ids = state
        .engine
        .create_wants(request.wants)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(CreateWantsResponse { ids }))
}

async fn delete_want(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .delete_want(id)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn suspend_want(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .suspend_wants(vec![id])
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resume_want(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .engine
        .resume_wants(vec![id])
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accepts a webhook for `want_id`, optionally HMAC-verified, and appends
/// the parsed payload to `state_prefix + "_messages"` on that want. The
/// target's secret is read from `webhook_secret` in the want's own state,
/// so no separate webhook-target registry is needed.
async fn webhook_ingest(
    State(state): State<ServerState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<StatusCode, (StatusCode, String)> {
    let Some(record) = state.engine.get_want_snapshot_sync(id) else {
        return Err((StatusCode::NOT_FOUND, format!("unknown want: {id}")));
    };
    let mut guard = record.want.lock().await;
    let state_prefix = guard
        .get_state_string("webhook_state_prefix")
        .unwrap_or("webhook")
        .to_string();
    let secret = guard.get_state_string("webhook_secret").map(str::to_string);
    let target = WebhookTarget { state_prefix: state_prefix.clone(), webhook_secret: secret };

    let auth_header = headers.get("authorization").and_then(|v| v.to_str().ok());
    let payload = webhook::ingest(&target, &body, auth_header).map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

    let key = format!("{state_prefix}_messages");
    let mut messages: Vec<serde_json::Value> = guard
        .get_state(&key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    webhook::push_message(&mut messages, payload);
    guard.store_state(key, serde_json::to_value(messages).expect("message vec is always serializable"));

    Ok(StatusCode::ACCEPTED)
}

/// Builds the router. Does not bind a listener — callers (the CLI, or a
/// test harness) drive that with `axum::serve`.
pub fn router(engine: Arc<Engine>) -> Router {
    let state = ServerState { engine };
    Router::new()
        .route("/health", get(health))
        .route("/wants", get(list_wants))
        .route("/wants", post(create_wants))
        .route("/wants/{id}", get(get_want))
        .route("/wants/{id}", delete(delete_want))
        .route("/wants/{id}/suspend", post(suspend_want))
        .route("/wants/{id}/resume", post(resume_want))
        .route("/wants/{id}/webhook", post(webhook_ingest))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
