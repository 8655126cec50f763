// Copyright (C) 2025 Preview Platform Team (platform@drape.dev)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP surface (§6): the preview API + gateway router (`/preview/*`,
//! `/session`, `/@*`) and the admin + metrics router (`/health`,
//! `/metrics/stats`, `/metrics`), mirroring the teacher's two-router,
//! two-`SocketAddr` split in `main.rs`.

pub mod sse;

use crate::gateway::{gateway_handler, GatewayState};
use crate::pool::Pool;
use crate::project_store;
use crate::provider::ProviderClient;
use crate::session::{not_ready_details, SessionRegistry};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state for the preview API + gateway router. Cloning only clones
/// the `Arc`s, so this is `Clone` regardless of whether `P` itself is.
pub struct PreviewApiState<P: ProviderClient> {
    pub registry: Arc<SessionRegistry<P>>,
    pub pool: Arc<Pool<P>>,
}

impl<P: ProviderClient> Clone for PreviewApiState<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            pool: self.pool.clone(),
        }
    }
}

/// Shared state for the admin + metrics router.
pub struct AdminState<P: ProviderClient> {
    pub registry: Arc<SessionRegistry<P>>,
    pub pool: Arc<Pool<P>>,
    pub metrics: Arc<PrometheusHandle>,
}

impl<P: ProviderClient> Clone for AdminState<P> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            pool: self.pool.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectIdBody {
    pub project_id: String,
}

fn error_response(status: StatusCode, code: &str, message: impl ToString) -> Response {
    (status, Json(json!({"error": code, "message": message.to_string()}))).into_response()
}

/// `POST /preview/start`: begins (or attaches to) a preview session and
/// streams its progress as SSE.
async fn start_handler<P: ProviderClient + 'static>(
    State(state): State<PreviewApiState<P>>,
    Json(body): Json<ProjectIdBody>,
) -> Response {
    let project = match project_store::fetch_project(&body.project_id).await {
        Ok(project) => project,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.code(), e),
    };
    let handle = state.registry.start(project);
    sse::stream_progress(handle).into_response()
}

/// `POST /preview/stop`: cancels a session and releases its VM.
async fn stop_handler<P: ProviderClient + 'static>(
    State(state): State<PreviewApiState<P>>,
    Json(body): Json<ProjectIdBody>,
) -> StatusCode {
    state.registry.stop(&body.project_id).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct ProgressQuery {
    project_id: String,
}

/// `GET /preview/progress?project_id=...`: alternative subscription to an
/// already-running session's progress stream.
async fn progress_handler<P: ProviderClient + 'static>(
    State(state): State<PreviewApiState<P>>,
    Query(q): Query<ProgressQuery>,
) -> Response {
    match state.registry.get(&q.project_id) {
        Some(handle) => sse::stream_progress(handle).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no-session", "no session for project_id"),
    }
}

/// `POST /session`: sets the gateway routing cookie for an already-ready
/// session without starting a new preview.
async fn session_handler<P: ProviderClient + 'static>(
    State(state): State<PreviewApiState<P>>,
    Json(body): Json<ProjectIdBody>,
) -> Response {
    let Some(handle) = state.registry.get(&body.project_id) else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "no-session", "no session for project_id");
    };
    let Some(machine_id) = handle.machine_id() else {
        let (step, percent) = not_ready_details(&handle);
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "not-ready", "step": step, "percent": percent})),
        )
            .into_response();
    };
    let cookie = format!("drape_vm_id={machine_id}; Path=/; HttpOnly; SameSite=Lax");
    ([(header::SET_COOKIE, cookie)], Json(json!({"machineId": machine_id}))).into_response()
}

/// `GET /health`: pool occupancy plus a count of tracked sessions.
async fn health_handler<P: ProviderClient + 'static>(State(state): State<AdminState<P>>) -> Response {
    Json(json!({
        "status": "ok",
        "pool": {
            "available": state.pool.available_count(),
            "in_use": state.pool.in_use_count(),
            "replenishing": state.pool.replenishing_count(),
        },
        "sessions": state.registry.len(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    #[serde(default = "default_days")]
    #[allow(dead_code)]
    days: u32,
}

fn default_days() -> u32 {
    7
}

/// `GET /metrics/stats?days=N`: renders the current Prometheus snapshot.
/// The recorder only ever holds live counters/histograms, so `days` bounds
/// nothing today; it is accepted so the wire contract can grow a real
/// time-series backend later without an API break.
async fn stats_handler<P: ProviderClient + 'static>(
    State(state): State<AdminState<P>>,
    Query(_q): Query<StatsQuery>,
) -> Response {
    state.metrics.render().into_response()
}

/// `GET /metrics`: raw Prometheus exposition format.
async fn metrics_handler<P: ProviderClient + 'static>(State(state): State<AdminState<P>>) -> Response {
    state.metrics.render().into_response()
}

/// Builds the public-facing router: preview API routes first, falling
/// through to the gateway for anything else (`/@user/project/...`).
pub fn build_gateway_router<P: ProviderClient + 'static>(
    preview_state: PreviewApiState<P>,
    gateway_state: Arc<GatewayState<P>>,
) -> Router {
    let preview_router = Router::new()
        .route("/preview/start", post(start_handler::<P>))
        .route("/preview/stop", post(stop_handler::<P>))
        .route("/preview/progress", get(progress_handler::<P>))
        .route("/session", post(session_handler::<P>))
        .with_state(preview_state);

    let gateway_router = Router::new().fallback(gateway_handler::<P>).with_state(gateway_state);

    preview_router.merge(gateway_router).layer(TraceLayer::new_for_http())
}

/// Builds the admin + metrics router.
pub fn build_admin_router<P: ProviderClient + 'static>(state: AdminState<P>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<P>))
        .route("/metrics/stats", get(stats_handler::<P>))
        .route("/metrics", get(metrics_handler::<P>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
