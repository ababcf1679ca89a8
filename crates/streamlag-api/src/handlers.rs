//! REST API handlers.
//!
//! Status codes: unknown trigger → 404, misconfigured trigger (missing
//! stream or group) → 422, poll over budget → 504. Transient failures are
//! 200 with `stale: true` and the previous verdict.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use streamlag_core::project_replicas;
use streamlag_scaler::{PollOutcome, TriggerSnapshot};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Body of `/api/v1/triggers/{name}/metrics`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMetrics {
    pub metric_name: String,
    pub metric_value: i64,
    pub active: bool,
    /// Absent when this poll could not measure.
    pub lag: Option<u64>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projected_replicas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerActive {
    pub active: bool,
}

/// Run one poll of `name` within the poll budget.
async fn poll_trigger(
    state: &ApiState,
    name: &str,
) -> Result<(PollOutcome, TriggerSnapshot), Response> {
    let Some(trigger) = state.registry.get(name) else {
        return Err(error_response("trigger not found", StatusCode::NOT_FOUND));
    };

    let poll = async {
        let mut trigger = trigger.lock().await;
        let outcome = trigger.poll().await;
        (outcome, trigger.snapshot())
    };

    match tokio::time::timeout(state.poll_timeout, poll).await {
        Ok((Ok(outcome), snapshot)) => Ok((outcome, snapshot)),
        Ok((Err(e), _)) => Err(error_response(
            &e.to_string(),
            StatusCode::UNPROCESSABLE_ENTITY,
        )),
        Err(_) => {
            warn!(trigger = %name, timeout = ?state.poll_timeout, "poll abandoned");
            Err(error_response(
                &format!("poll exceeded {:?}", state.poll_timeout),
                StatusCode::GATEWAY_TIMEOUT,
            ))
        }
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "triggers": state.registry.len(),
    }))
}

// ── Triggers ───────────────────────────────────────────────────

/// GET /api/v1/triggers
pub async fn list_triggers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.snapshots().await)
}

/// GET /api/v1/triggers/{name}/metrics
pub async fn trigger_metrics(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    let (outcome, snapshot) = match poll_trigger(&state, &name).await {
        Ok(polled) => polled,
        Err(resp) => return resp,
    };

    let verdict = outcome.verdict();
    let projected_replicas = state
        .replicas
        .get(&name)
        .map(|bounds| project_replicas(&verdict, snapshot.thresholds.lag_count, *bounds));
    let error = match &outcome {
        PollOutcome::Degraded { error, .. } => Some(error.to_string()),
        PollOutcome::Measured { .. } => None,
    };

    ApiResponse::ok(TriggerMetrics {
        metric_name: snapshot.metric_name,
        metric_value: verdict.metric_value,
        active: verdict.active,
        lag: outcome.lag().map(|l| l.get()),
        stale: outcome.is_stale(),
        projected_replicas,
        error,
    })
    .into_response()
}

/// GET /api/v1/triggers/{name}/active
pub async fn trigger_active(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Response {
    match poll_trigger(&state, &name).await {
        Ok((outcome, _)) => ApiResponse::ok(TriggerActive {
            active: outcome.verdict().active,
        })
        .into_response(),
        Err(resp) => resp,
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshots = state.registry.snapshots().await;
    let body = crate::render_prometheus(&snapshots);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
