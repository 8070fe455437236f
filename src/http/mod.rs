// src/http/mod.rs

//! axum wiring: the admission middleware applied to business routes, and the
//! privileged control endpoints exposing read-only state snapshots plus the
//! manual breaker reset.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::admission::{AdmissionController, RequestInfo};
use crate::breaker::BreakerSnapshot;
use crate::error::AdmissionError;
use crate::gauge::LoadLevel;
use crate::limiter::LimiterSnapshot;
use crate::metrics::{HistoryBucket, MetricsSnapshot};

/// Header the auth collaborator sets once it has produced a trusted identity.
const IDENTITY_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<AdmissionController>,
}

/// Structured rejection payload returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RejectBody {
    success: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rule: Option<String>,
}

fn reject_response(err: &AdmissionError) -> Response {
    let retry_after = err.retry_after().map(|d| d.as_secs());
    let body = RejectBody {
        success: false,
        error: err.code(),
        retry_after_seconds: retry_after,
        rule: err.rule_name().map(str::to_string),
    };
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

/// Admission middleware: every request on the business surface passes
/// through here before its handler runs.
pub async fn admission_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: Request,
    next: Next,
) -> Response {
    // Owned copies only; nothing borrowed from `req` may live across the
    // await below or the middleware future stops being Send
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let identity = req
        .headers()
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let info = RequestInfo {
        remote: addr.ip(),
        forwarded_for,
        identity,
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    };

    let ticket = match state.controller.should_admit(&info) {
        Ok(ticket) => ticket,
        Err(err) => return reject_response(&err),
    };

    let response = next.run(req).await;
    state
        .controller
        .complete(ticket, response.status().as_u16());
    response
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthDetail {
    status: &'static str,
    load_level: LoadLevel,
    breakers: Vec<BreakerSnapshot>,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsSummary {
    total: usize,
    error_rate: f64,
    p95_latency_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebugState {
    load_level: LoadLevel,
    limiter: LimiterSnapshot,
    breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    /// When absent, every breaker is reset
    dependency: Option<String>,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthDetail {
        status: "ok",
        load_level: state.controller.current_level(),
        breakers: state.controller.breakers().snapshot(),
        metrics: state.controller.metrics().snapshot(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.controller.metrics().snapshot())
}

async fn metrics_summary(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.controller.metrics().snapshot();
    Json(MetricsSummary {
        total: snapshot.total,
        error_rate: snapshot.error_rate,
        p95_latency_ms: snapshot.p95_latency_ms,
    })
}

async fn metrics_history(State(state): State<AppState>) -> Json<Vec<HistoryBucket>> {
    Json(state.controller.metrics().history())
}

async fn debug_loadbalancer(State(state): State<AppState>) -> impl IntoResponse {
    Json(DebugState {
        load_level: state.controller.current_level(),
        limiter: state.controller.limiter_snapshot(),
        breakers: state.controller.breakers().snapshot(),
    })
}

async fn reset_circuit_breaker(
    State(state): State<AppState>,
    body: Option<Json<ResetRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    match request.dependency {
        Some(name) => {
            if state.controller.breakers().reset(&name) {
                Json(serde_json::json!({ "success": true, "reset": name })).into_response()
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({
                        "success": false,
                        "error": "UNKNOWN_DEPENDENCY",
                    })),
                )
                    .into_response()
            }
        }
        None => {
            state.controller.breakers().reset_all();
            Json(serde_json::json!({ "success": true, "reset": "all" })).into_response()
        }
    }
}

/// Privileged control surface. Mount outside the admission middleware and
/// restrict to trusted callers in any production deployment.
pub fn control_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/history", get(metrics_history))
        .route("/debug/loadbalancer", get(debug_loadbalancer))
        .route("/debug/reset-circuit-breaker", post(reset_circuit_breaker))
        .with_state(state)
}

/// Wrap a business router with the admission middleware.
pub fn with_admission(router: Router, state: AppState) -> Router {
    router.layer(axum::middleware::from_fn_with_state(
        state,
        admission_middleware,
    ))
}
