use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use loghive_receiver::{IngestError, IngestSummary, Packet};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

// Base envelope codes. Zero means success; everything else is an error class.
const CODE_OK: i32 = 0;
const CODE_ARGS_INVALID: i32 = 1001;
const CODE_SYSTEM: i32 = 1500;

/// Base response envelope: `code == 0` means success.
#[derive(Serialize)]
pub struct Envelope<T>
where
    T: Serialize,
{
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn success_response<T>(data: T) -> Response
where
    T: Serialize,
{
    (
        StatusCode::OK,
        Json(Envelope {
            code: CODE_OK,
            msg: "success".to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn error_response(status: StatusCode, code: i32, msg: &str) -> Response {
    (
        status,
        Json(Envelope::<serde_json::Value> {
            code,
            msg: msg.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// Recovery handler for the panic-catch layer: a handler panic becomes a 500
/// envelope instead of tearing down the connection.
pub fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %detail, "request handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, CODE_SYSTEM, "internal error")
}

/// Producer ip: proxy headers win over the socket peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        let forwarded = forwarded.trim();
        if !forwarded.is_empty() {
            return forwarded.to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }
    peer.ip().to_string()
}

/// Liveness probe for load balancers: `HEAD /`.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// 接收日志包。帧级别的坏数据会被丢弃，不影响包的接收。
#[utoipa::path(
    post,
    path = "/v1/receive/packet",
    tag = "Receiver",
    request_body = Packet,
    responses(
        (status = 200, description = "Packet accepted (possibly with per-frame drops)", body = IngestSummary),
        (status = 400, description = "Malformed body or invalid packet"),
        (status = 500, description = "Persistence failed for one or more shard groups")
    )
)]
async fn receive_packet(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<Packet>, JsonRejection>,
) -> Response {
    let Json(packet) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::warn!(trace_id = %trace_id.0, error = %rejection, "malformed packet body");
            return error_response(StatusCode::BAD_REQUEST, CODE_ARGS_INVALID, "invalid packet body");
        }
    };

    let ip = client_ip(&headers, peer);
    match state.ingestor.ingest(&ip, &packet).await {
        Ok(summary) => success_response(summary),
        Err(IngestError::ArgsInvalid(msg)) => {
            tracing::warn!(trace_id = %trace_id.0, module = %packet.module, msg = %msg, "packet rejected");
            error_response(StatusCode::BAD_REQUEST, CODE_ARGS_INVALID, &msg)
        }
        Err(err) => {
            tracing::error!(
                trace_id = %trace_id.0,
                module = %packet.module,
                error = %err,
                "packet persistence failed"
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                CODE_SYSTEM,
                "persistence failed",
            )
        }
    }
}

/// 服务健康状态
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    loaded_rules: usize,
    received_frames: u64,
    persisted_records: u64,
    dropped_frames: u64,
    shed_side_effects: u64,
}

/// 获取服务健康状态与进程内计数。
#[utoipa::path(
    get,
    path = "/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service health", body = HealthResponse)
    )
)]
async fn health(
    Extension(_trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    let stats = state.ingestor.stats();
    success_response(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        loaded_rules: state.registry.rule_count(),
        received_frames: stats.received_frames.load(Ordering::Relaxed),
        persisted_records: stats.persisted_records.load(Ordering::Relaxed),
        dropped_frames: stats.dropped_frames.load(Ordering::Relaxed),
        shed_side_effects: stats.shed_side_effects.load(Ordering::Relaxed),
    })
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(receive_packet))
        .routes(routes!(health))
}
