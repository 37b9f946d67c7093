//! HTTP API for the lab session, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use lab_core::{Incident, Lab, LabSnapshot};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Longest terminal line accepted over HTTP
pub const MAX_LINE_LEN: usize = 1024;

/// Shared application state
pub struct AppState {
    pub lab: Arc<Lab>,
    ready: AtomicBool,
}

impl AppState {
    pub fn new(lab: Arc<Lab>) -> Self {
        Self {
            lab,
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub pipeline: String,
    pub pods: usize,
    pub active_incidents: usize,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecRequest {
    pub line: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecResponse {
    pub output: Vec<String>,
    pub accepted: bool,
    /// The client should clear its screen
    pub clear: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub entries: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IncidentsResponse {
    pub active: Vec<Incident>,
    /// Most recent first
    pub history: Vec<Incident>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Liveness; the lab has no failure mode that makes it unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.lab.snapshot();
    let health = HealthResponse {
        status: "healthy".to_string(),
        pipeline: snapshot.pipeline.status.to_string(),
        pods: snapshot.cluster.pod_count(),
        active_incidents: snapshot.active_incidents.len(),
        timestamp: chrono::Utc::now().timestamp(),
    };
    (StatusCode::OK, Json(health))
}

/// Readiness check response - returns 200 once the scenario is loaded
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ready = state.is_ready();
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(ReadinessResponse { ready }))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Json<LabSnapshot> {
    Json(state.lab.snapshot())
}

async fn exec(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<ExecResponse>, (StatusCode, Json<ErrorResponse>)> {
    if request.line.len() > MAX_LINE_LEN {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorResponse {
                error: format!("command longer than {MAX_LINE_LEN} bytes"),
            }),
        ));
    }

    let execution = state.lab.execute(&request.line);
    Ok(Json(ExecResponse {
        output: execution.output.lines(),
        accepted: execution.accepted,
        clear: execution.output.is_clear(),
    }))
}

async fn history(State(state): State<Arc<AppState>>) -> Json<HistoryResponse> {
    Json(HistoryResponse {
        entries: state.lab.history(),
    })
}

async fn incidents(State(state): State<Arc<AppState>>) -> Json<IncidentsResponse> {
    let snapshot = state.lab.snapshot();
    Json(IncidentsResponse {
        active: snapshot.active_incidents,
        history: snapshot.incident_history,
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/snapshot", get(snapshot))
        .route("/api/v1/exec", post(exec))
        .route("/api/v1/history", get(history))
        .route("/api/v1/incidents", get(incidents))
        .with_state(state)
}

/// Start the API server and run until `shutdown` completes
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
