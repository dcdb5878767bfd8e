use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::config::NodeIdentity;
use crate::error::{AgentError, Result};
use crate::job::{
    admission, AdmissionPolicy, CancelOutcome, JobError, JobLedger, JobRecord, JobState, Rejection,
    RejectionCode, SUPPORTED_PROTOCOL_VERSION,
};

/// Shared state behind every handler. Cheap to clone; everything mutable
/// lives in the ledger.
#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<RwLock<JobLedger>>,
    pub policy: Arc<AdmissionPolicy>,
    pub identity: Arc<NodeIdentity>,
    pub max_concurrent_jobs: usize,
    pub started_at: Instant,
}

#[derive(Serialize)]
struct SubmitResponse {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Rejection>,
}

#[derive(Serialize)]
struct JobView {
    job_id: String,
    state: JobState,
    image: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    error: Option<JobError>,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        Self {
            job_id: record.job_id,
            state: record.state,
            image: record.spec.runtime.image.clone(),
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
            exit_code: record.exit_code,
            stdout: record.stdout,
            stderr: record.stderr,
            error: record.error,
        }
    }
}

#[derive(Serialize)]
struct CancelResponse {
    job_id: String,
    state: JobState,
    cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'static str>,
}

#[derive(Serialize)]
struct NodeInfoResponse {
    node_id: Uuid,
    node_name: String,
    cpus: usize,
    memory_mb: Option<u64>,
    labels: BTreeMap<String, String>,
    protocol_version: i64,
}

#[derive(Serialize)]
struct NodeStatusResponse {
    running_jobs: usize,
    queued_jobs: usize,
    total_jobs: usize,
    max_concurrent_jobs: usize,
    uptime_secs: u64,
    load: f64,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/jobs", post(submit_job).get(list_jobs))
        .route("/api/v1/jobs/:job_id", get(get_job).delete(cancel_job))
        .route("/api/v1/node", get(node_info))
        .route("/api/v1/status", get(node_status))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve the API until the shutdown token fires.
pub async fn serve(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| AgentError::Server(e.to_string()))
}

async fn submit_job(State(state): State<ApiState>, body: Bytes) -> impl IntoResponse {
    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return reject(
                None,
                Rejection::new(
                    RejectionCode::InvalidBody,
                    format!("request body is not valid JSON: {e}"),
                ),
            );
        }
    };

    // Echoed back on rejection when the caller at least named the job.
    let job_id = parsed
        .get("job_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);

    let outcome = {
        let mut ledger = state.ledger.write().await;
        admission::admit(&parsed, &state.policy, &mut ledger)
    };

    match outcome {
        Ok(record) => {
            tracing::info!(job_id = %record.job_id, image = %record.spec.runtime.image, "Job accepted");
            (
                StatusCode::ACCEPTED,
                Json(SubmitResponse {
                    accepted: true,
                    job_id: Some(record.job_id),
                    state: "queued",
                    error: None,
                }),
            )
        }
        Err(rejection) => {
            tracing::info!(job_id = job_id.as_deref(), code = %rejection.code, "Job rejected");
            reject(job_id, rejection)
        }
    }
}

fn reject(job_id: Option<String>, rejection: Rejection) -> (StatusCode, Json<SubmitResponse>) {
    let status = if rejection.code == RejectionCode::JobIdAlreadyExists {
        StatusCode::CONFLICT
    } else {
        StatusCode::BAD_REQUEST
    };
    (
        status,
        Json(SubmitResponse {
            accepted: false,
            job_id,
            state: "rejected",
            error: Some(rejection),
        }),
    )
}

async fn get_job(State(state): State<ApiState>, Path(job_id): Path<String>) -> Response {
    match state.ledger.read().await.get(&job_id) {
        Some(record) => (StatusCode::OK, Json(JobView::from(record))).into_response(),
        None => not_found(&job_id),
    }
}

async fn list_jobs(State(state): State<ApiState>) -> Json<Vec<JobView>> {
    let jobs = state
        .ledger
        .read()
        .await
        .all()
        .into_iter()
        .map(JobView::from)
        .collect();
    Json(jobs)
}

async fn cancel_job(State(state): State<ApiState>, Path(job_id): Path<String>) -> Response {
    let outcome = state.ledger.write().await.cancel(&job_id);
    match outcome {
        CancelOutcome::Cancelled(record) => {
            tracing::info!(job_id = %record.job_id, "Queued job cancelled");
            (
                StatusCode::OK,
                Json(CancelResponse {
                    job_id: record.job_id,
                    state: record.state,
                    cancelled: true,
                    note: None,
                }),
            )
                .into_response()
        }
        CancelOutcome::Unchanged(record) => {
            let note = if record.state == JobState::Running {
                "cancellation of a running job is not implemented; the job keeps running"
            } else {
                "job already reached a terminal state"
            };
            (
                StatusCode::OK,
                Json(CancelResponse {
                    job_id: record.job_id,
                    state: record.state,
                    cancelled: false,
                    note: Some(note),
                }),
            )
                .into_response()
        }
        CancelOutcome::NotFound => not_found(&job_id),
    }
}

fn not_found(job_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"job_id": job_id, "state": "not_found"})),
    )
        .into_response()
}

async fn node_info(State(state): State<ApiState>) -> Json<NodeInfoResponse> {
    Json(NodeInfoResponse {
        node_id: state.identity.node_id,
        node_name: state.identity.node_name.clone(),
        cpus: state.identity.cpus,
        memory_mb: state.identity.memory_mb,
        labels: state.identity.labels.clone(),
        protocol_version: SUPPORTED_PROTOCOL_VERSION,
    })
}

async fn node_status(State(state): State<ApiState>) -> Json<NodeStatusResponse> {
    let (running, queued, total) = {
        let ledger = state.ledger.read().await;
        (ledger.running_count(), ledger.queued_count(), ledger.len())
    };
    Json(NodeStatusResponse {
        running_jobs: running,
        queued_jobs: queued,
        total_jobs: total,
        max_concurrent_jobs: state.max_concurrent_jobs,
        uptime_secs: state.started_at.elapsed().as_secs(),
        load: running as f64 / state.max_concurrent_jobs.max(1) as f64,
    })
}
