
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;

use jobd::api::{router, ApiState};
use jobd::config::NodeIdentity;
use jobd::job::{AdmissionPolicy, JobLedger};
use test_harness::job_body;

fn test_app(allowed_images: Vec<String>) -> (Router, Arc<RwLock<JobLedger>>) {
    let ledger = Arc::new(RwLock::new(JobLedger::new()));
    let state = ApiState {
        ledger: Arc::clone(&ledger),
        policy: Arc::new(AdmissionPolicy::new(allowed_images)),
        identity: Arc::new(NodeIdentity::new("test-node").with_label("zone", "test")),
        max_concurrent_jobs: 2,
        started_at: Instant::now(),
    };
    (router(state), ledger)
}

async fn send_raw(app: &Router, method: &str, uri: &str, body: Body) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn submit(app: &Router, body: &Value) -> (StatusCode, Value) {
    send_raw(app, "POST", "/api/v1/jobs", Body::from(body.to_string())).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send_raw(app, "GET", uri, Body::empty()).await
}

async fn delete(app: &Router, uri: &str) -> (StatusCode, Value) {
    send_raw(app, "DELETE", uri, Body::empty()).await
}

#[tokio::test]
async fn submit_then_lookup() {
    let (app, _ledger) = test_app(Vec::new());

    let (status, body) = submit(&app, &job_body("job-1")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], json!(true));
    assert_eq!(body["job_id"], json!("job-1"));
    assert_eq!(body["state"], json!("queued"));
    assert!(body.get("error").is_none());

    let (status, body) = get(&app, "/api/v1/jobs/job-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], json!("queued"));
    assert_eq!(body["image"], json!("alpine:latest"));
    assert!(body["started_at"].is_null());
    assert!(body["finished_at"].is_null());
    assert!(body["exit_code"].is_null());
    assert!(body["error"].is_null());
}

#[tokio::test]
async fn malformed_json_is_an_invalid_body() {
    let (app, ledger) = test_app(Vec::new());

    let (status, body) = send_raw(
        &app,
        "POST",
        "/api/v1/jobs",
        Body::from("this is not json {"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["accepted"], json!(false));
    assert_eq!(body["state"], json!("rejected"));
    assert_eq!(body["error"]["code"], json!("INVALID_BODY"));
    assert!(ledger.read().await.is_empty());
}

#[tokio::test]
async fn non_object_json_is_an_invalid_body() {
    let (app, _ledger) = test_app(Vec::new());
    let (status, body) = submit(&app, &json!(["not", "an", "object"])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("INVALID_BODY"));
}

#[tokio::test]
async fn wrong_protocol_version_is_always_rejected() {
    let (app, _ledger) = test_app(Vec::new());
    let mut body = job_body("job-1");
    body["protocol_version"] = json!(99);

    let (status, response) = submit(&app, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["accepted"], json!(false));
    assert_eq!(response["job_id"], json!("job-1"));
    assert_eq!(
        response["error"]["code"],
        json!("UNSUPPORTED_PROTOCOL_VERSION")
    );
}

#[tokio::test]
async fn duplicate_submission_conflicts() {
    let (app, ledger) = test_app(Vec::new());

    let (status, _) = submit(&app, &job_body("job-1")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let first = ledger.read().await.get("job-1").unwrap();

    let (status, body) = submit(&app, &job_body("job-1")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], json!("JOB_ID_ALREADY_EXISTS"));

    // first record untouched
    let stored = ledger.read().await.get("job-1").unwrap();
    assert_eq!(stored.created_at, first.created_at);
    assert_eq!(ledger.read().await.len(), 1);
}

#[tokio::test]
async fn allow_list_is_enforced_over_http() {
    let (app, _ledger) = test_app(vec!["alpine:*".to_string()]);

    let mut body = job_body("job-1");
    body["runtime"]["image"] = json!("debian:bookworm");
    let (status, response) = submit(&app, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], json!("IMAGE_NOT_ALLOWED"));

    let mut body = job_body("job-2");
    body["runtime"]["image"] = json!("alpine:3.20");
    let (status, _) = submit(&app, &body).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (app, _ledger) = test_app(Vec::new());
    let (status, body) = get(&app, "/api/v1/jobs/never-submitted").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["state"], json!("not_found"));
    assert_eq!(body["job_id"], json!("never-submitted"));
}

#[tokio::test]
async fn cancel_queued_job() {
    let (app, _ledger) = test_app(Vec::new());
    submit(&app, &job_body("job-1")).await;

    let (status, body) = delete(&app, "/api/v1/jobs/job-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], json!(true));
    assert_eq!(body["state"], json!("failed"));

    let (_, body) = get(&app, "/api/v1/jobs/job-1").await;
    assert_eq!(body["state"], json!("failed"));
    assert_eq!(body["error"]["code"], json!("CANCELLED"));
}

#[tokio::test]
async fn cancel_running_job_is_acknowledged_without_effect() {
    let (app, ledger) = test_app(Vec::new());
    submit(&app, &job_body("job-1")).await;
    ledger.write().await.begin("job-1").unwrap();

    let (status, body) = delete(&app, "/api/v1/jobs/job-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], json!(false));
    assert_eq!(body["state"], json!("running"));
    assert!(body["note"].as_str().unwrap().contains("not implemented"));

    let (_, body) = get(&app, "/api/v1/jobs/job-1").await;
    assert_eq!(body["state"], json!("running"));
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let (app, _ledger) = test_app(Vec::new());
    let (status, body) = delete(&app, "/api/v1/jobs/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["state"], json!("not_found"));
}

#[tokio::test]
async fn list_returns_jobs_in_admission_order() {
    let (app, _ledger) = test_app(Vec::new());
    for id in ["a", "b", "c"] {
        submit(&app, &job_body(id)).await;
    }

    let (status, body) = get(&app, "/api/v1/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["job_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn node_info_is_static_description() {
    let (app, _ledger) = test_app(Vec::new());
    let (status, body) = get(&app, "/api/v1/node").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_name"], json!("test-node"));
    assert_eq!(body["labels"]["zone"], json!("test"));
    assert_eq!(body["protocol_version"], json!(1));
    assert!(body["cpus"].as_u64().unwrap() >= 1);
    assert!(body["node_id"].is_string());
}

#[tokio::test]
async fn status_reflects_ledger_counts() {
    let (app, ledger) = test_app(Vec::new());

    let (_, body) = get(&app, "/api/v1/status").await;
    assert_eq!(body["running_jobs"], json!(0));
    assert_eq!(body["queued_jobs"], json!(0));
    assert_eq!(body["max_concurrent_jobs"], json!(2));
    assert_eq!(body["load"], json!(0.0));

    submit(&app, &job_body("a")).await;
    submit(&app, &job_body("b")).await;
    ledger.write().await.begin("a").unwrap();

    let (_, body) = get(&app, "/api/v1/status").await;
    assert_eq!(body["running_jobs"], json!(1));
    assert_eq!(body["queued_jobs"], json!(1));
    assert_eq!(body["total_jobs"], json!(2));
    assert_eq!(body["load"], json!(0.5));
}
