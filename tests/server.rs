//! HTTP endpoint layer, served on a free local port and called with reqwest.
//! The platform behind it is the in-memory fake.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

use common::FakeGateway;
use kbsync::config::{Config, DbConfig};
use kbsync::gateway::ResourceGateway;
use kbsync::models::JobStatus;
use kbsync::server::{router, AppState};
use kbsync::state_store::StateStore;

fn config(with_provisioning: bool) -> Config {
    let provisioning = if with_provisioning {
        r#"
[provisioning]
project_id = "proj-1"
database_id = "db-1"
embedding_model_id = "emb-1"
"#
    } else {
        ""
    };
    toml::from_str(&format!(
        r#"
[platform]
base_url = "http://127.0.0.1:9"
{}"#,
        provisioning
    ))
    .unwrap()
}

async fn spawn_server(cfg: Config, gw: Arc<FakeGateway>, store: Option<StateStore>) -> String {
    let gateway: Arc<dyn ResourceGateway> = gw;
    let app = router(AppState::new(Arc::new(cfg), gateway, store));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn post_reconcile(base: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/kb/reconcile", base))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

fn reconcile_body() -> Value {
    json!({
        "userId": "u1",
        "kbName": "kb-u1",
        "desiredItemPath": "users/u1/",
        "bucketName": "user-docs"
    })
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_version() {
    let base = spawn_server(config(true), Arc::new(FakeGateway::new()), None).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn reconcile_then_resume() {
    let gw = Arc::new(FakeGateway::new());
    let base = spawn_server(config(true), gw.clone(), None).await;

    let (status, first) = post_reconcile(&base, reconcile_body()).await;
    assert_eq!(status, 200);
    assert_eq!(first["resumed"], false);
    let job_id = first["jobId"].as_str().unwrap().to_string();

    let mut again = reconcile_body();
    again["resumeJobId"] = json!(job_id);
    let (status, second) = post_reconcile(&base, again).await;
    assert_eq!(status, 200);
    assert_eq!(second["jobId"], first["jobId"]);
    assert_eq!(second["kbId"], first["kbId"]);
    assert_eq!(second["resumed"], true);
    assert_eq!(gw.calls("start_indexing_job"), 1);
}

#[tokio::test]
async fn empty_fields_are_rejected() {
    let gw = Arc::new(FakeGateway::new());
    let base = spawn_server(config(true), gw.clone(), None).await;

    let mut body = reconcile_body();
    body["desiredItemPath"] = json!("  ");
    let (status, err) = post_reconcile(&base, body).await;
    assert_eq!(status, 400);
    assert_eq!(err["errorKind"], "BAD_REQUEST");
    assert_eq!(err["message"], "desiredItemPath must not be empty");
    assert_eq!(gw.calls("list_knowledge_bases"), 0);
}

#[tokio::test]
async fn engine_errors_map_to_status_and_kind() {
    let base = spawn_server(config(false), Arc::new(FakeGateway::new()), None).await;
    let (status, err) = post_reconcile(&base, reconcile_body()).await;
    assert_eq!(status, 500);
    assert_eq!(err["errorKind"], "CONFIG_MISSING");
    assert!(err["message"].as_str().unwrap().contains("project"));
    assert!(err.get("error").is_none());

    let gw = Arc::new(FakeGateway::new());
    gw.seed_kb("kb-u1", &["users/u1/"]);
    gw.fail_next("start_indexing_job", 409, "indexing job already running");
    let base = spawn_server(config(true), gw, None).await;
    let (status, err) = post_reconcile(&base, reconcile_body()).await;
    assert_eq!(status, 409);
    assert_eq!(err["errorKind"], "INDEXING_CONFLICT_UNRESOLVED");
}

#[tokio::test]
async fn job_status_endpoint() {
    let gw = Arc::new(FakeGateway::new());
    let job = gw.seed_job("kb-1", JobStatus::Running);
    let base = spawn_server(config(true), gw.clone(), None).await;

    let resp = reqwest::get(format!("{}/jobs/{}", base, job.id)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["jobId"], job.id.as_str());
    assert_eq!(body["status"], "RUNNING");

    let resp = reqwest::get(format!("{}/jobs/job-missing", base)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["errorKind"], "NOT_FOUND");

    gw.fail_next("get_indexing_job", 500, "boom");
    let resp = reqwest::get(format!("{}/jobs/{}", base, job.id)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 502);
}

#[tokio::test]
async fn stored_snapshot_supplies_resume_hint() {
    let tmp = TempDir::new().unwrap();
    let store = StateStore::open(&DbConfig {
        path: tmp.path().join("kbsync.sqlite"),
    })
    .await
    .unwrap();
    let gw = Arc::new(FakeGateway::new());
    let base = spawn_server(config(true), gw.clone(), Some(store.clone())).await;

    let (_, first) = post_reconcile(&base, reconcile_body()).await;
    let saved = store.load("u1", "kb-u1").await.unwrap().unwrap();
    assert_eq!(saved.last_indexing_job_id.as_deref(), first["jobId"].as_str());
    assert_eq!(saved.kb_id.as_deref(), first["kbId"].as_str());

    // No hint in the request: the stored job id is used.
    let (status, second) = post_reconcile(&base, reconcile_body()).await;
    assert_eq!(status, 200);
    assert_eq!(second["jobId"], first["jobId"]);
    assert_eq!(second["resumed"], true);
    assert_eq!(gw.calls("start_indexing_job"), 1);
    assert_eq!(gw.calls("list_indexing_jobs"), 0);
}

#[tokio::test]
async fn success_body_uses_camel_case_fields() {
    let gw = Arc::new(FakeGateway::new());
    let base = spawn_server(config(true), gw.clone(), None).await;

    let (status, body) = post_reconcile(&base, reconcile_body()).await;
    assert_eq!(status, 200);
    let fields: Vec<&str> = body.as_object().unwrap().keys().map(|k| k.as_str()).collect();
    assert_eq!(fields.len(), 4);
    for key in ["kbId", "dataSourceId", "jobId", "resumed"] {
        assert!(fields.contains(&key), "missing {} in {}", key, body);
    }

    // snake_case request fields are not part of the contract.
    let resp = reqwest::Client::new()
        .post(format!("{}/kb/reconcile", base))
        .json(&json!({
            "user_id": "u1",
            "kb_name": "kb-u1",
            "desired_item_path": "users/u1/",
            "bucket_name": "user-docs"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 422);
}
