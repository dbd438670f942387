mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;
use vacancy_importer::routes::{self, AppState};
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{Harness, generic_task, harness, job, listing, store_task};

fn app(h: &Harness) -> Router {
    routes::api::router(AppState::new(h.orchestrator.clone()))
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn lists_registered_providers() {
    let h = harness();
    let (status, body) = send(app(&h), Method::GET, "/api/v1/providers", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], json!("find-apprenticeship"));
    assert_eq!(body[0]["configured"], json!(false));
}

#[tokio::test]
async fn unconfigured_provider_test_reports_failure() {
    let h = harness();
    let (status, body) = send(
        app(&h),
        Method::POST,
        "/api/v1/providers/find-apprenticeship/test",
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));

    let (status, _) = send(app(&h), Method::POST, "/api/v1/providers/nope/test", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn creates_and_fetches_tasks() {
    let h = harness();
    let (status, created) = send(
        app(&h),
        Method::POST,
        "/api/v1/tasks",
        Some(json!({ "name": "Draft feed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], json!("draft"));

    let id = created["id"].as_str().unwrap().to_string();
    let (status, fetched) = send(app(&h), Method::GET, &format!("/api/v1/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["name"], json!("Draft feed"));
    assert_eq!(fetched["duplicate_action"], json!("update"));

    let (status, listed) = send(app(&h), Method::GET, "/api/v1/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn rejects_incomplete_active_tasks() {
    let h = harness();
    let (status, body) = send(
        app(&h),
        Method::POST,
        "/api/v1/tasks",
        Some(json!({ "name": "Broken", "status": "active" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("api_base_url"));

    let (status, _) = send(app(&h), Method::POST, "/api/v1/tasks", Some(json!({ "name": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_tasks_and_runs_are_404() {
    let h = harness();
    let id = uuid::Uuid::new_v4();

    for (method, uri) in [
        (Method::GET, format!("/api/v1/tasks/{id}")),
        (Method::DELETE, format!("/api/v1/tasks/{id}")),
        (Method::POST, format!("/api/v1/tasks/{id}/run")),
        (Method::GET, format!("/api/v1/runs/{id}")),
        (Method::POST, format!("/api/v1/runs/{id}/cancel")),
        (Method::GET, format!("/api/v1/runs/{id}/logs")),
    ] {
        let (status, _) = send(app(&h), method.clone(), &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
    }
}

#[tokio::test]
async fn runs_a_task_and_exposes_its_history() {
    let server = MockServer::start().await;
    Mock::given(path("/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![job("1", "Welder"), job("2", "Chef")])))
        .mount(&server)
        .await;

    let h = harness();
    let task = store_task(&h, generic_task(&server.uri())).await;

    let (status, summary) = send(app(&h), Method::POST, &format!("/api/v1/tasks/{}/run", task.id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["success"], json!(true));
    assert_eq!(summary["created"], json!(2));

    let run_id = summary["run_id"].as_str().unwrap().to_string();
    let (status, report) = send(app(&h), Method::GET, &format!("/api/v1/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], json!("completed"));

    let (_, history) = send(app(&h), Method::GET, &format!("/api/v1/tasks/{}/runs?limit=5", task.id), None).await;
    assert_eq!(history.as_array().map(Vec::len), Some(1));

    let (_, logs) = send(app(&h), Method::GET, &format!("/api/v1/runs/{run_id}/logs"), None).await;
    assert!(!logs.as_array().unwrap().is_empty());

    let (_, cancelled) = send(app(&h), Method::POST, &format!("/api/v1/runs/{run_id}/cancel"), None).await;
    assert_eq!(cancelled["cancelled"], json!(false));
}

#[tokio::test]
async fn clearing_a_disabled_cache_is_a_no_op() {
    let h = harness();
    let (status, body) = send(app(&h), Method::POST, "/api/v1/cache/clear", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "enabled": false, "cleared": 0 }));
}
