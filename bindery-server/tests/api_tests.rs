//! HTTP surface tests against the full router with in-memory backends.

mod common;

use std::time::Duration;

use axum_test::TestServer;
use bindery_core::MetadataCache;
use bindery_server::routes;
use common::{cached_record, StubBehavior, TestEnv, TestEnvBuilder};
use serde_json::{json, Value};

fn server(env: &TestEnv) -> TestServer {
    TestServer::new(routes::router(env.state.clone())).expect("test server")
}

async fn poll_status(server: &TestServer, id: &str, want: &str, timeout: Duration) -> Value {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let response = server.get(&format!("/api/status/{id}")).await;
        if response.status_code().as_u16() == 200 {
            let body: Value = response.json();
            if body["status"] == want {
                return body;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for status {want}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn download_happy_path_over_http() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);

    let response = server
        .post("/api/download")
        .json(&json!({ "book_id": "9781491936153" }))
        .await;
    assert_eq!(response.status_code().as_u16(), 202);
    let body: Value = response.json();
    assert_eq!(body["cached"], "false");
    let id = body["download_id"].as_str().expect("download_id").to_string();

    let status = poll_status(&server, &id, "completed", Duration::from_secs(5)).await;
    assert_eq!(status["progress"], 100);
    assert_eq!(status["book_id"], "9781491936153");
    assert!(status["epub_url"].as_str().unwrap().contains(".epub"));
    assert!(status["file_size"].as_i64().unwrap() > 0);

    // 307 redirect to the presigned URL.
    let redirect = server.get(&format!("/api/file/{id}")).await;
    assert_eq!(redirect.status_code().as_u16(), 307);
    let location = redirect.header("location");
    assert!(location.to_str().unwrap().contains("9781491936153/"));

    // File info for the completed download.
    let info = server.get(&format!("/api/file/{id}/info")).await;
    assert_eq!(info.status_code().as_u16(), 200);
    let info: Value = info.json();
    assert_eq!(info["format"], "EPUB");
    assert_eq!(info["book_id"], "9781491936153");
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_book_answers_200_with_url() {
    let env = TestEnvBuilder::new().build();
    let record = cached_record("9780000000001");
    env.store
        .put_object(record.artifact_key.clone(), b"cached artifact".to_vec());
    env.cache.put(&record).await.unwrap();
    let server = server(&env);

    let response = server
        .post("/api/download")
        .json(&json!({ "book_id": "9780000000001" }))
        .await;
    assert_eq!(response.status_code().as_u16(), 200);
    let body: Value = response.json();
    assert_eq!(body["cached"], true);
    assert_eq!(body["book_title"], "Previously Fetched Book");
    assert!(body["epub_url"].as_str().unwrap().contains(&record.artifact_key));
    assert!(body["uploaded_at"].is_string());

    // No upstream fetch happened.
    assert_eq!(env.provider.fetch_count(), 0);
}

#[tokio::test]
async fn download_requires_a_book_id() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);

    let response = server.post("/api/download").json(&json!({})).await;
    assert_eq!(response.status_code().as_u16(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"], "Book ID is required");
}

#[tokio::test]
async fn unknown_ids_return_404() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);

    for path in [
        "/api/status/not-a-uuid",
        "/api/status/00000000-0000-0000-0000-000000000000",
        "/api/file/00000000-0000-0000-0000-000000000000",
        "/api/file/00000000-0000-0000-0000-000000000000/info",
    ] {
        let response = server.get(path).await;
        assert_eq!(response.status_code().as_u16(), 404, "{path}");
        let body: Value = response.json();
        assert_eq!(body["error"], "Download ID not found", "{path}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_download_surfaces_error_in_status() {
    let env = TestEnvBuilder::new()
        .behavior(StubBehavior::NotFound)
        .build();
    let server = server(&env);

    let response = server
        .post("/api/download")
        .json(&json!({ "book_id": "0000000000000" }))
        .await;
    assert_eq!(response.status_code().as_u16(), 202);
    let body: Value = response.json();
    let id = body["download_id"].as_str().unwrap().to_string();

    let status = poll_status(&server, &id, "error", Duration::from_secs(5)).await;
    assert_eq!(
        status["error"],
        "Book not found. Please check the Book ID and try again."
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_delivers_terminal_update_then_ends() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);

    let response = server
        .post("/api/download")
        .json(&json!({ "book_id": "9781491936153" }))
        .await;
    let body: Value = response.json();
    let id = body["download_id"].as_str().unwrap().to_string();

    poll_status(&server, &id, "completed", Duration::from_secs(5)).await;

    // Subscribing after completion yields the terminal snapshot and the
    // stream closes, so the request finishes on its own.
    let stream = server.get(&format!("/api/stream/{id}")).await;
    assert_eq!(stream.status_code().as_u16(), 200);
    let text = stream.text();
    assert!(text.contains("data:"));
    assert!(text.contains("\"status\":\"completed\""));
}

#[tokio::test]
async fn stream_for_unknown_job_is_404() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);
    let response = server
        .get("/api/stream/00000000-0000-0000-0000-000000000000")
        .await;
    assert_eq!(response.status_code().as_u16(), 404);
}

#[tokio::test]
async fn book_info_proxies_upstream_metadata() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);

    let response = server.get("/api/book/9781491936153/info").await;
    assert_eq!(response.status_code().as_u16(), 200);
    let body: Value = response.json();
    assert_eq!(body["title"], common::STUB_TITLE);
    assert_eq!(body["authors"][0], "Test Author");
    assert_eq!(body["isbn"], "9781491936153");
}

#[tokio::test]
async fn book_info_maps_upstream_404() {
    let env = TestEnvBuilder::new()
        .behavior(StubBehavior::NotFound)
        .build();
    let server = server(&env);

    let response = server.get("/api/book/0000000000000/info").await;
    assert_eq!(response.status_code().as_u16(), 404);
    let body: Value = response.json();
    assert_eq!(body["error"], "Book not found");
}

#[tokio::test]
async fn stats_reports_pools_and_backends() {
    let env = TestEnvBuilder::new().build();
    let server = server(&env);

    let response = server.get("/api/stats").await;
    assert_eq!(response.status_code().as_u16(), 200);
    let body: Value = response.json();
    assert_eq!(body["download_slots_total"], 3);
    assert_eq!(body["download_slots_free"], 3);
    assert_eq!(body["conversion_slots_total"], 2);
    assert_eq!(body["redis_enabled"], true);
    assert_eq!(body["minio_enabled"], true);
    assert_eq!(body["presigned_url_expiry_hours"], 1);
    assert_eq!(body["jobs"]["total"], 0);
}

#[tokio::test]
async fn file_redirect_before_completion_is_rejected() {
    let gate = std::sync::Arc::new(tokio::sync::Semaphore::new(0));
    let env = TestEnvBuilder::new()
        .behavior(StubBehavior::Gated(gate.clone()))
        .build();
    let server = server(&env);

    let response = server
        .post("/api/download")
        .json(&json!({ "book_id": "9781491936153" }))
        .await;
    let body: Value = response.json();
    let id = body["download_id"].as_str().unwrap().to_string();

    let response = server.get(&format!("/api/file/{id}")).await;
    assert_eq!(response.status_code().as_u16(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"], "Download not completed");

    gate.add_permits(1);
}
