//! Integration tests for the ingestion API
//!
//! These tests verify that:
//! - Text and JSON updates follow gauge/counter semantics
//! - Lookups distinguish unknown types (400) from unknown metrics (404)
//! - Batches are atomic on backends that support them and 501 elsewhere
//! - Envelope middleware handles gzip, HashSHA256 and sealed bodies
//! - The trusted subnet gate rejects foreign agents

use std::sync::Arc;

use axum::{body::Body, http::Request, http::StatusCode};
use metrics_relay::{
    Metric,
    api::{ApiState, middleware::envelope::MAX_BODY_BYTES, middleware::subnet::parse_subnet, router},
    envelope::{gzip, sign},
    storage::MemoryBackend,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::tempdir;

use crate::helpers::{self, KEY, get, post, send};

#[tokio::test]
async fn test_text_updates_and_lookups() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let response = send(&app, post("/update/gauge/Alloc/1.5", Body::empty())).await;
    assert_eq!(response.status, StatusCode::OK);

    send(&app, post("/update/counter/PollCount/3", Body::empty())).await;
    send(&app, post("/update/counter/PollCount/4", Body::empty())).await;

    let gauge = send(&app, get("/value/gauge/Alloc")).await;
    assert_eq!(gauge.status, StatusCode::OK);
    assert_eq!(gauge.text(), "1.5");

    let counter = send(&app, get("/value/counter/PollCount")).await;
    assert_eq!(counter.text(), "7");

    send(&app, post("/update/gauge/Alloc/2", Body::empty())).await;
    assert_eq!(send(&app, get("/value/gauge/Alloc")).await.text(), "2");
}

#[tokio::test]
async fn test_invalid_updates_are_rejected() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    for uri in [
        "/update/histogram/A/1",
        "/update/gauge/A/not-a-number",
        "/update/counter/A/1.5",
        "/update/gauge/A/NaN",
    ] {
        let response = send(&app, post(uri, Body::empty())).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
    }

    // nothing was stored
    assert_eq!(send(&app, get("/value/gauge/A")).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lookup_errors() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    assert_eq!(send(&app, get("/value/gauge/Missing")).await.status, StatusCode::NOT_FOUND);
    assert_eq!(send(&app, get("/value/summary/Missing")).await.status, StatusCode::BAD_REQUEST);

    let response = send(&app, post("/value/", json!({"id": "Missing", "type": "counter"}).to_string())).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.json()["error"].as_str().unwrap().contains("Missing"));

    let response = send(&app, post("/value/", json!({"id": "X", "type": "summary"}).to_string())).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_json_update_returns_stored_value() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let body = json!({"id": "PollCount", "type": "counter", "delta": 5}).to_string();
    send(&app, post("/update/", body.clone())).await;
    let response = send(&app, post("/update/", body)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({"id": "PollCount", "type": "counter", "delta": 10}));

    let response = send(
        &app,
        post("/value/", json!({"id": "PollCount", "type": "counter"}).to_string()),
    )
    .await;
    assert_eq!(response.json(), json!({"id": "PollCount", "type": "counter", "delta": 10}));

    let response = send(&app, post("/update/", json!({"id": "G", "type": "gauge"}).to_string())).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_update_and_listing() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let batch = vec![
        Metric::gauge("Alloc", 10.0),
        Metric::counter("PollCount", 2),
        Metric::counter("PollCount", 3),
    ];
    let response = send(&app, post("/updates/", serde_json::to_vec(&batch).unwrap())).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), json!({"updated": 3}));

    assert_eq!(send(&app, get("/value/counter/PollCount")).await.text(), "5");

    let page = send(&app, get("/")).await;
    assert_eq!(page.status, StatusCode::OK);
    assert!(page.headers["content-type"].to_str().unwrap().starts_with("text/html"));
    let html = page.text();
    assert!(html.contains("Alloc: 10"));
    assert!(html.contains("PollCount: 5"));
}

#[tokio::test]
async fn test_invalid_batch_changes_nothing() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let body = json!([
        {"id": "Good", "type": "gauge", "value": 1.0},
        {"id": "Bad", "type": "gauge"}
    ])
    .to_string();
    let response = send(&app, post("/updates/", body)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(send(&app, get("/value/gauge/Good")).await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_batch_on_memory_backend_is_not_implemented() {
    let app = helpers::app(Arc::new(MemoryBackend::new()));
    let body = serde_json::to_vec(&[Metric::gauge("A", 1.0)]).unwrap();

    let response = send(&app, post("/updates/", body)).await;
    assert_eq!(response.status, StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_ping_reports_healthy_backend() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let response = send(&app, get("/ping")).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
}

#[tokio::test]
async fn test_gzip_request_is_decompressed() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let body = serde_json::to_vec(&[Metric::gauge("Zipped", 3.25)]).unwrap();
    let request = Request::post("/updates/")
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "gzip")
        .body(Body::from(gzip::compress(&body).unwrap()))
        .unwrap();

    assert_eq!(send(&app, request).await.status, StatusCode::OK);
    assert_eq!(send(&app, get("/value/gauge/Zipped")).await.text(), "3.25");
}

#[tokio::test]
async fn test_oversized_gzip_body_is_rejected() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    // a few KiB on the wire, one byte over the limit once inflated
    let bomb = gzip::compress(&vec![b' '; MAX_BODY_BYTES + 1]).unwrap();
    assert!(bomb.len() < MAX_BODY_BYTES / 100);

    let request = Request::post("/updates/")
        .header("Content-Type", "application/json")
        .header("Content-Encoding", "gzip")
        .body(Body::from(bomb))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["error"].as_str().unwrap().contains("exceeds"));
}

#[tokio::test]
async fn test_hash_is_verified_and_responses_are_signed() {
    let dir = tempdir().unwrap();
    let storage = helpers::file_storage(dir.path());
    let app = router(ApiState::new(storage).with_key(Some(KEY.to_string())));

    let body = serde_json::to_vec(&Metric::gauge("Signed", 1.0)).unwrap();

    let tampered = Request::post("/update/")
        .header("HashSHA256", sign::sign(b"something else", KEY))
        .body(Body::from(body.clone()))
        .unwrap();
    assert_eq!(send(&app, tampered).await.status, StatusCode::BAD_REQUEST);

    let signed = Request::post("/update/")
        .header("hashsha256", sign::sign(&body, KEY))
        .body(Body::from(body.clone()))
        .unwrap();
    let response = send(&app, signed).await;
    assert_eq!(response.status, StatusCode::OK);

    let digest = response.headers["HashSHA256"].to_str().unwrap();
    assert!(sign::verify(&response.body, KEY, digest));

    // an unsigned request is accepted
    let unsigned = post("/update/", body);
    assert_eq!(send(&app, unsigned).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_sealed_body_is_opened() {
    let dir = tempdir().unwrap();
    let storage = helpers::file_storage(dir.path());
    let app = router(ApiState::new(storage).with_private_key(Some(helpers::private_key())));

    let body = serde_json::to_vec(&[Metric::counter("Sealed", 9)]).unwrap();
    let sealed = helpers::public_key().seal(&body).unwrap();

    let response = send(&app, post("/updates/", sealed)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(send(&app, get("/value/counter/Sealed")).await.text(), "9");

    // plaintext no longer decodes as ciphertext
    let response = send(&app, post("/updates/", body)).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trusted_subnet_gate() {
    let dir = tempdir().unwrap();
    let storage = helpers::file_storage(dir.path());
    let subnet = parse_subnet("192.168.1.0/24").unwrap();
    let app = router(ApiState::new(storage).with_trusted_subnet(Some(subnet)));

    let missing = post("/update/gauge/A/1", Body::empty());
    assert_eq!(send(&app, missing).await.status, StatusCode::FORBIDDEN);

    let foreign = Request::post("/update/gauge/A/1")
        .header("X-Real-IP", "10.1.2.3")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, foreign).await.status, StatusCode::FORBIDDEN);

    let trusted = Request::post("/update/gauge/A/1")
        .header("X-Real-IP", "192.168.1.42")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, trusted).await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_missing_name_is_not_found() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let response = send(&app, post("/update/counter//1", Body::empty())).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = send(&app, post("/update/gauge/", Body::empty())).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_repeated_batch_overwrites_gauges_and_sums_counters() {
    let dir = tempdir().unwrap();
    let app = helpers::app(helpers::file_storage(dir.path()));

    let batch = r#"[{"id":"A","type":"gauge","value":1.0},{"id":"B","type":"counter","delta":5}]"#;
    for _ in 0..2 {
        assert_eq!(send(&app, post("/updates/", batch)).await.status, StatusCode::OK);
    }

    assert_eq!(send(&app, get("/value/gauge/A")).await.text(), "1");
    assert_eq!(send(&app, get("/value/counter/B")).await.text(), "10");
}
