//! Helper functions for integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, OnceLock};

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    http::{HeaderMap, Request, StatusCode},
};
use metrics_relay::{
    api::{ApiState, router},
    envelope::{PrivateKey, PublicKey},
    storage::{FileBackend, StorageBackend},
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use tower::ServiceExt;

pub const KEY: &str = "integration-secret";

/// File-backed storage in `dir` that only writes on demand
pub fn file_storage(dir: &Path) -> Arc<FileBackend> {
    Arc::new(FileBackend::open(dir.join("metrics.json"), false, false))
}

pub fn app(storage: Arc<dyn StorageBackend>) -> Router {
    router(ApiState::new(storage))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

/// Drive one request through the router without binding a socket
pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();

    TestResponse {
        status: parts.status,
        headers: parts.headers,
        body: to_bytes(body, usize::MAX).await.unwrap(),
    }
}

pub fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::post(uri)
        .header("Content-Type", "application/json")
        .body(body.into())
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub fn private_key() -> PrivateKey {
    PrivateKey::from_pem(&rsa_key().to_pkcs8_pem(LineEnding::LF).unwrap()).unwrap()
}

pub fn public_key() -> PublicKey {
    PublicKey::from_pem(&rsa_key().to_public_key().to_public_key_pem(LineEnding::LF).unwrap())
        .unwrap()
}

/// Write both halves of the shared test key as PEM files into `dir`
pub fn write_key_pair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let private = dir.join("private.pem");
    let public = dir.join("public.pem");

    std::fs::write(&private, rsa_key().to_pkcs8_pem(LineEnding::LF).unwrap()).unwrap();
    std::fs::write(
        &public,
        rsa_key().to_public_key().to_public_key_pem(LineEnding::LF).unwrap(),
    )
    .unwrap();

    (private, public)
}
