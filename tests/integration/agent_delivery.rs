//! Integration tests for agent delivery against a mock collector
//!
//! These tests verify that:
//! - Envelopes arrive on the right routes with the right headers
//! - Bodies are gzip-compressed and signed over the uncompressed bytes
//! - Failed deliveries are retried up to the policy's attempt limit
//! - The spawned dispatcher reports on its own schedule

use std::sync::Arc;
use std::time::Duration;

use metrics_relay::{
    Metric,
    agent::{DeliveryOutcome, Dispatcher, HttpTransport, RetryPolicy, send_with_retry},
    envelope::{ContentFormat, DeliveryMode, EnvelopeBuilder, EnvelopeConfig, gzip, sign},
    storage::MemoryBackend,
};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_bytes, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::KEY;

fn store() -> MemoryBackend {
    let store = MemoryBackend::new();
    store.update_gauge("Alloc", 1024.0);
    store.add_counter("PollCount", 3);
    store
}

fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        delays: vec![Duration::from_millis(10); 3],
    }
}

#[tokio::test]
async fn test_batch_envelope_is_compressed_and_signed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .and(header("Content-Type", "application/json"))
        .and(header("Content-Encoding", "gzip"))
        .and(header_exists("HashSHA256"))
        .and(header_exists("X-Real-IP"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let builder = EnvelopeBuilder::new(EnvelopeConfig {
        mode: DeliveryMode::Batch,
        compress: true,
        key: Some(KEY.to_string()),
        ..Default::default()
    });
    let envelopes = builder.build(&store().snapshot()).unwrap();
    assert_eq!(envelopes.len(), 1);

    let outcome = send_with_retry(&transport(&server), &envelopes[0], &quick_policy()).await;
    assert_eq!(outcome.attempts(), 1);
    assert!(outcome.is_delivered());

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];

    let body = gzip::decompress(&request.body).unwrap();
    let digest = request.headers.get("HashSHA256").unwrap().to_str().unwrap();
    assert!(sign::verify(&body, KEY, digest));

    let metrics: Vec<Metric> = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        metrics,
        vec![Metric::gauge("Alloc", 1024.0), Metric::counter("PollCount", 3)]
    );
}

#[tokio::test]
async fn test_single_text_mode_uses_path_routes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/update/gauge/Alloc/1024"))
        .and(header("Content-Type", "text/plain"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/update/counter/PollCount/3"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let builder = EnvelopeBuilder::new(EnvelopeConfig {
        mode: DeliveryMode::Single,
        format: ContentFormat::Text,
        compress: true,
        ..Default::default()
    });

    let transport = transport(&server);
    for envelope in builder.build(&store().snapshot()).unwrap() {
        assert!(send_with_retry(&transport, &envelope, &quick_policy()).await.is_delivered());
    }
}

#[tokio::test]
async fn test_single_json_mode_sends_one_metric_per_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/update/"))
        .and(body_bytes(serde_json::to_vec(&Metric::counter("PollCount", 3)).unwrap()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/update/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let builder = EnvelopeBuilder::new(EnvelopeConfig {
        mode: DeliveryMode::Single,
        format: ContentFormat::Json,
        compress: false,
        ..Default::default()
    });

    let transport = transport(&server);
    let envelopes = builder.build(&store().snapshot()).unwrap();
    assert_eq!(envelopes.len(), 2);
    for envelope in envelopes {
        assert!(send_with_retry(&transport, &envelope, &quick_policy()).await.is_delivered());
    }
}

#[tokio::test]
async fn test_server_errors_are_retried_until_the_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let envelopes = EnvelopeBuilder::new(EnvelopeConfig::default())
        .build(&store().snapshot())
        .unwrap();

    let outcome = send_with_retry(&transport(&server), &envelopes[0], &quick_policy()).await;
    match outcome {
        DeliveryOutcome::GaveUp { attempts, error } => {
            assert_eq!(attempts, 4);
            assert!(error.to_string().contains("500"));
        }
        other => panic!("expected GaveUp, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delivery_recovers_after_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let envelopes = EnvelopeBuilder::new(EnvelopeConfig::default())
        .build(&store().snapshot())
        .unwrap();

    let outcome = send_with_retry(&transport(&server), &envelopes[0], &quick_policy()).await;
    assert!(outcome.is_delivered());
    assert_eq!(outcome.attempts(), 3);
}

#[tokio::test]
async fn test_unreachable_collector_gives_up() {
    // nothing listens on the discard port
    let transport = HttpTransport::new("127.0.0.1:9", Duration::from_millis(500)).unwrap();
    let envelopes = EnvelopeBuilder::new(EnvelopeConfig::default())
        .build(&store().snapshot())
        .unwrap();

    let outcome = send_with_retry(&transport, &envelopes[0], &quick_policy()).await;
    assert!(!outcome.is_delivered());
    assert_eq!(outcome.attempts(), 4);
}

#[tokio::test]
async fn test_spawned_dispatcher_reports_periodically() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(store());
    let dispatcher = Dispatcher::new(
        store,
        EnvelopeBuilder::new(EnvelopeConfig::default()),
        Arc::new(transport(&server)),
        quick_policy(),
    );

    let cancel = CancellationToken::new();
    let handles = dispatcher.spawn(2, Duration::from_millis(20), cancel.clone());

    tokio::time::sleep(Duration::from_millis(150)).await;
    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }

    let requests = server.received_requests().await.unwrap();
    assert!(requests.len() >= 2, "only {} reports", requests.len());
}
