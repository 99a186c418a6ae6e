//! Contract tests for HttpCalendar against a wiremock calendar server
//!
//! ## Endpoints Tested
//!
//! | Method | Path | Test |
//! |--------|------|------|
//! | POST   | `/digest` | `submit_*` |
//! | GET    | `/timestamp/{hex commitment}` | `get_timestamp_*` |

use std::sync::Arc;
use std::time::Duration;

use ots_client::calendar::{MAX_RESPONSE_SIZE, OTS_MEDIA_TYPE};
use ots_client::{Calendar, ClientConfig, ClientError, HttpCalendar, OtsClient, UrlWhitelist};
use ots_core::{DetachedTimestampFile, Timestamp};
use ots_types::{Attestation, DigestAlg, Op};
use wiremock::matchers::{body_bytes, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn calendar(server: &MockServer) -> HttpCalendar {
    HttpCalendar::new(server.uri(), Duration::from_secs(5)).unwrap()
}

/// Proof bytes carrying a single pending attestation
fn pending_proof(uri: &str) -> Vec<u8> {
    let timestamp = Timestamp::new(vec![0u8; 32]);
    timestamp.add_attestation(Attestation::pending(uri).unwrap());
    timestamp.to_bytes().unwrap()
}

/// Proof bytes anchoring `commitment` in block `height`
fn anchored_proof(commitment: &[u8], height: u64) -> Vec<u8> {
    let timestamp = Timestamp::new(commitment.to_vec());
    timestamp
        .add(Op::Prepend(b"block".to_vec()))
        .unwrap()
        .add(Op::sha256())
        .unwrap()
        .add_attestation(Attestation::Bitcoin { height });
    timestamp.to_bytes().unwrap()
}

// ── POST /digest ─────────────────────────────────────────────────────

#[tokio::test]
async fn submit_posts_digest_and_parses_proof() {
    let mock_server = MockServer::start().await;
    let digest = [0xabu8; 32];

    Mock::given(method("POST"))
        .and(path("/digest"))
        .and(header("accept", OTS_MEDIA_TYPE))
        .and(body_bytes(digest.to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pending_proof(&mock_server.uri())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let timestamp = calendar(&mock_server).submit(&digest).await.unwrap();
    assert_eq!(timestamp.msg(), digest.to_vec());
    assert_eq!(
        timestamp.attestations(),
        vec![Attestation::Pending {
            uri: mock_server.uri()
        }]
    );
}

#[tokio::test]
async fn submit_handles_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/digest"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let result = calendar(&mock_server).submit(&[1u8; 32]).await;
    assert!(
        matches!(result, Err(ClientError::BadStatus { status: 503, .. })),
        "Expected BadStatus 503, got: {:?}",
        result
    );
}

#[tokio::test]
async fn submit_rejects_garbage_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/digest"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a timestamp".to_vec()))
        .mount(&mock_server)
        .await;

    let result = calendar(&mock_server).submit(&[1u8; 32]).await;
    assert!(matches!(result, Err(ClientError::Proof(_))));
}

#[tokio::test]
async fn submit_rejects_oversized_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/digest"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; MAX_RESPONSE_SIZE + 1]))
        .mount(&mock_server)
        .await;

    let result = calendar(&mock_server).submit(&[1u8; 32]).await;
    assert!(matches!(result, Err(ClientError::Network(_))));
}

#[tokio::test]
async fn submit_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/digest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(pending_proof(&mock_server.uri()))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let calendar = HttpCalendar::new(mock_server.uri(), Duration::from_millis(200)).unwrap();
    let result = calendar.submit(&[1u8; 32]).await;
    assert!(matches!(result, Err(ClientError::Timeout)));
}

// ── GET /timestamp/{commitment} ──────────────────────────────────────

#[tokio::test]
async fn get_timestamp_requests_hex_path() {
    let mock_server = MockServer::start().await;
    let commitment = [0x5au8; 32];

    Mock::given(method("GET"))
        .and(path(format!("/timestamp/{}", hex::encode(commitment))))
        .and(header("accept", OTS_MEDIA_TYPE))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(anchored_proof(&commitment, 42)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let timestamp = calendar(&mock_server).get_timestamp(&commitment).await.unwrap();
    assert_eq!(timestamp.msg(), commitment.to_vec());
    assert!(timestamp.is_complete());
}

#[tokio::test]
async fn get_timestamp_handles_404() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/timestamp/[0-9a-f]+$"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not found"))
        .mount(&mock_server)
        .await;

    let result = calendar(&mock_server).get_timestamp(&[1u8; 32]).await;
    assert!(matches!(result, Err(ClientError::BadStatus { status: 404, .. })));
}

#[tokio::test]
async fn trailing_slash_in_url_is_ignored() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/digest"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pending_proof(&mock_server.uri())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let calendar = HttpCalendar::new(format!("{}/", mock_server.uri()), Duration::from_secs(5)).unwrap();
    assert_eq!(calendar.url(), mock_server.uri());
    calendar.submit(&[2u8; 32]).await.unwrap();
}

// ── Full round trip through the client ───────────────────────────────

#[tokio::test]
async fn stamp_then_upgrade_over_http() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/digest"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pending_proof(&mock_server.uri())))
        .expect(1)
        .mount(&mock_server)
        .await;

    let http_calendar: Arc<dyn Calendar> = Arc::new(calendar(&mock_server));
    let client = OtsClient::new(&ClientConfig::default())
        .unwrap()
        .with_calendars(vec![http_calendar])
        .with_whitelist(UrlWhitelist::new([mock_server.uri()]).unwrap())
        .without_retry();

    let file = DetachedTimestampFile::from_stream(DigestAlg::Sha256, &b"over the wire"[..]).unwrap();
    assert_eq!(client.stamp(std::slice::from_ref(&file)).await.unwrap(), 1);

    let (commitment, attestation) = file.timestamp().all_attestations().next().unwrap();
    assert_eq!(
        attestation,
        Attestation::Pending {
            uri: mock_server.uri()
        }
    );

    Mock::given(method("GET"))
        .and(path(format!("/timestamp/{}", hex::encode(&commitment))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(anchored_proof(&commitment, 1000)))
        .expect(1)
        .mount(&mock_server)
        .await;

    assert!(client.upgrade(&file).await.unwrap());
    assert!(file.timestamp().is_complete());

    let parsed = DetachedTimestampFile::from_bytes(&file.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed, file);
}
