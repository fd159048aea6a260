#![allow(clippy::unwrap_used)]
// Integration tests for `DeviceClient` against a wiremock LOM320.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use heatlink_api::{
    Access, Algorithm, ClientConfig, DeviceClient, DigestParams, ErrorKind, RetryPolicy,
    WriteMode, compute_response,
};

const VALUES: &str = "/cgi-bin/json_values.cgi";
const REALM: &str = "lom320";

// ── Helpers ─────────────────────────────────────────────────────────

fn config(server: &MockServer) -> ClientConfig {
    let mut config = ClientConfig::new(
        Url::parse(&server.uri()).unwrap(),
        "admin",
        SecretString::from("secret"),
    );
    config.retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: Duration::ZERO,
    };
    config.transport.timeout = Duration::from_secs(2);
    config
}

async fn setup() -> (MockServer, DeviceClient) {
    let server = MockServer::start().await;
    let client = DeviceClient::new(config(&server)).unwrap();
    (server, client)
}

fn challenge(nonce: &str, stale: bool) -> ResponseTemplate {
    let mut header = format!(r#"Digest realm="{REALM}", qop="auth", nonce="{nonce}", opaque="op""#);
    if stale {
        header.push_str(", stale=true");
    }
    ResponseTemplate::new(401).insert_header("WWW-Authenticate", header.as_str())
}

/// Echo back one record per requested id.
fn echo_ids(request: &Request) -> ResponseTemplate {
    let ids = request
        .url
        .query_pairs()
        .find(|(k, _)| k == "ids")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default();
    let body: Vec<_> = ids
        .split(';')
        .map(|id| json!({ "id": id, "name": format!("Reg.{id}"), "value": "1.5" }))
        .collect();
    ResponseTemplate::new(200).set_body_json(body)
}

fn digest_fields(header: &str) -> HashMap<String, String> {
    header
        .trim_start_matches("Digest ")
        .split(", ")
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_owned(), v.trim_matches('"').to_owned()))
        .collect()
}

/// Matches a request whose `Authorization` header is a valid digest for
/// `admin`/`secret` over this exact method and URI with the given nonce.
struct ValidDigest {
    nonce: &'static str,
}

impl Match for ValidDigest {
    fn matches(&self, request: &Request) -> bool {
        let Some(header) = request
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let fields = digest_fields(header);
        let uri = match request.url.query() {
            Some(q) => format!("{}?{q}", request.url.path()),
            None => request.url.path().to_owned(),
        };
        let get = |key: &str| fields.get(key).map(String::as_str).unwrap_or_default();
        let Ok(nc) = u32::from_str_radix(get("nc"), 16) else {
            return false;
        };

        let expected = compute_response(&DigestParams {
            algorithm: Algorithm::Md5,
            username: "admin",
            password: "secret",
            realm: REALM,
            nonce: self.nonce,
            method: request.method.as_str(),
            uri: &uri,
            qop: Some("auth"),
            nc,
            cnonce: get("cnonce"),
        });
        get("nonce") == self.nonce && get("uri") == uri && get("response") == expected
    }
}

async fn mount_digest_device(server: &MockServer) {
    Mock::given(path(VALUES))
        .and(ValidDigest { nonce: "n1" })
        .respond_with(echo_ids)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(challenge("n1", false))
        .with_priority(5)
        .mount(server)
        .await;
}

// ── Digest authentication ───────────────────────────────────────────

#[tokio::test]
async fn test_digest_challenge_then_success() {
    let (server, client) = setup().await;
    mount_digest_device(&server).await;

    let records = client.read_values(&[253, 254, 255]).await.unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["253", "254", "255"]);
    assert_eq!(records[0].name, "Reg.253");
    assert_eq!(records[0].value, "1.5");

    let session = client.session_snapshot().await.unwrap();
    assert_eq!(session.realm, REALM);
    assert_eq!(session.nc, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_session_is_reused_with_increasing_nc() {
    let (server, client) = setup().await;
    mount_digest_device(&server).await;

    client.read_values(&[253]).await.unwrap();
    client.read_values(&[254]).await.unwrap();
    client.read_values(&[255]).await.unwrap();

    // One challenge, then three signed requests.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    let counts: Vec<String> = requests
        .iter()
        .filter_map(|r| r.headers.get("authorization"))
        .map(|h| digest_fields(h.to_str().unwrap())["nc"].clone())
        .collect();
    assert_eq!(counts, vec!["00000001", "00000002", "00000003"]);
}

#[tokio::test]
async fn test_rejected_credentials_are_not_retried() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(challenge("n1", false))
        .expect(2)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.status(), Some(401));
    assert!(client.session_snapshot().await.is_none());
}

#[tokio::test]
async fn test_stale_nonce_renegotiates_once() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .and(ValidDigest { nonce: "n2" })
        .respond_with(echo_ids)
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .and(ValidDigest { nonce: "n1" })
        .respond_with(challenge("n2", true))
        .with_priority(2)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(challenge("n1", false))
        .with_priority(5)
        .expect(1)
        .mount(&server)
        .await;

    let records = client.read_values(&[253]).await.unwrap();

    assert_eq!(records.len(), 1);
    let session = client.session_snapshot().await.unwrap();
    assert_eq!(session.nonce, "n2");
    assert_eq!(session.nc, 1);
}

#[tokio::test]
async fn test_repeated_stale_nonce_gives_up() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .and(header_exists("authorization"))
        .respond_with(challenge("n2", true))
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(challenge("n1", false))
        .with_priority(5)
        .expect(1)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_unsupported_scheme_is_auth_error() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="lom""#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_basic_fallback_when_allowed() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.allow_basic_fallback = true;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(path(VALUES))
        .and(wiremock::matchers::header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(echo_ids)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="lom""#),
        )
        .with_priority(5)
        .mount(&server)
        .await;

    assert_eq!(client.read_values(&[253]).await.unwrap().len(), 1);
}

// ── Chunking ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_chunked_read_issues_ceil_n_over_c_requests() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.chunk_size = 4;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(method("GET"))
        .and(path(VALUES))
        .respond_with(echo_ids)
        .expect(3)
        .mount(&server)
        .await;

    let ids: Vec<u32> = (100..110).collect();
    let records = client.read_values(&ids).await.unwrap();

    let returned: Vec<u32> = records.iter().filter_map(|r| r.numeric_id()).collect();
    let unique: HashSet<u32> = returned.iter().copied().collect();
    assert_eq!(returned.len(), unique.len());
    assert_eq!(returned, ids);

    let queries: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.query().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(
        queries,
        vec!["ids=100;101;102;103", "ids=104;105;106;107", "ids=108;109"]
    );
}

#[tokio::test]
async fn test_unrequested_and_duplicate_records_are_dropped() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": "253", "name": "a", "value": "1" },
            { "id": "253", "name": "a", "value": "2" },
            { "id": "999", "name": "b", "value": "3" },
        ])))
        .mount(&server)
        .await;

    let records = client.read_values(&[253, 254]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].value, "1");
}

#[tokio::test]
async fn test_failed_chunk_does_not_abort_others() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.chunk_size = 1;
    config.retry.max_retries = 0;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(path(VALUES))
        .and(query_param("ids", "1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .and(query_param("ids", "2"))
        .respond_with(echo_ids)
        .mount(&server)
        .await;

    let records = client.read_values(&[1, 2]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "2");

    let err = client.read_values(&[1]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_empty_id_list_makes_no_request() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(echo_ids)
        .expect(0)
        .mount(&server)
        .await;

    assert!(client.read_values(&[]).await.unwrap().is_empty());
}

// ── Retry policy ────────────────────────────────────────────────────

#[tokio::test]
async fn test_timeouts_exhaust_max_retries_plus_one_attempts() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.transport.timeout = Duration::from_millis(100);
    let client = DeviceClient::new(config).unwrap();

    Mock::given(path(VALUES))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "id": "253", "value": "1" }]))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_server_errors_are_retried_then_surface_as_connection_error() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.body(), Some("busy"));
}

#[tokio::test]
async fn test_not_found_is_retried() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(404))
        .expect(3)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_no_content_is_retried() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(echo_ids)
        .with_priority(5)
        .mount(&server)
        .await;

    assert_eq!(client.read_values(&[253]).await.unwrap().len(), 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

// ── Redirects and parsing ───────────────────────────────────────────

#[tokio::test]
async fn test_redirect_recomputes_digest_for_new_uri() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .and(ValidDigest { nonce: "n1" })
        .respond_with(
            ResponseTemplate::new(307).insert_header("Location", "/lom/json_values.cgi?ids=253"),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(challenge("n1", false))
        .with_priority(5)
        .mount(&server)
        .await;
    Mock::given(path("/lom/json_values.cgi"))
        .and(ValidDigest { nonce: "n1" })
        .respond_with(echo_ids)
        .expect(1)
        .mount(&server)
        .await;

    let records = client.read_values(&[253]).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(client.session_snapshot().await.unwrap().nc, 2);
}

#[tokio::test]
async fn test_cross_origin_redirect_is_refused_without_credentials() {
    let server = MockServer::start().await;
    let foreign = MockServer::start().await;
    let mut config = config(&server);
    config.allow_basic_fallback = true;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(path(VALUES))
        .and(wiremock::matchers::header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/collect", foreign.uri()).as_str()),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(path(VALUES))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="lom""#),
        )
        .with_priority(5)
        .mount(&server)
        .await;
    Mock::given(wiremock::matchers::any())
        .respond_with(echo_ids)
        .expect(0)
        .mount(&foreign)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert_eq!(err.status(), Some(302));
    assert!(!err.is_transient());
    assert!(foreign.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_array_is_repaired() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html")
                .set_body_string(r#"{"id":"1","value":"2"},{"id":"2","value":"3"}"#),
        )
        .mount(&server)
        .await;

    let records = client.read_values(&[1, 2]).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].value, "3");
    assert_eq!(records[1].name, "entity_2");
}

#[tokio::test]
async fn test_unparseable_body_is_parse_error_without_retry() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<!DOCTYPE html><html><head><title>Service Error</title></head></html>",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.message().contains("Service Error"));
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_write_refused_when_disabled() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client.write_value(5, "21", Access::ReadWrite).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteAccess);
}

#[tokio::test]
async fn test_write_refused_for_read_only_entity() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.write_access = true;
    let client = DeviceClient::new(config).unwrap();
    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client.write_value(253, "21", Access::Read).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteAccess);
}

#[tokio::test]
async fn test_write_via_query() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.write_access = true;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(method("GET"))
        .and(path(VALUES))
        .and(query_param("itemno", "383"))
        .and(query_param("itemval", "21.5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.write_value(383, "21.5", Access::ReadWrite).await.unwrap());
}

#[tokio::test]
async fn test_write_via_json_body_reports_rejection() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.write_access = true;
    config.write_mode = WriteMode::JsonBody;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(method("POST"))
        .and(path(VALUES))
        .and(wiremock::matchers::body_json(json!({ "id": 383, "value": "99" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(!client.write_value(383, "99", Access::ReadWrite).await.unwrap());
}

#[tokio::test]
async fn test_write_forbidden_is_write_access_error() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.write_access = true;
    let client = DeviceClient::new(config).unwrap();

    Mock::given(path(VALUES))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.write_value(383, "20", Access::ReadWrite).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WriteAccess);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_test_reads_supply_temperature() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .and(query_param("ids", "253"))
        .respond_with(echo_ids)
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.test_connection().await.unwrap());
}

#[tokio::test]
async fn test_shutdown_cancels_further_reads() {
    let (server, client) = setup().await;
    Mock::given(path(VALUES))
        .respond_with(echo_ids)
        .expect(0)
        .mount(&server)
        .await;

    client.shutdown().await;

    let err = client.read_values(&[253]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(client.is_shut_down());
}

#[tokio::test]
async fn test_update_credentials_drops_session() {
    let (server, client) = setup().await;
    mount_digest_device(&server).await;

    client.read_values(&[253]).await.unwrap();
    assert!(client.session_snapshot().await.is_some());

    client
        .update_credentials("admin", SecretString::from("secret"))
        .await;
    assert!(client.session_snapshot().await.is_none());
}
