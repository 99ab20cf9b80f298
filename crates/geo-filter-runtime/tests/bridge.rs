//! Privileged bridge integration tests: the HTTP backend against a mock API,
//! and the bridge running as a child process over stdio.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use geo_filter::{AuthorId, CountryCode};
use geo_filter_runtime::bridge::{LookupBackend, PrivilegedBridge};
use geo_filter_runtime::cache::{Resolution, ResolutionCache};
use geo_filter_runtime::config::ApiConfig;
use geo_filter_runtime::transport::{duplex, BridgeProcess};
use geo_filter_runtime::types::{LookupError, LookupRequest};

#[cfg(feature = "http")]
use geo_filter_runtime::bridge::HttpLookup;

// ─────────────────────── helpers ───────────────────────

const QUERY_ID: &str = "testQueryId";
const ENDPOINT: &str = "/i/api/graphql/testQueryId/AboutAccountQuery";

fn api(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        query_id: QUERY_ID.to_string(),
        bearer_token: Some("test-bearer".to_string()),
        csrf_token: Some("test-csrf".to_string()),
    }
}

fn about_account(location: Option<&str>) -> serde_json::Value {
    let about = match location {
        Some(text) => json!({ "account_based_in": text }),
        None => json!({}),
    };
    json!({
        "data": { "user_result_by_screen_name": { "result": { "about_profile": about } } }
    })
}

// ─────────────────────── HTTP backend ───────────────────────

#[cfg(feature = "http")]
#[tokio::test]
async fn test_http_lookup_sends_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("variables", r#"{"screenName":"ada"}"#))
        .and(header("authorization", "Bearer test-bearer"))
        .and(header("x-csrf-token", "test-csrf"))
        .and(header("x-twitter-auth-type", "OAuth2Session"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(about_account(Some("Lagos, Nigeria"))),
        )
        .expect(1)
        .mount(&server)
        .await;

    let lookup = HttpLookup::new(api(&server), Duration::from_secs(5)).unwrap();
    let location = lookup.account_location(&AuthorId::new("ada")).await.unwrap();
    assert_eq!(location, "Lagos, Nigeria");
}

#[cfg(feature = "http")]
#[tokio::test]
async fn test_http_lookup_maps_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("variables", r#"{"screenName":"locked"}"#))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("variables", r#"{"screenName":"gone"}"#))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "user_result_by_screen_name": {} } })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("variables", r#"{"screenName":"quiet"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(about_account(None)))
        .mount(&server)
        .await;

    let lookup = HttpLookup::new(api(&server), Duration::from_secs(5)).unwrap();
    assert_eq!(
        lookup.account_location(&AuthorId::new("locked")).await,
        Err(LookupError::Http(401))
    );
    assert_eq!(
        lookup.account_location(&AuthorId::new("gone")).await,
        Err(LookupError::UserNotFound)
    );
    assert_eq!(
        lookup.account_location(&AuthorId::new("quiet")).await.unwrap(),
        ""
    );
}

#[cfg(feature = "http")]
#[tokio::test]
async fn test_http_failure_reaches_cache_as_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let lookup = HttpLookup::new(api(&server), Duration::from_secs(5)).unwrap();
    let bridge = PrivilegedBridge::new(Arc::new(lookup));

    let response = bridge
        .handle(&LookupRequest {
            request_id: 5,
            author_id: AuthorId::new("ada"),
        })
        .await;
    assert_eq!(response.request_id, 5);
    assert!(!response.success);
    assert_eq!(response.error_message.as_deref(), Some("HTTP 401"));

    let (consumer, privileged) = duplex();
    bridge.spawn(privileged);
    let (cache, _receiver) = ResolutionCache::connect(consumer, Duration::from_secs(5));
    assert_eq!(
        cache.resolve_detailed(&AuthorId::new("ada")).await,
        Resolution::Failed("HTTP 401".to_string())
    );
    assert!(cache.is_idle());
}

// ─────────────────────── child process ───────────────────────

#[tokio::test]
async fn test_bridge_child_process_round_trip() {
    let mut table = tempfile::NamedTempFile::new().unwrap();
    write!(table, r#"{{"ada": "Lagos, Nigeria", "hans": "Hamburg, Germany"}}"#).unwrap();

    let args = vec![
        "--log-level".to_string(),
        "warn".to_string(),
        "bridge".to_string(),
        "--lookup-table".to_string(),
        table.path().display().to_string(),
    ];
    let (process, endpoint) =
        BridgeProcess::spawn(Path::new(env!("CARGO_BIN_EXE_geo-filter")), &args).unwrap();
    let (cache, _receiver) = ResolutionCache::connect(endpoint, Duration::from_secs(10));

    let (ada_id, hans_id, ghost_id) = (
        AuthorId::new("ada"),
        AuthorId::new("hans"),
        AuthorId::new("ghost"),
    );
    let (ada, hans, ghost) = tokio::join!(
        cache.resolve(&ada_id),
        cache.resolve(&hans_id),
        cache.resolve_detailed(&ghost_id),
    );
    assert_eq!(ada.unwrap().country_code, CountryCode::parse("NG"));
    assert_eq!(hans.unwrap().country_code, CountryCode::parse("DE"));
    assert_eq!(ghost, Resolution::Failed("User not found".to_string()));
    assert_eq!(cache.stats().requests_sent, 3);

    process.shutdown().await.unwrap();
}
