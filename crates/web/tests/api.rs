//! HTTP API tests driven through the router

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine as _;
use peergate_common::{AddressPool, Database, Error, PoolConfig, TokenStore};
use peergate_web::applier::{ApplyAction, ApplyOutcome, RecordingApplier};
use peergate_web::{router, server, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const MASTER: &str = "master-secret-for-tests";
const SERVER_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";

struct TestApp {
    app: Router,
    tokens: TokenStore,
    applier: Arc<RecordingApplier>,
}

fn test_app(bits: u8) -> TestApp {
    let mut config = ServerConfig::default();
    config.auth.master_token = Some(MASTER.to_string());
    config.tunnel.server_public_key = SERVER_KEY.to_string();
    config.tunnel.endpoint_host = "vpn.example.net".to_string();

    let db = Database::open_memory().unwrap();
    let applier = Arc::new(RecordingApplier::new());
    let pool = PoolConfig::new("fd00:1", bits).unwrap();
    let state = server::build_state(&config, pool, db.clone(), applier.clone()).unwrap();

    TestApp {
        app: router(Arc::new(state)),
        tokens: TokenStore::new(db),
        applier,
    }
}

fn key(i: u8) -> String {
    let mut bytes = [0x5au8; 32];
    bytes[31] = i;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("authorization", auth);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(app: &Router, auth: &str, name: &str, public_key: &str) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        "/api/peers",
        Some(auth),
        Some(json!({ "name": name, "public_key": public_key })),
    )
    .await
}

#[tokio::test]
async fn healthz_needs_no_auth() {
    let t = test_app(4);
    let (status, body) = send(&t.app, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_with_master_is_idempotent() {
    let t = test_app(4);
    let master = bearer(MASTER);

    let (status, body) = create(&t.app, &master, "laptop", &key(1)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["address"], "fd00:1::1");
    assert_eq!(body["server_public_key"], SERVER_KEY);
    assert_eq!(body["endpoint"], "vpn.example.net:51820");
    assert_eq!(body["created"], true);
    assert_eq!(body["auth_method"], "master");
    let wg_conf = body["wg_conf"].as_str().unwrap();
    assert!(wg_conf.contains("Address = fd00:1::1/128"));

    let (status, again) = create(&t.app, &master, "laptop", &key(1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["address"], "fd00:1::1");
    assert_eq!(again["created"], false);
    assert_eq!(t.applier.count(ApplyAction::Add), 1);
}

#[tokio::test]
async fn enrollment_token_is_single_use() {
    let t = test_app(4);
    let issued = t.tokens.issue(600, "admin", Some("laptop")).unwrap();
    let auth = bearer(&issued.token);

    let (status, body) = create(&t.app, &auth, "laptop", &key(1)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["auth_method"], "enrollment");

    let (status, body) = create(&t.app, &auth, "phone", &key(2)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");
    assert_eq!(body["reason"], "invalid_or_expired");
}

#[tokio::test]
async fn invalid_body_does_not_spend_token() {
    let t = test_app(4);
    let issued = t.tokens.issue(600, "admin", None).unwrap();
    let auth = bearer(&issued.token);

    let (status, body) = create(&t.app, &auth, "root", &key(1)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");

    let zero_key = base64::engine::general_purpose::STANDARD.encode([0u8; 32]);
    let (status, _) = create(&t.app, &auth, "laptop", &zero_key).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/peers",
        Some(&auth),
        Some(json!({ "name": "laptop", "public_key": key(1), "admin": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = create(&t.app, &auth, "laptop", &key(1)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn pubkey_alias_is_accepted() {
    let t = test_app(4);
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/peers",
        Some(&bearer(MASTER)),
        Some(json!({ "name": "laptop", "pubkey": key(1) })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["public_key"], key(1));
}

#[tokio::test]
async fn missing_and_wrong_credentials() {
    let t = test_app(4);
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/peers",
        None,
        Some(json!({ "name": "laptop", "public_key": key(1) })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "missing");

    let (status, body) = create(&t.app, "Bearer not-a-token", "laptop", &key(1)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["reason"], "invalid_or_expired");
    assert!(t.applier.calls().is_empty());
}

#[tokio::test]
async fn lookups_require_master_and_keep_tokens() {
    let t = test_app(4);
    create(&t.app, &bearer(MASTER), "laptop", &key(1)).await;
    let issued = t.tokens.issue(600, "admin", None).unwrap();
    let auth = bearer(&issued.token);

    for (method, uri) in [
        ("GET", "/api/peers"),
        ("GET", "/api/peers/laptop"),
        ("DELETE", "/api/peers/laptop"),
    ] {
        let (status, body) = send(&t.app, method, uri, Some(&auth), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{} {}", method, uri);
        assert_eq!(body["reason"], "master_required");
    }

    // The token was never redeemed
    let (status, _) = create(&t.app, &auth, "phone", &key(2)).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn get_list_and_delete() {
    let t = test_app(4);
    let master = bearer(MASTER);
    create(&t.app, &master, "laptop", &key(1)).await;
    create(&t.app, &master, "phone", &key(2)).await;

    let (status, body) = send(&t.app, "GET", "/api/peers/phone", Some(&master), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "fd00:1::2");
    assert_eq!(body["pool_id"], 2);

    let (status, body) = send(&t.app, "GET", "/api/peers", Some(&master), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["peers"].as_array().unwrap().len(), 2);
    assert_eq!(body["pool"]["last_allocated_id"], 2);
    assert_eq!(body["pool"]["max_id"], 15);

    let (status, body) = send(&t.app, "DELETE", "/api/peers/laptop", Some(&master), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], "fd00:1::1");

    let (status, _) = send(&t.app, "GET", "/api/peers/laptop", Some(&master), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(&t.app, "DELETE", "/api/peers/laptop", Some(&master), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    // Deleted ids are not reused
    let (_, body) = create(&t.app, &master, "tablet", &key(3)).await;
    assert_eq!(body["address"], "fd00:1::3");
}

#[tokio::test]
async fn external_failure_reports_helper_output() {
    let t = test_app(4);
    let master = bearer(MASTER);
    t.applier
        .script_create(ApplyOutcome::failed(Some(3), "RTNETLINK answers: busy"));

    let (status, body) = create(&t.app, &master, "laptop", &key(1)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "external_failure");
    assert_eq!(body["exit_status"], 3);
    assert_eq!(body["output"], "RTNETLINK answers: busy");

    let (_, body) = send(&t.app, "GET", "/api/peers", Some(&master), None).await;
    assert!(body["peers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn failed_removal_keeps_peer_listed() {
    let t = test_app(4);
    let master = bearer(MASTER);
    create(&t.app, &master, "laptop", &key(1)).await;
    t.applier.script_delete(ApplyOutcome::failed(Some(1), "peer busy"));

    let (status, body) = send(&t.app, "DELETE", "/api/peers/laptop", Some(&master), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "external_failure");

    let (status, _) = send(&t.app, "GET", "/api/peers/laptop", Some(&master), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn exhausted_pool_is_conflict() {
    let t = test_app(1);
    let master = bearer(MASTER);
    let (status, body) = create(&t.app, &master, "one", &key(1)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["address"], "fd00:1::1");

    for name in ["two", "three"] {
        let (status, body) = create(&t.app, &master, name, &key(2)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "pool_exhausted");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redemptions_have_one_winner() {
    let t = test_app(8);
    let issued = t.tokens.issue(600, "admin", None).unwrap();
    let auth = bearer(&issued.token);

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let app = t.app.clone();
            let auth = auth.clone();
            tokio::spawn(async move {
                let name = format!("peer-{}", i);
                create(&app, &auth, &name, &key(i)).await.0
            })
        })
        .collect();

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::CREATED => created += 1,
            status => assert_eq!(status, StatusCode::UNAUTHORIZED),
        }
    }
    assert_eq!(created, 1);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let t = test_app(4);
    let (status, body) = send(&t.app, "GET", "/api/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[test]
fn test_startup_refuses_counter_past_narrowed_pool() {
    let db = Database::open_memory().unwrap();
    let wide = AddressPool::new(db.clone(), PoolConfig::new("fd00:1", 8).unwrap());
    for _ in 0..20 {
        wide.allocate().unwrap();
    }

    let applier = Arc::new(RecordingApplier::new());
    let config = ServerConfig::default();

    let narrow = PoolConfig::new("fd00:1", 4).unwrap();
    match server::build_state(&config, narrow, db.clone(), applier.clone()) {
        Err(Error::InvalidConfig(msg)) => assert!(msg.contains("widen pool.bits"), "{}", msg),
        Err(other) => panic!("expected InvalidConfig, got {:?}", other),
        Ok(_) => panic!("narrowed pool was accepted"),
    }

    // Same counter fits once the width covers it again
    let wide_again = PoolConfig::new("fd00:1", 8).unwrap();
    assert!(server::build_state(&config, wide_again, db, applier).is_ok());
}
