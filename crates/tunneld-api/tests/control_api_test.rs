//! Integration tests for the control API

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt; // For `oneshot` method

use tunneld_api::{ApiServer, ApiServerConfig};
use tunneld_cert::CertificateProvider;
use tunneld_registry::{
    PortPair, RegistrySettings, RelayEngine, RelayError, RelayHandle, RelayOptions, TunnelRegistry,
};
use tunneld_relay::TcpRelayEngine;

/// Relay engine that records ports without binding anything
struct NoopRelayEngine;

struct NoopRelayHandle {
    ports: PortPair,
}

impl RelayHandle for NoopRelayHandle {
    fn internet_port(&self) -> u16 {
        self.ports.internet_port
    }
    fn relay_port(&self) -> u16 {
        self.ports.relay_port
    }
    fn end(&self) {}
}

#[async_trait]
impl RelayEngine for NoopRelayEngine {
    async fn construct(
        &self,
        ports: PortPair,
        _opts: RelayOptions,
    ) -> Result<Box<dyn RelayHandle>, RelayError> {
        Ok(Box::new(NoopRelayHandle { ports }))
    }
}

fn test_registry(
    min_port: u16,
    max_port: u16,
    engine: Arc<dyn RelayEngine>,
) -> Arc<TunnelRegistry> {
    Arc::new(TunnelRegistry::new(
        RegistrySettings {
            min_port,
            max_port,
            max_age_secs: 3600,
        },
        engine,
    ))
}

fn test_router(registry: Arc<TunnelRegistry>, token: &str) -> Router {
    let config = ApiServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        domain: "tunnel.test".to_string(),
        server_token: token.to_string(),
        landing_page: "https://tunnel.test/docs".to_string(),
        enable_cors: false,
    };
    let server = ApiServer::new(
        config,
        registry,
        CertificateProvider::self_signed("/nonexistent"),
    );
    server.build_router()
}

async fn post_json(
    app: Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .uri(path)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn get_json(app: Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_create_with_invalid_token_is_rejected() {
    let registry = test_registry(43000, 43050, Arc::new(NoopRelayEngine));
    let app = test_router(registry.clone(), "T");

    let (status, body) = post_json(
        app,
        "/create",
        json!({"internetPort": 0, "relayPort": 0, "serverToken": "not-T"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("Invalid serverToken"));
    assert_eq!(registry.count().await, 0);
}

#[tokio::test]
async fn test_end_to_end_create_and_delete() {
    // Real relay engine: ports are actually bound for the tunnel's lifetime.
    let registry = test_registry(43100, 43180, Arc::new(TcpRelayEngine::new()));
    let app = test_router(registry, "T");

    let (status, body) = post_json(
        app.clone(),
        "/create",
        json!({"internetPort": 0, "relayPort": 0, "serverToken": "T"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let internet_port = body["internetPort"].as_u64().unwrap();
    let relay_port = body["relayPort"].as_u64().unwrap();
    assert!((1024..=65535).contains(&internet_port));
    assert!((1024..=65535).contains(&relay_port));
    assert_ne!(internet_port, relay_port);

    let secret = body["secret"].as_str().unwrap().to_string();
    assert!(secret.len() >= 40);
    assert_eq!(body["expiresIn"], json!(3600));
    assert_eq!(body["uri"], json!(format!("tunnel.test:{internet_port}")));

    // First delete succeeds, second finds nothing.
    let delete_body = json!({
        "internetPort": internet_port,
        "secret": secret,
        "serverToken": "T"
    });
    let (status, body) = post_json(app.clone(), "/delete", delete_body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let (status, body) = post_json(app, "/delete", delete_body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_status_counts_tunnels() {
    let registry = test_registry(43200, 43280, Arc::new(NoopRelayEngine));
    let app = test_router(registry, "T");

    let mut secrets = Vec::new();
    for _ in 0..3 {
        let (status, body) = post_json(
            app.clone(),
            "/create",
            json!({"serverToken": "T"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        secrets.push((
            body["internetPort"].as_u64().unwrap(),
            body["secret"].as_str().unwrap().to_string(),
        ));
    }

    let (port, secret) = secrets.pop().unwrap();
    let (status, body) = post_json(
        app.clone(),
        "/delete",
        json!({"internetPort": port, "secret": secret, "serverToken": "T"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let (status, body) = get_json(app, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tunnels"], json!(2));
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_tunnel_status_endpoint() {
    let registry = test_registry(43300, 43380, Arc::new(NoopRelayEngine));
    let app = test_router(registry, "T");

    let (_, created) = post_json(app.clone(), "/create", json!({"serverToken": "T"})).await;
    let internet_port = created["internetPort"].as_u64().unwrap();

    let (status, body) = get_json(app.clone(), &format!("/status/{internet_port}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["internetPort"], created["internetPort"]);
    assert_eq!(body["relayPort"], created["relayPort"]);
    assert_eq!(body["createdAt"], created["createdAt"]);

    // Unknown port is a 400, matching the protocol clients expect.
    let (status, body) = get_json(app, "/status/64000").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], json!("Tunnel not found"));
}

#[tokio::test]
async fn test_delete_with_wrong_secret_leaves_tunnel() {
    let registry = test_registry(43400, 43480, Arc::new(NoopRelayEngine));
    let app = test_router(registry.clone(), "T");

    let (_, created) = post_json(app.clone(), "/create", json!({"serverToken": "T"})).await;
    let internet_port = created["internetPort"].as_u64().unwrap();

    let (status, body) = post_json(
        app.clone(),
        "/delete",
        json!({
            "internetPort": internet_port,
            "secret": "0000000000000000000000000000000000000000",
            "serverToken": "T"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(false));
    assert_eq!(registry.count().await, 1);

    // Still live and reporting status.
    let (status, _) = get_json(app, &format!("/status/{internet_port}")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_landing_redirect() {
    let registry = test_registry(43500, 43520, Arc::new(NoopRelayEngine));
    let app = test_router(registry, "T");

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "https://tunnel.test/docs"
    );
}

#[tokio::test]
async fn test_ssl_request_without_materials_fails_generically() {
    let registry = test_registry(43600, 43680, Arc::new(NoopRelayEngine));
    let app = test_router(registry.clone(), "T");

    // The self-signed directory does not exist, so the materials lookup
    // fails; the client only sees the generic creation failure.
    let (status, body) = post_json(
        app,
        "/create",
        json!({"serverToken": "T", "ssl": true}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], json!("Tunnel creation failed"));
    assert_eq!(registry.count().await, 0);
}
