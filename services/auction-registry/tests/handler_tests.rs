#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the auction registry handlers
//!
//! Requests carry a `ConnectInfo` extension so each test can choose the
//! caller address the coordinator sees.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use auction::{
    AuctionClient, AuctionDescriptor, AuctionRegistry, AuthorityError, CertificateAuthority,
    CredentialIssuer, ErrorCode, ErrorResponse, IssuerConfig, LocalAuthority, RegistryConfig,
    Serial, SigningRequest, archive,
};
use auction_registry::handlers::AppState;
use auction_registry::{ServiceConfig, build_state, create_router};
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use tower::ServiceExt;
use x509_parser::pem::parse_x509_pem;

/// Delegates to a real authority but fails the listed call numbers.
struct FlakyAuthority {
    inner: LocalAuthority,
    calls: AtomicUsize,
    fail_on: Vec<usize>,
}

#[async_trait]
impl CertificateAuthority for FlakyAuthority {
    async fn sign(
        &self,
        request: &SigningRequest,
        serial: &Serial,
    ) -> Result<String, AuthorityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&call) {
            return Err(AuthorityError::Unavailable(
                "signer at /secret/ca.key offline".to_string(),
            ));
        }
        self.inner.sign(request, serial).await
    }
}

fn test_state(fail_on: Vec<usize>, trust_forwarded_for: bool) -> Arc<AppState> {
    let inner = LocalAuthority::generate("Test Root", 30).unwrap();
    let root_certificate = inner.root_certificate_pem().to_string();
    let authority = FlakyAuthority {
        inner,
        calls: AtomicUsize::new(0),
        fail_on,
    };
    let issuer = CredentialIssuer::new(Arc::new(authority), IssuerConfig::default());

    Arc::new(AppState {
        registry: AuctionRegistry::new(issuer, RegistryConfig::default()),
        root_certificate,
        trust_forwarded_for,
    })
}

fn test_app() -> Router {
    create_router(test_state(Vec::new(), false))
}

fn request_from(method: &str, uri: &str, caller: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{}:40000", caller).parse().unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, headers, body)
}

async fn create(app: &Router, caller: &str) -> StatusCode {
    send(app, request_from("POST", "/api/auction", caller)).await.0
}

async fn register(app: &Router, caller: &str) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    send(app, request_from("POST", "/api/auction/register", caller)).await
}

async fn descriptor(app: &Router, caller: &str) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    send(app, request_from("GET", "/api/auction/descriptor", caller)).await
}

fn disposition(headers: &header::HeaderMap) -> &str {
    headers
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
}

fn error_body(body: &[u8]) -> ErrorResponse {
    serde_json::from_slice(body).unwrap()
}

// ==================== Health Check Tests ====================

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ==================== Create Tests ====================

#[tokio::test]
async fn test_create_auction() {
    let app = test_app();
    let (status, _, body) = send(&app, request_from("POST", "/api/auction", "10.0.0.1")).await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "success");
}

#[tokio::test]
async fn test_create_resets_membership() {
    let app = test_app();
    create(&app, "10.0.0.1").await;
    register(&app, "10.0.0.2").await;
    register(&app, "10.0.0.3").await;

    assert_eq!(create(&app, "10.0.0.4").await, StatusCode::OK);

    let (status, _, body) = descriptor(&app, "10.0.0.2").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_body(&body).code, ErrorCode::NotRegistered);

    let (status, headers, _) = register(&app, "10.0.0.2").await;
    assert_eq!(status, StatusCode::OK);
    assert!(disposition(&headers).contains("0.bundle"));
}

// ==================== Register Tests ====================

#[tokio::test]
async fn test_register_without_auction() {
    let app = test_app();
    let (status, _, body) = register(&app, "10.0.0.2").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let err = error_body(&body);
    assert_eq!(err.code, ErrorCode::NoActiveAuction);
    assert_eq!(err.error, "no active auction");
}

#[tokio::test]
async fn test_register_returns_bundle_attachment() {
    let app = test_app();
    create(&app, "10.0.0.1").await;

    let (status, headers, body) = register(&app, "10.0.0.2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );
    assert_eq!(disposition(&headers), "attachment; filename=\"0.bundle\"");

    let unpacked = archive::unpack(0, &body).unwrap();
    let (_, pem) = parse_x509_pem(unpacked.certificate_pem.as_bytes()).unwrap();
    let cert = pem.parse_x509().unwrap();
    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok());
    assert_eq!(cn, Some("10.0.0.2"));

    let (_, headers, _) = register(&app, "10.0.0.3").await;
    assert_eq!(disposition(&headers), "attachment; filename=\"1.bundle\"");
}

#[tokio::test]
async fn test_issuance_failure_is_opaque_and_rolled_back() {
    let app = create_router(test_state(vec![1], false));
    create(&app, "10.0.0.1").await;
    register(&app, "10.0.0.2").await;

    let (status, _, body) = register(&app, "10.0.0.3").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let err = error_body(&body);
    assert_eq!(err.code, ErrorCode::IssuanceFailed);
    assert!(!err.error.contains("secret"));
    assert!(!err.error.contains("offline"));

    let (status, headers, _) = register(&app, "10.0.0.3").await;
    assert_eq!(status, StatusCode::OK);
    assert!(disposition(&headers).contains("1.bundle"));

    let (_, _, body) = descriptor(&app, "10.0.0.1").await;
    let descriptor: AuctionDescriptor = serde_json::from_slice(&body).unwrap();
    assert_eq!(descriptor.hosts.len(), 3);
}

// ==================== Descriptor Tests ====================

#[tokio::test]
async fn test_descriptor_scenario() {
    let app = test_app();
    create(&app, "10.0.0.1").await;
    register(&app, "10.0.0.2").await;
    register(&app, "10.0.0.3").await;

    let (status, headers, body) = descriptor(&app, "10.0.0.3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(disposition(&headers), "attachment; filename=\"hosts.auc\"");

    let descriptor: AuctionDescriptor = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        descriptor,
        AuctionDescriptor {
            self_identifier: 1,
            seller: "10.0.0.1:9001".to_string(),
            hosts: vec![
                "10.0.0.1:9001".to_string(),
                "10.0.0.2:9002".to_string(),
                "10.0.0.3:9003".to_string(),
            ],
        }
    );
}

#[tokio::test]
async fn test_descriptor_without_auction() {
    let app = test_app();
    let (status, _, body) = descriptor(&app, "10.0.0.1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_body(&body).code, ErrorCode::NoActiveAuction);
}

#[tokio::test]
async fn test_descriptor_not_registered() {
    let app = test_app();
    create(&app, "10.0.0.1").await;

    let (status, _, body) = descriptor(&app, "10.0.0.9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let err = error_body(&body);
    assert_eq!(err.code, ErrorCode::NotRegistered);
    assert_eq!(err.error, "not registered");
}

// ==================== Caller Address Tests ====================

#[tokio::test]
async fn test_missing_peer_address_is_rejected() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/api/auction")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_body(&body).code, ErrorCode::BadRequest);
}

#[tokio::test]
async fn test_forwarded_for_used_when_trusted() {
    let app = create_router(test_state(Vec::new(), true));
    let mut request = request_from("POST", "/api/auction", "127.0.0.1");
    request
        .headers_mut()
        .insert("x-forwarded-for", "10.0.0.7, 10.0.0.1".parse().unwrap());
    assert_eq!(send(&app, request).await.0, StatusCode::OK);

    let mut request = request_from("GET", "/api/auction/descriptor", "127.0.0.1");
    request
        .headers_mut()
        .insert("x-forwarded-for", "10.0.0.7".parse().unwrap());
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let descriptor: AuctionDescriptor = serde_json::from_slice(&body).unwrap();
    assert_eq!(descriptor.seller, "10.0.0.7:9001");
}

#[tokio::test]
async fn test_forwarded_for_ignored_when_untrusted() {
    let app = test_app();
    let mut request = request_from("POST", "/api/auction", "10.0.0.1");
    request
        .headers_mut()
        .insert("x-forwarded-for", "10.0.0.7".parse().unwrap());
    send(&app, request).await;

    let (_, _, body) = descriptor(&app, "10.0.0.1").await;
    let descriptor: AuctionDescriptor = serde_json::from_slice(&body).unwrap();
    assert_eq!(descriptor.seller, "10.0.0.1:9001");
}

#[tokio::test]
async fn test_unresolvable_forwarded_for() {
    let app = create_router(test_state(Vec::new(), true));
    let mut request = request_from("POST", "/api/auction", "127.0.0.1");
    request
        .headers_mut()
        .insert("x-forwarded-for", "unknown".parse().unwrap());

    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ipv4_mapped_peer_is_canonicalized() {
    let app = test_app();
    create(&app, "[::ffff:10.0.0.1]").await;

    let (status, _, body) = descriptor(&app, "10.0.0.1").await;
    assert_eq!(status, StatusCode::OK);
    let descriptor: AuctionDescriptor = serde_json::from_slice(&body).unwrap();
    assert_eq!(descriptor.seller, "10.0.0.1:9001");
}

// ==================== Root Certificate Tests ====================

#[tokio::test]
async fn test_root_certificate_download() {
    let state = test_state(Vec::new(), false);
    let expected = state.root_certificate.clone();
    let app = create_router(state);

    let (status, headers, body) = send(&app, request_from("GET", "/api/auction/ca", "10.0.0.2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(disposition(&headers), "attachment; filename=\"ca.cert\"");
    assert_eq!(String::from_utf8(body).unwrap(), expected);
}

// ==================== Startup Tests ====================

#[test]
fn test_build_state_from_ca_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = auction::authority::generate_root("File Root", 30).unwrap();
    let cert_path = dir.path().join("ca.cert");
    let key_path = dir.path().join("ca.key");
    std::fs::write(&cert_path, &root.certificate_pem).unwrap();
    std::fs::write(&key_path, &root.key_pem).unwrap();

    let mut config = ServiceConfig::from_lookup(|_| None).unwrap();
    config.ca_cert_path = cert_path;
    config.ca_key_path = key_path.clone();

    let state = build_state(&config).unwrap();
    assert_eq!(state.root_certificate, root.certificate_pem);

    config.ca_key_path = dir.path().join("missing.key");
    assert!(build_state(&config).is_err());
}

// ==================== End-to-end Tests ====================

#[tokio::test]
async fn test_client_round_trip_over_tcp() {
    let state = test_state(Vec::new(), false);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = AuctionClient::new(&format!("http://{}", addr));
    client.health().await.unwrap();

    let err = client.register().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::NoActiveAuction));

    client.create().await.unwrap();
    let bundle = client.register().await.unwrap();
    assert_eq!(bundle.identifier, 0);
    assert_eq!(bundle.file_name, "0.bundle");
    assert!(bundle.unpack().unwrap().certificate_pem.contains("CERTIFICATE"));

    let descriptor = client.descriptor().await.unwrap();
    assert_eq!(descriptor.self_identifier, auction::SELLER_IDENTIFIER);
    assert_eq!(descriptor.hosts.len(), 2);

    let root = client.root_certificate().await.unwrap();
    assert!(root.contains("BEGIN CERTIFICATE"));
}
