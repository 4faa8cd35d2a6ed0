use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use stockpile_api::{app, middleware::REQUEST_ID_HEADER, AppState};
use stockpile_core::{
    InMemoryProductStore, Product, ProductDefaults, StockEngine, StockResult, StockService,
};
use tower::ServiceExt;

fn test_app() -> Router {
    let engine = StockEngine::new(InMemoryProductStore::new(), ProductDefaults::default());
    app(AppState::new(Arc::new(engine)))
}

async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Option<String>, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, request_id, body)
}

#[tokio::test]
async fn test_root_echoes_request_id() {
    let app = test_app();
    let (status, header, body) = send(&app, "GET", "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Stockpile API Server");
    let header = header.expect("missing request id header");
    assert_eq!(body["request_id"], header.as_str());
    assert!(uuid::Uuid::parse_str(&header).is_ok());
}

#[tokio::test]
async fn test_request_ids_are_unique() {
    let app = test_app();
    let (_, first, _) = send(&app, "GET", "/").await;
    let (_, second, _) = send(&app, "GET", "/").await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_process_creates_then_updates() {
    let app = test_app();

    let (status, _, body) = send(&app, "POST", "/products/sku-1/process?stock_change=50").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "sku-1");
    assert_eq!(body["stock"], 50);
    assert_eq!(body["version"], 1);
    assert_eq!(body["name"], "New Product");
    assert!(body["created_at"].is_string());

    let (status, _, body) = send(&app, "POST", "/products/sku-1/process?stock_change=-60").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], -10);
    assert_eq!(body["version"], 2);

    let (status, _, body) = send(&app, "GET", "/products/sku-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], -10);
    assert_eq!(body["version"], 2);
}

#[tokio::test]
async fn test_process_without_id_generates_one() {
    let app = test_app();
    let (status, _, body) = send(&app, "POST", "/products/process?stock_change=5").await;

    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&id).is_ok());

    let (status, _, body) = send(&app, "GET", &format!("/products/{}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], 5);
}

#[tokio::test]
async fn test_invalid_stock_change_is_bad_request() {
    let app = test_app();

    for uri in [
        "/products/sku-1/process",
        "/products/sku-1/process?stock_change=",
        "/products/sku-1/process?stock_change=ten",
        "/products/process?stock_change=1.5",
        "/products/sku-1/process?stock_change=%205",
        "/products/sku-1/process?stock_change=5%20",
        "/products/sku-1/process?stock_change=1&stock_change=2",
        "/products/process?stock_change=1&stock_change=2",
    ] {
        let (status, header, body) = send(&app, "POST", uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["error"], "Invalid stock_change parameter");
        assert!(header.is_some());
    }

    let (status, _, _) = send(&app, "GET", "/products/sku-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let app = test_app();
    let (status, _, body) = send(&app, "GET", "/products/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Product not found");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_do_not_lose_updates() {
    let app = test_app();

    let handles: Vec<_> = (0..30)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                send(&app, "POST", "/products/shared/process?stock_change=10").await
            })
        })
        .collect();

    for handle in handles {
        let (status, _, _) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    let (_, _, body) = send(&app, "GET", "/products/shared").await;
    assert_eq!(body["stock"], 300);
    assert_eq!(body["version"], 30);
}

/// Service whose handlers panic, or finish slowly after the client is gone.
struct ScriptedService {
    inner: StockEngine<InMemoryProductStore>,
    delay: Duration,
    finished: AtomicBool,
}

#[async_trait]
impl StockService for ScriptedService {
    async fn process_stock(&self, id: Option<&str>, delta: i64) -> StockResult<Product> {
        if delta == i64::MIN {
            panic!("process_stock blew up");
        }
        tokio::time::sleep(self.delay).await;
        let product = self.inner.process_stock(id, delta).await;
        self.finished.store(true, Ordering::SeqCst);
        product
    }

    async fn get_product(&self, id: &str) -> StockResult<Product> {
        if id == "boom" {
            panic!("get_product blew up");
        }
        self.inner.get_product(id).await
    }
}

fn scripted(delay: Duration) -> Arc<ScriptedService> {
    Arc::new(ScriptedService {
        inner: StockEngine::new(InMemoryProductStore::new(), ProductDefaults::default()),
        delay,
        finished: AtomicBool::new(false),
    })
}

#[tokio::test]
async fn test_panicking_handler_is_internal_error() {
    let app = app(AppState::new(scripted(Duration::ZERO)));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/products/boom")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());

    let uri = format!("/products/sku-1/process?stock_change={}", i64::MIN);
    let (status, header, body) = send(&app, "POST", &uri).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal Server Error");
    assert!(header.is_some());

    // The server keeps answering afterwards.
    let (status, _, _) = send(&app, "POST", "/products/sku-1/process?stock_change=1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_dropped_request_still_completes_transaction() {
    let service = scripted(Duration::from_millis(100));
    let app = app(AppState::new(service.clone()));

    let request = send(&app, "POST", "/products/sku-1/process?stock_change=7");
    assert!(tokio::time::timeout(Duration::from_millis(20), request).await.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(service.finished.load(Ordering::SeqCst));

    let (status, _, body) = send(&app, "GET", "/products/sku-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stock"], 7);
}
