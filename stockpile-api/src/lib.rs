use axum::{
    routing::get,
    Extension,
    Json,
    Router,
    http::Method,
};
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod middleware;
pub mod products;
pub mod state;

pub use state::AppState;
use middleware::{request_id_middleware, RequestId};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    Router::new()
        .route("/", get(root))
        .merge(products::routes())
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn root(Extension(request_id): Extension<RequestId>) -> Json<Value> {
    Json(json!({
        "message": "Stockpile API Server",
        "request_id": request_id.0,
    }))
}
