use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use stockpile_core::Product;

use crate::error::{AppError, INVALID_STOCK_CHANGE};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProcessParams {
    pub stock_change: Option<String>,
}

impl ProcessParams {
    fn stock_change(&self) -> Result<i64, AppError> {
        self.stock_change
            .as_deref()
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or_else(|| AppError::ValidationError(INVALID_STOCK_CHANGE.to_string()))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products/process", post(process_new_product))
        .route("/products/{id}", get(get_product))
        .route("/products/{id}/process", post(process_product))
}

/// GET /products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Product>, AppError> {
    let product = state.stock.get_product(&id).await?;
    Ok(Json(product))
}

/// POST /products/{id}/process?stock_change=N
pub async fn process_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    params: Result<Query<ProcessParams>, QueryRejection>,
) -> Result<Json<Product>, AppError> {
    let Query(params) = params?;
    let delta = params.stock_change()?;
    let product = process_detached(&state, Some(id), delta).await?;
    Ok(Json(product))
}

/// POST /products/process?stock_change=N
/// Creates a product under a generated id.
pub async fn process_new_product(
    State(state): State<AppState>,
    params: Result<Query<ProcessParams>, QueryRejection>,
) -> Result<Json<Product>, AppError> {
    let Query(params) = params?;
    let delta = params.stock_change()?;
    let product = process_detached(&state, None, delta).await?;
    Ok(Json(product))
}

// Runs on its own task so a client disconnect cannot drop a transaction
// halfway; it always reaches commit or rollback.
async fn process_detached(
    state: &AppState,
    id: Option<String>,
    delta: i64,
) -> Result<Product, AppError> {
    let stock = state.stock.clone();
    let product = tokio::spawn(async move { stock.process_stock(id.as_deref(), delta).await })
        .await
        .map_err(|e| AppError::InternalServerError(format!("stock task failed: {}", e)))??;
    Ok(product)
}
