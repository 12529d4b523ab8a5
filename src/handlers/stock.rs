use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{handlers::Caller, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct StockAdjustmentRequest {
    /// Signed delta; positive restocks, negative corrects downwards
    pub delta: i32,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockAdjustmentResponse {
    pub product_id: i64,
    pub stock_quantity: i32,
}

/// POST /products/:id/stock-adjustments
pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    caller: Caller,
    Json(payload): Json<StockAdjustmentRequest>,
) -> ApiResult<StockAdjustmentResponse> {
    let stock_quantity = state
        .services
        .stock
        .adjust(
            product_id,
            payload.delta,
            payload.reason.as_deref(),
            caller.actor().as_deref(),
        )
        .await?;
    Ok(Json(ApiResponse::success(StockAdjustmentResponse {
        product_id,
        stock_quantity,
    })))
}
