use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::{
    entities::order::OrderStatus,
    handlers::Caller,
    services::orders::{
        CheckoutRequest, CheckoutResponse, OrderListResponse, OrderResponse,
        UpdateOrderStatusRequest,
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

/// POST /orders/checkout
pub async fn checkout(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), crate::errors::ServiceError> {
    let response = state
        .services
        .orders
        .create_order(payload, caller.actor().as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

/// GET /orders
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> ApiResult<OrderListResponse> {
    let response = state
        .services
        .orders
        .list_orders(query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// GET /orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
) -> ApiResult<OrderResponse> {
    let response = state.services.orders.get_order(order_id).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// GET /orders/by-number/:order_number
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> ApiResult<OrderResponse> {
    let response = state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// PUT /orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    caller: Caller,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> ApiResult<OrderResponse> {
    let response = state
        .services
        .orders
        .update_order_status(order_id, payload.status, caller.actor().as_deref())
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// POST /orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    caller: Caller,
) -> ApiResult<OrderResponse> {
    let response = state
        .services
        .orders
        .update_order_status(order_id, OrderStatus::Canceled, caller.actor().as_deref())
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// DELETE /orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    caller: Caller,
) -> ApiResult<()> {
    state
        .services
        .orders
        .delete_order(order_id, caller.actor().as_deref())
        .await?;
    Ok(Json(ApiResponse::success(())))
}
