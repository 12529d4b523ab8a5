use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    handlers::Caller,
    services::payment_condition::{
        ChangeConditionRequest, FinancialSnapshot, RegisterPaymentRequest,
    },
    ApiResponse, ApiResult, AppState,
};

/// PUT /orders/:id/payment-condition
pub async fn change_payment_condition(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    caller: Caller,
    Json(payload): Json<ChangeConditionRequest>,
) -> ApiResult<FinancialSnapshot> {
    let response = state
        .services
        .payment_conditions
        .change_condition(order_id, payload, caller.actor().as_deref())
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// POST /orders/:id/payments
pub async fn register_payment(
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    caller: Caller,
    Json(payload): Json<RegisterPaymentRequest>,
) -> ApiResult<FinancialSnapshot> {
    let response = state
        .services
        .payment_conditions
        .register_payment(order_id, payload, caller.actor().as_deref())
        .await?;
    Ok(Json(ApiResponse::success(response)))
}
