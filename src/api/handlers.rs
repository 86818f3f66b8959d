use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::models::{ApiError, ApiResponse, WithdrawalRequest, WithdrawalRequested};
use crate::api::routes::AppState;
use crate::db::{Deposit, WithdrawalWithDeposit};

fn validate_eth_address(address: &str) -> Result<(), ApiError> {
    let hex = address.strip_prefix("0x").unwrap_or("");
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_ADDRESS",
            format!("{address} is not an Ethereum address"),
        ));
    }
    Ok(())
}

pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn handle_get_deposits(
    State(state): State<Arc<AppState>>,
    Path(eth_address): Path<String>,
) -> Result<Json<ApiResponse<Vec<Deposit>>>, ApiError> {
    validate_eth_address(&eth_address)?;
    let deposits = state.store.list_deposits_by_user(&eth_address).await?;
    Ok(ApiResponse::success(deposits))
}

pub async fn handle_get_withdrawals(
    State(state): State<Arc<AppState>>,
    Path(eth_address): Path<String>,
) -> Result<Json<ApiResponse<Vec<WithdrawalWithDeposit>>>, ApiError> {
    validate_eth_address(&eth_address)?;
    let withdrawals = state.store.list_withdrawals_by_user(&eth_address).await?;
    Ok(ApiResponse::success(withdrawals))
}

pub async fn handle_withdrawal_post(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WithdrawalRequest>,
) -> Result<Json<ApiResponse<WithdrawalRequested>>, ApiError> {
    let tx_id = state.requester.request_withdrawal(payload.deposit_id).await?;
    Ok(ApiResponse::success(WithdrawalRequested {
        status: "withdrawal_requested".to_string(),
        tx_id,
    }))
}
