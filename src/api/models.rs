use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::StoreError;
use crate::withdrawal_request::WithdrawalRequestError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success".to_string(),
            data,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub deposit_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WithdrawalRequested {
    pub status: String,
    pub tx_id: String,
}

/// Error returned by handlers, rendered in the error envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            status: "error".to_string(),
            error: ErrorBody {
                message: self.message,
                code: self.code.to_string(),
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        tracing::error!(error = %e, "Store error while serving request");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal error",
        )
    }
}

impl From<WithdrawalRequestError> for ApiError {
    fn from(e: WithdrawalRequestError) -> Self {
        match &e {
            WithdrawalRequestError::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "DEPOSIT_NOT_FOUND", e.to_string())
            }
            WithdrawalRequestError::InvalidState { .. } => ApiError::new(
                StatusCode::CONFLICT,
                "DEPOSIT_NOT_WITHDRAWABLE",
                e.to_string(),
            ),
            WithdrawalRequestError::AlreadyActive { .. } => ApiError::new(
                StatusCode::CONFLICT,
                "WITHDRAWAL_IN_PROGRESS",
                e.to_string(),
            ),
            WithdrawalRequestError::Chain(_) => {
                tracing::error!(error = %e, "Withdrawal request failed on chain");
                ApiError::new(StatusCode::BAD_GATEWAY, "CHAIN_ERROR", e.to_string())
            }
            WithdrawalRequestError::Store(store) => {
                tracing::error!(error = %store, "Withdrawal request failed in store");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error",
                )
            }
        }
    }
}
