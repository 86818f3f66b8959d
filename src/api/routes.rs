use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{
    handle_get_deposits, handle_get_withdrawals, handle_health, handle_withdrawal_post,
};
use crate::db::StateStore;
use crate::withdrawal_request::WithdrawalRequester;

pub struct AppState {
    pub store: Arc<dyn StateStore>,
    pub requester: Arc<WithdrawalRequester>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/deposits/{eth_address}", get(handle_get_deposits))
        .route("/withdrawals", post(handle_withdrawal_post))
        .route("/withdrawals/{eth_address}", get(handle_get_withdrawals))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
