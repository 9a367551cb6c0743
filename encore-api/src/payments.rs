use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use encore_core::idempotency::IDEMPOTENCY_HEADER;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProxyError;
use crate::proxy::ProxyReply;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InstallmentParams {
    amount: Option<String>,
    payment_method_id: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment))
        .route("/payments/{payment_id}", get(payment_status))
        .route("/preferences", post(create_preference))
        .route("/installments", get(list_installments))
        .route("/health", get(health))
}

async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<ProxyReply, ProxyError> {
    let supplied_key = headers.get(IDEMPOTENCY_HEADER).and_then(|v| v.to_str().ok());
    state.proxy.create_payment(body, supplied_key).await
}

async fn create_preference(State(state): State<AppState>, body: String) -> Result<ProxyReply, ProxyError> {
    state.proxy.create_preference(body).await
}

async fn list_installments(
    State(state): State<AppState>,
    Query(params): Query<InstallmentParams>,
) -> Result<ProxyReply, ProxyError> {
    state
        .proxy
        .list_installments(params.amount.as_deref(), params.payment_method_id.as_deref())
        .await
}

async fn payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<ProxyReply, ProxyError> {
    state.proxy.payment_status(&payment_id).await
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "gateway_configured": state.proxy.is_configured(),
    }))
}
