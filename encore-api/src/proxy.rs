use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use encore_core::payment::{GatewayRequest, GatewayTransport};
use encore_core::resolve_idempotency_key;
use encore_pricing::money::parse_positive_amount;
use encore_shared::Masked;
use serde_json::{json, Value};
use tracing::{info, instrument};

use crate::error::ProxyError;

/// Gateway answer relayed to the browser: same status, always JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyReply {
    pub status: u16,
    pub body: Value,
}

impl IntoResponse for ProxyReply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        (status, Json(self.body)).into_response()
    }
}

/// JSON as-is; anything else wrapped as `{"raw": text}`.
pub fn parse_or_raw(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw": text }))
}

/// Server-side relay to the payment gateway. Holds the secret credential
/// and forwards exactly four operations. Stateless; nothing is cached.
pub struct GatewayProxy {
    transport: Arc<dyn GatewayTransport>,
    credential: Option<Masked<String>>,
}

impl GatewayProxy {
    pub fn new(transport: Arc<dyn GatewayTransport>, credential: Option<String>) -> Self {
        let credential = credential
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .map(Masked::new);
        Self { transport, credential }
    }

    pub fn is_configured(&self) -> bool {
        self.credential.is_some()
    }

    #[instrument(skip(self, raw_body))]
    pub async fn create_payment(&self, raw_body: String, supplied_key: Option<&str>) -> Result<ProxyReply, ProxyError> {
        let credential = self.credential()?;
        let key = resolve_idempotency_key(supplied_key);
        self.forward(credential, GatewayRequest::create_payment(raw_body, key)).await
    }

    #[instrument(skip(self, raw_body))]
    pub async fn create_preference(&self, raw_body: String) -> Result<ProxyReply, ProxyError> {
        let credential = self.credential()?;
        self.forward(credential, GatewayRequest::create_preference(raw_body)).await
    }

    #[instrument(skip(self))]
    pub async fn list_installments(
        &self,
        amount: Option<&str>,
        payment_method_id: Option<&str>,
    ) -> Result<ProxyReply, ProxyError> {
        let credential = self.credential()?;

        let amount = present(amount).ok_or_else(|| ProxyError::Validation("amount is required".to_string()))?;
        if parse_positive_amount(amount).is_none() {
            return Err(ProxyError::Validation("amount must be a positive number".to_string()));
        }
        let method = present(payment_method_id)
            .ok_or_else(|| ProxyError::Validation("payment_method_id is required".to_string()))?;

        self.forward(credential, GatewayRequest::list_installments(amount, method)).await
    }

    #[instrument(skip(self))]
    pub async fn payment_status(&self, payment_id: &str) -> Result<ProxyReply, ProxyError> {
        let credential = self.credential()?;

        let payment_id =
            present(Some(payment_id)).ok_or_else(|| ProxyError::Validation("payment id is required".to_string()))?;
        if !payment_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ProxyError::Validation("payment id is invalid".to_string()));
        }

        self.forward(credential, GatewayRequest::payment_status(payment_id)).await
    }

    fn credential(&self) -> Result<&Masked<String>, ProxyError> {
        self.credential.as_ref().ok_or_else(ProxyError::missing_credential)
    }

    async fn forward(&self, credential: &Masked<String>, request: GatewayRequest) -> Result<ProxyReply, ProxyError> {
        let operation = request.operation;
        let reply = self
            .transport
            .send(credential, request)
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;

        info!("Gateway answered {:?} with {}", operation, reply.status);
        Ok(ProxyReply {
            status: reply.status,
            body: parse_or_raw(&reply.body),
        })
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
