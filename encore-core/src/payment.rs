use async_trait::async_trait;
use encore_shared::Masked;
use serde::{Deserialize, Serialize};

/// The four calls the server side is allowed to make against the gateway.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOperation {
    CreatePayment,
    CreatePreference,
    ListInstallments,
    GetPaymentStatus,
}

impl GatewayOperation {
    pub fn is_write(self) -> bool {
        matches!(self, Self::CreatePayment | Self::CreatePreference)
    }
}

/// An outbound gateway call, already validated by the proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub operation: GatewayOperation,
    /// Path relative to the gateway base URL.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub idempotency_key: Option<String>,
    /// Raw JSON text, forwarded verbatim.
    pub body: Option<String>,
}

impl GatewayRequest {
    pub fn create_payment(body: String, idempotency_key: String) -> Self {
        Self {
            operation: GatewayOperation::CreatePayment,
            path: "/v1/payments".to_string(),
            query: Vec::new(),
            idempotency_key: Some(idempotency_key),
            body: Some(body),
        }
    }

    pub fn create_preference(body: String) -> Self {
        Self {
            operation: GatewayOperation::CreatePreference,
            path: "/checkout/preferences".to_string(),
            query: Vec::new(),
            idempotency_key: None,
            body: Some(body),
        }
    }

    pub fn list_installments(amount: &str, payment_method_id: &str) -> Self {
        Self {
            operation: GatewayOperation::ListInstallments,
            path: "/v1/payment_methods/installments".to_string(),
            query: vec![
                ("amount".to_string(), amount.to_string()),
                ("payment_method_id".to_string(), payment_method_id.to_string()),
            ],
            idempotency_key: None,
            body: None,
        }
    }

    pub fn payment_status(payment_id: &str) -> Self {
        Self {
            operation: GatewayOperation::GetPaymentStatus,
            path: format!("/v1/payments/{}", payment_id),
            query: Vec::new(),
            idempotency_key: None,
            body: None,
        }
    }
}

/// Whatever the gateway answered, untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("gateway timed out: {0}")]
    Timeout(String),
    #[error("gateway connection failed: {0}")]
    Connection(String),
    #[error("gateway request failed: {0}")]
    Other(String),
}

/// Sends requests to the payment gateway with the server-held credential.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn send(
        &self,
        credential: &Masked<String>,
        request: GatewayRequest,
    ) -> Result<GatewayReply, TransportError>;
}
