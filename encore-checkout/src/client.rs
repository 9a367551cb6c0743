use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use encore_core::idempotency::IDEMPOTENCY_HEADER;
use encore_core::{PaymentMethodKind, PaymentStatus};
use encore_pricing::money::decimal_from_json;
use encore_pricing::{FinancingKey, FinancingSource};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway unreachable: {0}")]
    Transport(String),
    #[error("gateway answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("gateway response unreadable: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// A proxy answer: mirrored HTTP status plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub body: Value,
}

impl GatewayResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Gateway ids are numbers; some payloads send them as strings.
    pub fn payment_id(&self) -> Option<String> {
        match self.body.get("id")? {
            Value::Number(id) => Some(id.to_string()),
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            _ => None,
        }
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.body
            .get("status")
            .and_then(Value::as_str)
            .map(PaymentStatus::parse)
            .unwrap_or(PaymentStatus::Unknown)
    }

    pub fn status_detail(&self) -> Option<String> {
        self.body
            .get("status_detail")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// `transaction_details.total_paid_amount`, if reported.
    pub fn total_paid(&self) -> Option<Decimal> {
        self.body
            .pointer("/transaction_details/total_paid_amount")
            .and_then(decimal_from_json)
    }

    pub fn installments(&self) -> Option<u32> {
        self.body
            .get("installments")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    }

    /// Cart line ids the checkout wrote into `metadata.items`.
    pub fn paid_item_ids(&self) -> Option<Vec<String>> {
        let items = self.body.pointer("/metadata/items")?.as_array()?;
        items
            .iter()
            .map(|id| id.as_str().map(str::to_string))
            .collect()
    }

    pub fn external_reference(&self) -> Option<String> {
        self.string_at("/external_reference")
    }

    /// PIX copy-and-paste code.
    pub fn qr_code(&self) -> Option<String> {
        self.string_at("/point_of_interaction/transaction_data/qr_code")
    }

    pub fn qr_code_base64(&self) -> Option<String> {
        self.string_at("/point_of_interaction/transaction_data/qr_code_base64")
    }

    /// Hosted checkout URL of a preference.
    pub fn init_point(&self) -> Option<String> {
        self.string_at("/init_point")
    }

    pub fn preference_id(&self) -> Option<String> {
        self.string_at("/id")
    }

    fn string_at(&self, pointer: &str) -> Option<String> {
        self.body
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Best human-readable reason carried by an error body.
    pub fn error_message(&self) -> Option<String> {
        ["message", "error", "raw"]
            .iter()
            .find_map(|field| self.body.get(*field).and_then(Value::as_str))
            .map(str::to_string)
    }
}

/// Everything checkout needs from the payment side: the public BIN/financing
/// lookups and the four proxy operations.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Method id (e.g. `visa`) for a six-digit BIN, `None` when unknown.
    async fn payment_method_for_bin(
        &self,
        bin: &str,
        kind: PaymentMethodKind,
    ) -> Result<Option<String>, GatewayError>;

    async fn financing_table(&self, amount: Decimal, key: &FinancingKey) -> Result<Value, GatewayError>;

    async fn create_payment(&self, payload: &Value, idempotency_key: &str) -> Result<GatewayResponse, GatewayError>;

    async fn create_preference(&self, payload: &Value) -> Result<GatewayResponse, GatewayError>;

    async fn payment_status(&self, payment_id: &str) -> Result<GatewayResponse, GatewayError>;
}

/// Lets the installment engine read financing tables through a checkout gateway.
pub struct GatewayFinancing(pub Arc<dyn CheckoutGateway>);

#[async_trait]
impl FinancingSource for GatewayFinancing {
    async fn financing_table(
        &self,
        amount: Decimal,
        key: &FinancingKey,
    ) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.0.financing_table(amount, key).await?)
    }
}

/// HTTP implementation: public lookups go straight to the gateway with the
/// publishable key, payment operations go through our proxy.
#[derive(Clone)]
pub struct HttpCheckoutGateway {
    client: reqwest::Client,
    proxy_url: String,
    gateway_url: String,
    public_key: String,
}

impl HttpCheckoutGateway {
    pub fn new(proxy_url: &str, gateway_url: &str, public_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            proxy_url: proxy_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            public_key: public_key.to_string(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, GatewayError> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::Status { status, body: text });
        }
        serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn read_proxy(response: reqwest::Response) -> Result<GatewayResponse, GatewayError> {
        let status = response.status().as_u16();
        let text = response.text().await?;
        // The proxy always answers JSON; anything else is kept readable.
        let body = serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "raw": text }));
        Ok(GatewayResponse::new(status, body))
    }
}

#[async_trait]
impl CheckoutGateway for HttpCheckoutGateway {
    #[instrument(skip(self))]
    async fn payment_method_for_bin(
        &self,
        bin: &str,
        kind: PaymentMethodKind,
    ) -> Result<Option<String>, GatewayError> {
        let url = format!("{}/v1/payment_methods/search", self.gateway_url);
        let body = self
            .get_json(&url, &[("public_key", self.public_key.clone()), ("bins", bin.to_string())])
            .await?;

        let results = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let wanted = kind.gateway_payment_type();
        let chosen = results
            .iter()
            .find(|r| wanted.is_some() && r.get("payment_type_id").and_then(Value::as_str) == wanted)
            .or_else(|| results.first());

        let method = chosen
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!("BIN lookup resolved to {:?}", method);
        Ok(method)
    }

    #[instrument(skip(self))]
    async fn financing_table(&self, amount: Decimal, key: &FinancingKey) -> Result<Value, GatewayError> {
        match key {
            FinancingKey::Bin(bin) => {
                let url = format!("{}/v1/payment_methods/installments", self.gateway_url);
                self.get_json(
                    &url,
                    &[
                        ("public_key", self.public_key.clone()),
                        ("amount", amount.to_string()),
                        ("bin", bin.clone()),
                    ],
                )
                .await
            }
            FinancingKey::PaymentMethod(id) => {
                let url = format!("{}/installments", self.proxy_url);
                self.get_json(&url, &[("amount", amount.to_string()), ("payment_method_id", id.clone())])
                    .await
            }
        }
    }

    #[instrument(skip(self, payload))]
    async fn create_payment(&self, payload: &Value, idempotency_key: &str) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/payments", self.proxy_url))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload)
            .send()
            .await?;
        Self::read_proxy(response).await
    }

    #[instrument(skip(self, payload))]
    async fn create_preference(&self, payload: &Value) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .post(format!("{}/preferences", self.proxy_url))
            .json(payload)
            .send()
            .await?;
        Self::read_proxy(response).await
    }

    #[instrument(skip(self))]
    async fn payment_status(&self, payment_id: &str) -> Result<GatewayResponse, GatewayError> {
        let response = self
            .client
            .get(format!("{}/payments/{}", self.proxy_url, payment_id))
            .send()
            .await?;
        Self::read_proxy(response).await
    }
}
