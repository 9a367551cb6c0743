use std::time::Duration;

use async_trait::async_trait;
use encore_core::idempotency::IDEMPOTENCY_HEADER;
use encore_core::payment::{GatewayReply, GatewayRequest, GatewayTransport, TransportError};
use encore_shared::Masked;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument};

/// reqwest-backed transport to the payment gateway's REST API
#[derive(Clone)]
pub struct HttpGatewayTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGatewayTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayTransport {
    #[instrument(skip(self, credential, request), fields(operation = ?request.operation, path = %request.path))]
    async fn send(
        &self,
        credential: &Masked<String>,
        request: GatewayRequest,
    ) -> Result<GatewayReply, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = match request.body {
            Some(body) => self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .body(body),
            None => self.client.get(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(key) = &request.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }

        let response = builder
            .bearer_auth(credential.expose())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        debug!("Gateway answered {} ({} bytes)", status, body.len());

        Ok(GatewayReply { status, body })
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}
