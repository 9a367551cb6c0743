//! In-memory collaborators shared by the checkout tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use encore_core::{Coupon, CoreError, CoreResult, CouponLookup, OrderReceipt, PaymentMethodKind, ReceiptDispatcher};
use encore_pricing::FinancingKey;
use rust_decimal::Decimal;
use serde_json::{json, Value};

use crate::client::{CheckoutGateway, GatewayError, GatewayResponse};

/// Gateway double that enforces idempotency keys the way the real gateway does:
/// a key that already produced a payment gets the same payment back.
#[derive(Default)]
pub struct FakeGateway {
    pub bins: HashMap<String, String>,
    pub financing: Value,
    pub payment_script: Mutex<VecDeque<Result<GatewayResponse, GatewayError>>>,
    pub status_script: Mutex<VecDeque<Result<GatewayResponse, GatewayError>>>,
    pub preference_reply: Mutex<Option<GatewayResponse>>,
    pub payments_by_key: Mutex<HashMap<String, GatewayResponse>>,
    pub payloads: Mutex<Vec<Value>>,
    pub keys: Mutex<Vec<String>>,
    pub status_checks: AtomicU32,
    pub bin_lookups: AtomicU32,
    /// Creates the payment but loses the answer on the way back.
    pub lose_next_reply: AtomicBool,
    next_id: AtomicU32,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    pub fn with_bin(mut self, bin: &str, method: &str) -> Self {
        self.bins.insert(bin.to_string(), method.to_string());
        self
    }

    pub fn with_financing(mut self, table: Value) -> Self {
        self.financing = table;
        self
    }

    pub fn script_payment(&self, reply: Result<GatewayResponse, GatewayError>) {
        self.payment_script.lock().unwrap().push_back(reply);
    }

    pub fn script_status(&self, reply: Result<GatewayResponse, GatewayError>) {
        self.status_script.lock().unwrap().push_back(reply);
    }

    pub fn distinct_payment_ids(&self) -> usize {
        let stored = self.payments_by_key.lock().unwrap();
        let mut ids: Vec<String> = stored.values().filter_map(|r| r.payment_id()).collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

pub fn payment(id: u32, status: &str, detail: &str) -> GatewayResponse {
    GatewayResponse::new(201, json!({ "id": id, "status": status, "status_detail": detail }))
}

#[async_trait]
impl CheckoutGateway for FakeGateway {
    async fn payment_method_for_bin(
        &self,
        bin: &str,
        _kind: PaymentMethodKind,
    ) -> Result<Option<String>, GatewayError> {
        self.bin_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.bins.get(bin).cloned())
    }

    async fn financing_table(&self, _amount: Decimal, _key: &FinancingKey) -> Result<Value, GatewayError> {
        Ok(self.financing.clone())
    }

    async fn create_payment(&self, payload: &Value, idempotency_key: &str) -> Result<GatewayResponse, GatewayError> {
        self.payloads.lock().unwrap().push(payload.clone());
        self.keys.lock().unwrap().push(idempotency_key.to_string());

        if let Some(previous) = self.payments_by_key.lock().unwrap().get(idempotency_key) {
            return Ok(previous.clone());
        }

        let scripted = self.payment_script.lock().unwrap().pop_front();
        let reply = match scripted {
            Some(reply) => reply?,
            None => payment(self.next_id.fetch_add(1, Ordering::SeqCst), "approved", "accredited"),
        };
        if reply.payment_id().is_some() {
            self.payments_by_key
                .lock()
                .unwrap()
                .insert(idempotency_key.to_string(), reply.clone());
        }
        if self.lose_next_reply.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset by peer".to_string()));
        }
        Ok(reply)
    }

    async fn create_preference(&self, _payload: &Value) -> Result<GatewayResponse, GatewayError> {
        Ok(self.preference_reply.lock().unwrap().clone().unwrap_or_else(|| {
            GatewayResponse::new(
                201,
                json!({ "id": "pref-1", "init_point": "https://www.mercadopago.com.br/checkout/v1/redirect?pref_id=pref-1" }),
            )
        }))
    }

    async fn payment_status(&self, payment_id: &str) -> Result<GatewayResponse, GatewayError> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        match self.status_script.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(GatewayResponse::new(200, json!({ "id": payment_id, "status": "pending" }))),
        }
    }
}

#[derive(Default)]
pub struct FixedCoupons(pub Vec<Coupon>);

#[async_trait]
impl CouponLookup for FixedCoupons {
    async fn lookup(&self, code: &str) -> CoreResult<Option<Coupon>> {
        Ok(self.0.iter().find(|c| c.matches_code(code)).cloned())
    }
}

#[derive(Default)]
pub struct RecordingReceipts {
    pub sent: Mutex<Vec<OrderReceipt>>,
    pub fail: bool,
}

#[async_trait]
impl ReceiptDispatcher for RecordingReceipts {
    async fn dispatch(&self, receipt: &OrderReceipt) -> CoreResult<()> {
        if self.fail {
            return Err(CoreError::CollaboratorError("mailer down".to_string()));
        }
        let mut sent = self.sent.lock().unwrap();
        if !sent.iter().any(|r| r.payment_id == receipt.payment_id) {
            sent.push(receipt.clone());
        }
        Ok(())
    }

    async fn is_dispatched(&self, payment_id: &str) -> CoreResult<bool> {
        Ok(self.sent.lock().unwrap().iter().any(|r| r.payment_id == payment_id))
    }
}
