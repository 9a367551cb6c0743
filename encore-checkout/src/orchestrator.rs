use std::sync::Arc;

use chrono::{DateTime, Utc};
use encore_core::{
    resolve_idempotency_key, Address, AddressBook, CartStore, Coupon, CouponLookup, InstallmentOption,
    OrderReceipt, PaymentAttempt, PaymentInfo, PaymentMethodKind, PaymentStatus, ReceiptDispatcher,
};
use encore_pricing::money::{format_brl, round_currency};
use encore_pricing::{compute_totals, Totals};
use encore_shared::Masked;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::card::CardPipeline;
use crate::client::{CheckoutGateway, GatewayResponse};
use crate::hints::status_hint;
use crate::pix::{PixOutcome, PixWatch};
use crate::session::{CheckoutSession, CheckoutStep};
use crate::{CheckoutError, CheckoutOutcome, CheckoutSettings};

/// Collaborators a checkout talks to.
#[derive(Clone)]
pub struct CheckoutDeps {
    pub gateway: Arc<dyn CheckoutGateway>,
    pub cart: Arc<dyn CartStore>,
    pub coupons: Arc<dyn CouponLookup>,
    pub receipts: Arc<dyn ReceiptDispatcher>,
}

/// Tokenized card submission.
#[derive(Debug, Clone)]
pub struct CardPayment {
    pub token: Masked<String>,
    pub payment_method_id: String,
    pub issuer_id: Option<String>,
    pub payer_email: String,
    /// Total of the installment option the shopper saw when confirming.
    pub expected_total: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixCharge {
    pub payment_id: String,
    pub qr_code: String,
    pub qr_code_base64: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixSubmission {
    /// QR code issued; call `await_pix` for the result.
    AwaitingPayment(PixCharge),
    /// The gateway decided right away.
    Settled(CheckoutOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostedRedirect {
    pub preference_id: String,
    pub init_point: String,
}

struct PendingPix {
    watch: PixWatch,
    coupon: Option<Coupon>,
    submitted_at: DateTime<Utc>,
}

/// Drives one shopper through address, payment and outcome.
pub struct CheckoutOrchestrator {
    deps: CheckoutDeps,
    settings: CheckoutSettings,
    session: CheckoutSession,
    /// Submitted but not yet answered by the gateway.
    open_attempt: Option<PaymentAttempt>,
    last_attempt: Option<PaymentAttempt>,
    pix: Option<PendingPix>,
    cart_cleared: bool,
}

impl CheckoutOrchestrator {
    /// Snapshots the cart and opens a session at the address step.
    pub async fn start(
        deps: CheckoutDeps,
        settings: CheckoutSettings,
        coupon_code: Option<String>,
    ) -> Result<Self, CheckoutError> {
        let items = deps.cart.items().await?;
        if items.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let session = CheckoutSession::new(items, coupon_code);
        info!("Checkout {} started with {} items", session.id, session.cart_snapshot.len());

        Ok(Self {
            deps,
            settings,
            session,
            open_attempt: None,
            last_attempt: None,
            pix: None,
            cart_cleared: false,
        })
    }

    pub fn session(&self) -> &CheckoutSession {
        &self.session
    }

    pub fn last_attempt(&self) -> Option<&PaymentAttempt> {
        self.last_attempt.as_ref()
    }

    /// BIN detection and installment lookups for the card form.
    pub fn card_pipeline(&self) -> CardPipeline {
        CardPipeline::new(self.deps.gateway.clone(), self.settings.detect_debit_bins)
    }

    pub fn commit_address(&mut self, address: Address) -> Result<(), CheckoutError> {
        self.session.commit_address(address)
    }

    pub async fn commit_selected_address(&mut self, book: &dyn AddressBook) -> Result<(), CheckoutError> {
        let address = book.selected_address().await?.ok_or(CheckoutError::NoAddress)?;
        self.session.commit_address(address)
    }

    pub fn choose_method(&mut self, method: PaymentMethodKind) -> Result<(), CheckoutError> {
        self.session.choose_method(method)
    }

    pub fn choose_installments(&mut self, installments: u32) -> Result<(), CheckoutError> {
        self.session.choose_installments(installments)
    }

    pub fn back_to_address(&mut self) -> Result<(), CheckoutError> {
        self.stop_pix();
        self.session.back_to_address()
    }

    /// Leaves the QR view. Polling stops; a new submission issues a new charge.
    pub fn back_to_payment(&mut self) -> Result<(), CheckoutError> {
        self.session.leave_pix()?;
        self.stop_pix();
        Ok(())
    }

    /// Back to method selection after a failure, keeping address and items.
    pub fn retry(&mut self) -> Result<(), CheckoutError> {
        self.stop_pix();
        self.session.retry()
    }

    /// Lets a UI task stop PIX polling while another task awaits it.
    pub fn pix_abort_handle(&self) -> Option<tokio::task::AbortHandle> {
        self.pix.as_ref().and_then(|p| p.watch.abort_handle())
    }

    /// Totals before payment, with the coupon re-validated.
    pub async fn current_totals(&self) -> Result<Totals, CheckoutError> {
        let coupon = self.lookup_coupon().await?;
        Ok(compute_totals(&self.session.cart_snapshot, coupon.as_ref(), None, Utc::now())?)
    }

    #[instrument(skip(self, card), fields(checkout = %self.session.id))]
    pub async fn submit_card(&mut self, card: CardPayment) -> Result<CheckoutOutcome, CheckoutError> {
        self.require_method(PaymentMethodKind::is_card)?;
        let method = self.session.begin_processing()?;

        let result = self.charge_card(method, &card).await;
        if result.is_err() {
            self.session.abort_processing();
        }
        result
    }

    #[instrument(skip(self, payer_email), fields(checkout = %self.session.id))]
    pub async fn submit_pix(&mut self, payer_email: &str) -> Result<PixSubmission, CheckoutError> {
        self.require_method(|m| m == PaymentMethodKind::Pix)?;
        self.session.begin_processing()?;

        let result = self.charge_pix(payer_email).await;
        if result.is_err() {
            self.session.abort_processing();
        }
        result
    }

    /// Waits for the running PIX poll. Dropping this future stops polling.
    pub async fn await_pix(&mut self) -> Result<CheckoutOutcome, CheckoutError> {
        let Some(mut pending) = self.pix.take() else {
            return Err(CheckoutError::NoPendingPix);
        };
        let payment_id = pending.watch.payment_id().to_string();

        match pending.watch.outcome().await {
            None => {
                self.session.leave_pix()?;
                Err(CheckoutError::Cancelled)
            }
            Some(PixOutcome::Approved(response)) => {
                let payment = PaymentInfo {
                    method: PaymentMethodKind::Pix,
                    installments: None,
                    total_paid: response.total_paid(),
                };
                self.complete(payment_id, payment, pending.coupon.as_ref(), pending.submitted_at)
                    .await
            }
            Some(PixOutcome::Failed(response)) => {
                self.fail(Some(payment_id), response.payment_status(), response.status_detail())
            }
            Some(PixOutcome::Expired { checks }) => {
                self.session.settle(CheckoutStep::Failed)?;
                warn!("PIX payment {} expired unpaid", payment_id);
                Ok(CheckoutOutcome::Expired { payment_id, checks })
            }
        }
    }

    /// Creates a hosted checkout preference. The session ends here; the
    /// result comes back through the redirect landing.
    #[instrument(skip(self, payer_email), fields(checkout = %self.session.id))]
    pub async fn start_hosted(&mut self, payer_email: Option<&str>) -> Result<HostedRedirect, CheckoutError> {
        self.require_method(|m| m == PaymentMethodKind::Other)?;
        self.session.begin_processing()?;

        match self.create_preference(payer_email).await {
            Ok(redirect) => {
                self.session.settle(CheckoutStep::Redirected)?;
                info!("Redirecting to hosted checkout {}", redirect.preference_id);
                Ok(redirect)
            }
            Err(e) => {
                self.session.abort_processing();
                Err(e)
            }
        }
    }

    async fn charge_card(&mut self, method: PaymentMethodKind, card: &CardPayment) -> Result<CheckoutOutcome, CheckoutError> {
        let now = Utc::now();
        let coupon = self.lookup_coupon().await?;
        let totals = compute_totals(&self.session.cart_snapshot, coupon.as_ref(), None, now)?;
        let installments = match method {
            PaymentMethodKind::Credit => self.session.installments.unwrap_or(1),
            _ => 1,
        };
        let key = self.attempt_key(method, totals.final_total, Some(installments));

        let mut payload = self.base_payload(&totals, &card.payer_email);
        payload["token"] = json!(card.token.expose());
        payload["installments"] = json!(installments);
        payload["payment_method_id"] = json!(card.payment_method_id);
        if let Some(issuer) = card.issuer_id.as_deref() {
            payload["issuer_id"] = issuer.parse::<u64>().map(Value::from).unwrap_or_else(|_| json!(issuer));
        }

        let response = self.send_payment(&payload, &key).await?;

        if let (Some(expected), Some(paid)) = (card.expected_total, response.total_paid()) {
            if (expected - paid).abs() > InstallmentOption::INTEREST_TOLERANCE {
                warn!(
                    "Gateway charged {} but the chosen option totals {}",
                    format_brl(paid),
                    format_brl(expected)
                );
            }
        }

        let payment = PaymentInfo {
            method,
            installments: Some(installments),
            total_paid: response.total_paid(),
        };
        self.settle_response(response, payment, coupon.as_ref(), now).await
    }

    async fn charge_pix(&mut self, payer_email: &str) -> Result<PixSubmission, CheckoutError> {
        let now = Utc::now();
        let coupon = self.lookup_coupon().await?;
        let totals = compute_totals(&self.session.cart_snapshot, coupon.as_ref(), None, now)?;
        let key = self.attempt_key(PaymentMethodKind::Pix, totals.final_total, None);

        let mut payload = self.base_payload(&totals, payer_email);
        payload["payment_method_id"] = json!("pix");

        let response = self.send_payment(&payload, &key).await?;
        let status = response.payment_status();
        if !response.is_success() || status.is_approved() || status.is_failure() {
            let payment = PaymentInfo {
                method: PaymentMethodKind::Pix,
                installments: None,
                total_paid: response.total_paid(),
            };
            let outcome = self.settle_response(response, payment, coupon.as_ref(), now).await?;
            return Ok(PixSubmission::Settled(outcome));
        }

        let payment_id = response
            .payment_id()
            .ok_or_else(|| CheckoutError::UnexpectedResponse("PIX charge without id".to_string()))?;
        let qr_code = response
            .qr_code()
            .ok_or_else(|| CheckoutError::UnexpectedResponse(format!("PIX charge {} without QR code", payment_id)))?;

        self.session.await_pix()?;
        let watch = PixWatch::spawn(self.deps.gateway.clone(), payment_id.clone(), self.settings.pix());
        self.pix = Some(PendingPix {
            watch,
            coupon,
            submitted_at: now,
        });
        info!("PIX charge {} issued for {}", payment_id, format_brl(totals.final_total));

        Ok(PixSubmission::AwaitingPayment(PixCharge {
            payment_id,
            qr_code,
            qr_code_base64: response.qr_code_base64(),
            amount: totals.final_total,
        }))
    }

    async fn create_preference(&self, payer_email: Option<&str>) -> Result<HostedRedirect, CheckoutError> {
        let totals = self.current_totals().await?;
        let items: Vec<Value> = match &totals.coupon {
            // One line at the discounted price so the page charges what we showed.
            Some(summary) => vec![json!({
                "id": self.session.id.to_string(),
                "title": format!(
                    "Encore: {} verso(s) (cupom {})",
                    self.session.cart_snapshot.len(),
                    summary.code.as_deref().unwrap_or("-")
                ),
                "quantity": 1,
                "currency_id": "BRL",
                "unit_price": amount_json(totals.final_total),
            })],
            None => self
                .session
                .cart_snapshot
                .iter()
                .map(|item| {
                    json!({
                        "id": item.id,
                        "title": item.title,
                        "description": item.artist,
                        "category_id": item.category,
                        "picture_url": item.image,
                        "quantity": item.quantity,
                        "currency_id": "BRL",
                        "unit_price": amount_json(item.price),
                    })
                })
                .collect(),
        };

        let mut payload = json!({
            "items": items,
            "back_urls": self.settings.back_urls,
            "auto_return": "approved",
            "external_reference": self.session.id.to_string(),
            "metadata": self.order_metadata(&totals),
        });
        if let Some(email) = payer_email {
            payload["payer"] = json!({ "email": email });
        }

        let response = self.deps.gateway.create_preference(&payload).await?;
        if !response.is_success() {
            let message = response
                .error_message()
                .unwrap_or_else(|| format!("status {}", response.status));
            return Err(if response.is_server_error() {
                CheckoutError::Transport(message)
            } else {
                CheckoutError::UnexpectedResponse(message)
            });
        }

        let init_point = response
            .init_point()
            .ok_or_else(|| CheckoutError::UnexpectedResponse("preference without init_point".to_string()))?;
        Ok(HostedRedirect {
            preference_id: response.preference_id().unwrap_or_default(),
            init_point,
        })
    }

    /// Reuses the open attempt's key when the same charge is resubmitted
    /// after a transport failure, so the gateway can deduplicate it.
    fn attempt_key(&mut self, method: PaymentMethodKind, amount: Decimal, installments: Option<u32>) -> String {
        if let Some(open) = &self.open_attempt {
            if open.method == method && open.amount == amount && open.installments == installments {
                debug!("Resubmitting attempt {}", open.idempotency_key);
                return open.idempotency_key.clone();
            }
        }

        let attempt = PaymentAttempt::new(resolve_idempotency_key(None), method, amount, installments);
        let key = attempt.idempotency_key.clone();
        self.open_attempt = Some(attempt);
        key
    }

    async fn send_payment(&mut self, payload: &Value, key: &str) -> Result<GatewayResponse, CheckoutError> {
        let response = match self.deps.gateway.create_payment(payload, key).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Payment submission {} did not complete: {}", key, e);
                return Err(e.into());
            }
        };
        if response.is_server_error() {
            warn!("Gateway answered {} for submission {}", response.status, key);
            return Err(CheckoutError::Transport(
                response
                    .error_message()
                    .unwrap_or_else(|| format!("gateway answered {}", response.status)),
            ));
        }

        // A verdict closes the attempt; the next submission gets a new key.
        if let Some(mut attempt) = self.open_attempt.take() {
            attempt.payment_id = response.payment_id();
            attempt.status = response.payment_status();
            attempt.status_detail = response.status_detail();
            self.last_attempt = Some(attempt);
        }
        Ok(response)
    }

    async fn settle_response(
        &mut self,
        response: GatewayResponse,
        payment: PaymentInfo,
        coupon: Option<&Coupon>,
        now: DateTime<Utc>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let status = response.payment_status();

        if !response.is_success() {
            let status = match status {
                PaymentStatus::Unknown => PaymentStatus::Rejected,
                other => other,
            };
            let detail = response.status_detail().or_else(|| response.error_message());
            return self.fail(response.payment_id(), status, detail);
        }

        let Some(payment_id) = response.payment_id() else {
            return Err(CheckoutError::UnexpectedResponse("payment without id".to_string()));
        };

        if status.is_approved() {
            return self.complete(payment_id, payment, coupon, now).await;
        }
        if status.is_failure() {
            return self.fail(Some(payment_id), status, response.status_detail());
        }

        info!("Payment {} is {:?}", payment_id, status);
        self.session.settle(CheckoutStep::Pending)?;
        Ok(CheckoutOutcome::Pending { payment_id, status })
    }

    async fn complete(
        &mut self,
        payment_id: String,
        payment: PaymentInfo,
        coupon: Option<&Coupon>,
        now: DateTime<Utc>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let totals = compute_totals(&self.session.cart_snapshot, coupon, Some(&payment), now)?;
        self.session.settle(CheckoutStep::Succeeded)?;
        info!("Payment {} approved, charged {}", payment_id, format_brl(totals.total_paid));

        self.clear_cart_once().await;

        let receipt = OrderReceipt {
            payment_id: payment_id.clone(),
            items: self.session.cart_snapshot.clone(),
            total_paid: totals.total_paid,
            coupon_summary: totals.coupon.clone(),
            payment_info: Some(payment),
            per_installment: totals.per_installment,
            interest_amount: totals.interest_amount,
            issued_at: Utc::now(),
        };
        if let Err(e) = self.deps.receipts.dispatch(&receipt).await {
            error!("Receipt for payment {} was not dispatched: {}", payment_id, e);
        }

        Ok(CheckoutOutcome::Success { payment_id, totals })
    }

    fn fail(
        &mut self,
        payment_id: Option<String>,
        status: PaymentStatus,
        status_detail: Option<String>,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        self.session.settle(CheckoutStep::Failed)?;
        info!("Payment {:?} ended {:?} ({:?})", payment_id, status, status_detail);

        Ok(CheckoutOutcome::Failure {
            payment_id,
            status,
            hint: status_hint(status_detail.as_deref()),
            status_detail,
        })
    }

    async fn clear_cart_once(&mut self) {
        if self.cart_cleared {
            return;
        }
        match self.deps.cart.clear().await {
            Ok(()) => self.cart_cleared = true,
            Err(e) => error!("Payment approved but the cart was not cleared: {}", e),
        }
    }

    async fn lookup_coupon(&self) -> Result<Option<Coupon>, CheckoutError> {
        match self.session.coupon_code.as_deref() {
            Some(code) => Ok(self.deps.coupons.lookup(code).await?),
            None => Ok(None),
        }
    }

    fn require_method(&self, accepts: impl Fn(PaymentMethodKind) -> bool) -> Result<(), CheckoutError> {
        match self.session.payment_method {
            Some(method) if !accepts(method) => Err(CheckoutError::WrongMethod(method)),
            _ => Ok(()),
        }
    }

    fn stop_pix(&mut self) {
        if let Some(mut pending) = self.pix.take() {
            pending.watch.cancel();
        }
    }

    fn base_payload(&self, totals: &Totals, payer_email: &str) -> Value {
        json!({
            "transaction_amount": amount_json(totals.final_total),
            "description": format!("Encore: {} verso(s)", self.session.cart_snapshot.len()),
            "external_reference": self.session.id.to_string(),
            "payer": { "email": payer_email },
            "metadata": self.order_metadata(totals),
        })
    }

    fn order_metadata(&self, totals: &Totals) -> Value {
        let item_ids: Vec<&str> = self.session.cart_snapshot.iter().map(|i| i.id.as_str()).collect();
        json!({
            "items": item_ids,
            "original_total": amount_json(totals.original_total),
            "coupon": totals.coupon.as_ref().map(|c| json!({
                "code": c.code,
                "discount_percent": c.discount_percent,
                "discount_amount": amount_json(c.discount_amount),
                "final_total": amount_json(c.final_total),
            })),
        })
    }
}

/// The gateway wants amounts as JSON numbers. The number keeps the cents as
/// written, with no float in between.
fn amount_json(value: Decimal) -> Value {
    rust_decimal::serde::arbitrary_precision::serialize(&round_currency(value), serde_json::value::Serializer)
        .unwrap_or(Value::Null)
}
