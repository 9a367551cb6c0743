use std::sync::Arc;

use chrono::Utc;
use encore_core::{CartItem, CartStore, CouponLookup, OrderReceipt, PaymentInfo, PaymentMethodKind, PaymentStatus, ReceiptDispatcher};
use encore_pricing::{compute_totals, Totals};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::client::{CheckoutGateway, GatewayResponse};
use crate::hints::status_hint;

/// Query string the hosted checkout appends to the return URL.
///
/// The gateway sends both the `payment_id`/`status` pair and the older
/// `collection_*` names, and fills missing values with the text `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    pub payment_id: Option<String>,
    pub collection_id: Option<String>,
    pub status: Option<String>,
    pub collection_status: Option<String>,
    pub external_reference: Option<String>,
    pub preference_id: Option<String>,
}

impl RedirectParams {
    pub fn payment_id(&self) -> Option<&str> {
        first_present(&self.payment_id, &self.collection_id)
    }

    /// What the browser claims. Informational only.
    pub fn reported_status(&self) -> Option<&str> {
        first_present(&self.status, &self.collection_status)
    }
}

fn first_present<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<&'a str> {
    [a, b]
        .into_iter()
        .filter_map(|v| v.as_deref())
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LandingOutcome {
    /// Gateway confirmed the payment. `totals` is absent when nothing was
    /// settled on this visit: an earlier visit did it, or the cart no longer
    /// holds the lines the payment covered.
    Confirmed {
        payment_id: String,
        totals: Option<Totals>,
    },
    Rejected {
        payment_id: String,
        status: PaymentStatus,
        status_detail: Option<String>,
        hint: &'static str,
    },
    Pending {
        payment_id: String,
        status: PaymentStatus,
    },
    /// Status could not be confirmed with the gateway; nothing was changed.
    Unverified {
        payment_id: Option<String>,
        reported_status: Option<String>,
    },
}

/// Success/failure/pending return page of the hosted checkout.
pub struct RedirectLanding {
    gateway: Arc<dyn CheckoutGateway>,
    cart: Arc<dyn CartStore>,
    coupons: Arc<dyn CouponLookup>,
    receipts: Arc<dyn ReceiptDispatcher>,
}

impl RedirectLanding {
    pub fn new(
        gateway: Arc<dyn CheckoutGateway>,
        cart: Arc<dyn CartStore>,
        coupons: Arc<dyn CouponLookup>,
        receipts: Arc<dyn ReceiptDispatcher>,
    ) -> Self {
        Self {
            gateway,
            cart,
            coupons,
            receipts,
        }
    }

    /// Re-reads the payment from the gateway and acts only on that answer.
    /// The cart is cleared and the receipt sent only for a confirmed approval.
    pub async fn reconcile_redirect(&self, params: &RedirectParams, coupon_code: Option<&str>) -> LandingOutcome {
        let reported_status = params.reported_status().map(str::to_string);
        let Some(payment_id) = params.payment_id().map(str::to_string) else {
            warn!("Landing without payment id (reported {:?})", reported_status);
            return LandingOutcome::Unverified {
                payment_id: None,
                reported_status,
            };
        };

        let response = match self.gateway.payment_status(&payment_id).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!("Status lookup for {} answered {}", payment_id, response.status);
                return LandingOutcome::Unverified {
                    payment_id: Some(payment_id),
                    reported_status,
                };
            }
            Err(e) => {
                warn!("Status lookup for {} failed: {}", payment_id, e);
                return LandingOutcome::Unverified {
                    payment_id: Some(payment_id),
                    reported_status,
                };
            }
        };

        let status = response.payment_status();
        if reported_status.as_deref().map(PaymentStatus::parse).is_some_and(|s| s != status) {
            info!("Payment {} reported {:?} by redirect but is {:?}", payment_id, reported_status, status);
        }

        if status.is_approved() {
            let totals = self.settle_approved(&payment_id, &response, params, coupon_code).await;
            return LandingOutcome::Confirmed { payment_id, totals };
        }
        if status.is_failure() {
            let status_detail = response.status_detail();
            return LandingOutcome::Rejected {
                payment_id,
                status,
                hint: status_hint(status_detail.as_deref()),
                status_detail,
            };
        }
        LandingOutcome::Pending { payment_id, status }
    }

    /// Settles the cart lines this payment paid for, once per payment id.
    ///
    /// The paid lines come from the payment's own `metadata.items`, never from
    /// whatever the cart holds now: lines added after paying stay in the cart.
    async fn settle_approved(
        &self,
        payment_id: &str,
        response: &GatewayResponse,
        params: &RedirectParams,
        coupon_code: Option<&str>,
    ) -> Option<Totals> {
        match self.receipts.is_dispatched(payment_id).await {
            Ok(false) => {}
            Ok(true) => {
                info!("Payment {} already settled", payment_id);
                return None;
            }
            Err(e) => {
                error!("Cannot tell whether payment {} was settled: {}", payment_id, e);
                return None;
            }
        }

        if let (Some(expected), Some(actual)) = (params.external_reference.as_deref(), response.external_reference()) {
            if expected != "null" && expected != actual {
                warn!(
                    "Payment {} belongs to checkout {}, not {}; cart left untouched",
                    payment_id, actual, expected
                );
                return None;
            }
        }

        let Some(paid_ids) = response.paid_item_ids().filter(|ids| !ids.is_empty()) else {
            warn!("Payment {} carries no item list; cart left untouched", payment_id);
            return None;
        };

        let items = match self.cart.items().await {
            Ok(items) => items,
            Err(e) => {
                error!("Cart unreadable after approved payment {}: {}", payment_id, e);
                return None;
            }
        };
        let (paid, remaining): (Vec<CartItem>, Vec<CartItem>) =
            items.into_iter().partition(|item| paid_ids.contains(&item.id));
        if paid.len() != paid_ids.len() {
            warn!(
                "Cart holds {} of the {} items paid by {}; left untouched",
                paid.len(),
                paid_ids.len(),
                payment_id
            );
            return None;
        }

        let coupon = match coupon_code {
            Some(code) => self.coupons.lookup(code).await.unwrap_or_else(|e| {
                warn!("Coupon {} lookup failed on landing: {}", code, e);
                None
            }),
            None => None,
        };
        let method = response
            .body
            .get("payment_type_id")
            .and_then(Value::as_str)
            .map(PaymentMethodKind::from_gateway_type)
            .unwrap_or(PaymentMethodKind::Other);
        let payment = PaymentInfo {
            method,
            installments: response.installments(),
            total_paid: response.total_paid(),
        };

        let totals = match compute_totals(&paid, coupon.as_ref(), Some(&payment), Utc::now()) {
            Ok(totals) => totals,
            Err(e) => {
                error!("Totals for approved payment {} failed: {}", payment_id, e);
                return None;
            }
        };

        let updated = if remaining.is_empty() {
            self.cart.clear().await
        } else {
            self.cart.replace(remaining).await
        };
        if let Err(e) = updated {
            error!("Payment {} approved but the cart was not updated: {}", payment_id, e);
        }

        let receipt = OrderReceipt {
            payment_id: payment_id.to_string(),
            items: paid,
            total_paid: totals.total_paid,
            coupon_summary: totals.coupon.clone(),
            payment_info: Some(payment),
            per_installment: totals.per_installment,
            interest_amount: totals.interest_amount,
            issued_at: Utc::now(),
        };
        if let Err(e) = self.receipts.dispatch(&receipt).await {
            error!("Receipt for payment {} was not dispatched: {}", payment_id, e);
        }

        Some(totals)
    }
}
