use chrono::{DateTime, Utc};
use encore_core::{CartItem, Coupon, CouponSummary, PaymentInfo, PaymentMethodKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::money::round_currency;

/// Amounts shown at checkout and written on the receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub original_total: Decimal,
    pub discount_amount: Decimal,
    pub final_total: Decimal,
    /// What the shopper was actually charged.
    pub total_paid: Decimal,
    pub per_installment: Option<Decimal>,
    pub interest_amount: Option<Decimal>,
    pub coupon: Option<CouponSummary>,
    /// Set when a single-shot charge differs from `final_total`.
    pub discrepancy: Option<Decimal>,
}

impl Totals {
    pub fn has_discount(&self) -> bool {
        self.discount_amount > Decimal::ZERO
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReconcileError {
    #[error("Item {0} has a negative price")]
    NegativePrice(String),

    #[error("Installment count must be at least 1")]
    ZeroInstallments,
}

/// Computes cart totals, applying the coupon only if it is applicable at
/// `now`, and reconciles them with what the gateway says was paid.
///
/// Every cart line is a single verse, so the original total is the sum of
/// unit prices.
pub fn compute_totals(
    items: &[CartItem],
    coupon: Option<&Coupon>,
    payment: Option<&PaymentInfo>,
    now: DateTime<Utc>,
) -> Result<Totals, ReconcileError> {
    if let Some(item) = items.iter().find(|item| item.price < Decimal::ZERO) {
        return Err(ReconcileError::NegativePrice(item.id.clone()));
    }
    if payment.and_then(|p| p.installments) == Some(0) {
        return Err(ReconcileError::ZeroInstallments);
    }

    let original_total = round_currency(items.iter().map(|item| item.price).sum());

    let applied = coupon.filter(|c| {
        let applicable = c.is_applicable(now);
        if !applicable {
            info!("Coupon {} is not applicable, charging full price", c.code);
        }
        applicable
    });

    let (discount_amount, summary) = match applied {
        Some(c) => {
            let discount = round_currency(original_total * Decimal::from(c.discount_percent) / Decimal::ONE_HUNDRED);
            let summary = CouponSummary {
                code: Some(c.code.clone()),
                discount_percent: c.discount_percent,
                discount_amount: discount,
                original_total,
                final_total: original_total - discount,
            };
            (discount, Some(summary))
        }
        None => (Decimal::ZERO, None),
    };
    let final_total = original_total - discount_amount;

    let total_paid = payment
        .and_then(|p| p.total_paid)
        .map(round_currency)
        .unwrap_or(final_total);

    let mut totals = Totals {
        original_total,
        discount_amount,
        final_total,
        total_paid,
        per_installment: None,
        interest_amount: None,
        coupon: summary,
        discrepancy: None,
    };

    let Some(payment) = payment else {
        return Ok(totals);
    };

    match (payment.method, payment.installments) {
        (PaymentMethodKind::Credit, Some(count)) if count > 1 => {
            totals.per_installment = Some(round_currency(total_paid / Decimal::from(count)));
            totals.interest_amount = Some((total_paid - final_total).max(Decimal::ZERO));
        }
        (PaymentMethodKind::Debit, _) if total_paid != final_total => {
            warn!(
                "Debit charge {} differs from computed total {}",
                total_paid, final_total
            );
            totals.discrepancy = Some(total_paid - final_total);
        }
        _ => {}
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn cart(prices: &[Decimal]) -> Vec<CartItem> {
        prices
            .iter()
            .enumerate()
            .map(|(i, price)| CartItem::new(&format!("verse-{}", i), "Defying Gravity", "Wicked", "musical", *price))
            .collect()
    }

    fn coupon(percent: u8) -> Coupon {
        Coupon {
            code: "ENCORE".to_string(),
            discount_percent: percent,
            expires_at: None,
            enabled: true,
            usage_limit: None,
            usage_count: 0,
        }
    }

    #[test]
    fn test_credit_installments_with_interest() {
        let payment = PaymentInfo {
            method: PaymentMethodKind::Credit,
            installments: Some(3),
            total_paid: Some(dec!(157.50)),
        };
        let totals = compute_totals(&cart(&[dec!(150.00)]), None, Some(&payment), Utc::now()).unwrap();

        assert_eq!(totals.final_total, dec!(150.00));
        assert_eq!(totals.total_paid, dec!(157.50));
        assert_eq!(totals.interest_amount, Some(dec!(7.50)));
        assert_eq!(totals.per_installment, Some(dec!(52.50)));
        assert!(totals.coupon.is_none());
    }

    #[test]
    fn test_coupon_with_pix() {
        let payment = PaymentInfo { method: PaymentMethodKind::Pix, installments: None, total_paid: None };
        let totals = compute_totals(&cart(&[dec!(50.00), dec!(30.00)]), Some(&coupon(10)), Some(&payment), Utc::now()).unwrap();

        assert_eq!(totals.original_total, dec!(80.00));
        assert_eq!(totals.discount_amount, dec!(8.00));
        assert_eq!(totals.final_total, dec!(72.00));
        assert_eq!(totals.total_paid, dec!(72.00));
        assert!(totals.per_installment.is_none());
        assert!(totals.interest_amount.is_none());
        let summary = totals.coupon.unwrap();
        assert_eq!(summary.code.as_deref(), Some("ENCORE"));
        assert_eq!(summary.final_total, dec!(72.00));
    }

    #[test]
    fn test_expired_coupon_is_ignored() {
        let now = Utc::now();
        let expired = Coupon { expires_at: Some(now - Duration::hours(1)), ..coupon(50) };
        let totals = compute_totals(&cart(&[dec!(80.00)]), Some(&expired), None, now).unwrap();

        assert_eq!(totals.discount_amount, Decimal::ZERO);
        assert_eq!(totals.final_total, dec!(80.00));
        assert!(!totals.has_discount());
    }

    #[test]
    fn test_single_installment_reports_no_interest() {
        let payment = PaymentInfo { method: PaymentMethodKind::Credit, installments: Some(1), total_paid: Some(dec!(80)) };
        let totals = compute_totals(&cart(&[dec!(80)]), None, Some(&payment), Utc::now()).unwrap();
        assert!(totals.interest_amount.is_none());
        assert!(totals.per_installment.is_none());
    }

    #[test]
    fn test_debit_divergence_is_surfaced() {
        let payment = PaymentInfo { method: PaymentMethodKind::Debit, installments: None, total_paid: Some(dec!(81.00)) };
        let totals = compute_totals(&cart(&[dec!(80.00)]), None, Some(&payment), Utc::now()).unwrap();
        assert_eq!(totals.discrepancy, Some(dec!(1.00)));
        assert_eq!(totals.total_paid, dec!(81.00));

        let matching = PaymentInfo { total_paid: Some(dec!(80.00)), ..payment };
        let totals = compute_totals(&cart(&[dec!(80.00)]), None, Some(&matching), Utc::now()).unwrap();
        assert!(totals.discrepancy.is_none());
    }

    #[test]
    fn test_invalid_inputs() {
        let result = compute_totals(&cart(&[dec!(-1)]), None, None, Utc::now());
        assert_eq!(result, Err(ReconcileError::NegativePrice("verse-0".to_string())));

        let payment = PaymentInfo { method: PaymentMethodKind::Credit, installments: Some(0), total_paid: None };
        let result = compute_totals(&cart(&[dec!(10)]), None, Some(&payment), Utc::now());
        assert_eq!(result, Err(ReconcileError::ZeroInstallments));
    }

    proptest! {
        #[test]
        fn prop_discount_and_final_add_up(cents in 1i64..10_000_000, percent in 1u8..=100) {
            let original = Decimal::new(cents, 2);
            let totals = compute_totals(&cart(&[original]), Some(&coupon(percent)), None, Utc::now()).unwrap();

            prop_assert!((totals.discount_amount + totals.final_total - totals.original_total).abs() <= dec!(0.01));
            prop_assert!(totals.final_total <= totals.original_total);
            prop_assert!(totals.final_total >= Decimal::ZERO);
        }
    }
}
