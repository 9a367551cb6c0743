use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A verse in the cart. Each line is a unique intangible good.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Unit price captured when the item was added.
    pub price: Decimal,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl CartItem {
    pub fn new(id: &str, title: &str, artist: &str, category: &str, price: Decimal) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            artist: artist.to_string(),
            category: category.to_string(),
            image: None,
            price,
            quantity: 1,
        }
    }
}

/// Discount coupon as administered by the back office.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coupon {
    pub code: String,
    pub discount_percent: u8,
    pub expires_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub usage_count: u32,
}

impl Coupon {
    /// Codes compare case-insensitively.
    pub fn matches_code(&self, code: &str) -> bool {
        self.code.trim().eq_ignore_ascii_case(code.trim())
    }

    pub fn is_applicable(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || !(1..=100).contains(&self.discount_percent) {
            return false;
        }
        if let Some(expires_at) = self.expires_at {
            if now > expires_at {
                return false;
            }
        }
        match self.usage_limit {
            Some(limit) => self.usage_count < limit,
            None => true,
        }
    }
}

/// Discount breakdown attached to a payment payload or receipt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CouponSummary {
    pub code: Option<String>,
    pub discount_percent: u8,
    pub discount_amount: Decimal,
    pub original_total: Decimal,
    pub final_total: Decimal,
}

/// One row of the gateway's financing table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstallmentOption {
    pub quantity: u32,
    /// Charge per installment.
    pub amount: Decimal,
    pub total: Option<Decimal>,
    /// Interest rate in percent.
    pub rate: Option<Decimal>,
    pub recommended_message: Option<String>,
}

impl InstallmentOption {
    /// Rounding slack when comparing totals, in currency units.
    pub const INTEREST_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    /// Sum of the installments as charged, falling back to `amount × quantity`.
    pub fn effective_total(&self) -> Decimal {
        self.total
            .unwrap_or_else(|| self.amount * Decimal::from(self.quantity))
    }

    /// Interest is read off the totals, not the advertised rate: a single
    /// installment never carries interest, and a markup counts even when the
    /// rate field is zero or missing.
    pub fn has_interest(&self) -> bool {
        if self.quantity <= 1 {
            return false;
        }
        let base = self.amount * Decimal::from(self.quantity);
        match self.total {
            Some(total) => total > base + Self::INTEREST_TOLERANCE,
            None => self.rate.is_some_and(|rate| rate > Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodKind {
    Credit,
    Debit,
    Pix,
    Other,
}

impl PaymentMethodKind {
    pub fn is_card(self) -> bool {
        matches!(self, Self::Credit | Self::Debit)
    }

    /// The gateway's `payment_type_id` for card kinds.
    pub fn gateway_payment_type(self) -> Option<&'static str> {
        match self {
            Self::Credit => Some("credit_card"),
            Self::Debit => Some("debit_card"),
            Self::Pix => Some("bank_transfer"),
            Self::Other => None,
        }
    }

    pub fn from_gateway_type(payment_type_id: &str) -> Self {
        match payment_type_id {
            "credit_card" => Self::Credit,
            "debit_card" | "prepaid_card" => Self::Debit,
            "bank_transfer" => Self::Pix,
            _ => Self::Other,
        }
    }
}

/// Gateway payment status. Unrecognised values land in `Unknown` and are
/// treated as still pending.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    InProcess,
    Authorized,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    InMediation,
    Unknown,
}

impl<'de> Deserialize<'de> for PaymentStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "in_process" => Self::InProcess,
            "authorized" => Self::Authorized,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "cancelled" | "canceled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            "charged_back" => Self::ChargedBack,
            "in_mediation" => Self::InMediation,
            _ => Self::Unknown,
        }
    }

    pub fn is_approved(&self) -> bool {
        *self == Self::Approved
    }

    /// Rejections and cancellations end an attempt without a charge.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled)
    }
}

/// One logical payment submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentAttempt {
    pub idempotency_key: String,
    pub method: PaymentMethodKind,
    pub amount: Decimal,
    pub installments: Option<u32>,
    pub payment_id: Option<String>,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
}

impl PaymentAttempt {
    pub fn new(idempotency_key: String, method: PaymentMethodKind, amount: Decimal, installments: Option<u32>) -> Self {
        Self {
            idempotency_key,
            method,
            amount,
            installments,
            payment_id: None,
            status: PaymentStatus::Pending,
            status_detail: None,
        }
    }
}

/// How the order was actually paid, as far as the gateway reported it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentInfo {
    pub method: PaymentMethodKind,
    pub installments: Option<u32>,
    /// `transaction_details.total_paid_amount` when the gateway supplied it.
    pub total_paid: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Address {
    pub street: String,
    pub number: String,
    #[serde(default)]
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    /// Names of mandatory fields that are blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("street", &self.street),
            ("number", &self.number),
            ("neighborhood", &self.neighborhood),
            ("city", &self.city),
            ("state", &self.state),
            ("postal_code", &self.postal_code),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// Handed to order persistence and the mailer once a payment is approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderReceipt {
    pub payment_id: String,
    pub items: Vec<CartItem>,
    pub total_paid: Decimal,
    pub coupon_summary: Option<CouponSummary>,
    pub payment_info: Option<PaymentInfo>,
    pub per_installment: Option<Decimal>,
    pub interest_amount: Option<Decimal>,
    pub issued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon() -> Coupon {
        Coupon {
            code: "BROADWAY10".to_string(),
            discount_percent: 10,
            expires_at: None,
            enabled: true,
            usage_limit: None,
            usage_count: 0,
        }
    }

    #[test]
    fn test_coupon_applicability() {
        let now = Utc::now();
        assert!(coupon().is_applicable(now));
        assert!(coupon().matches_code("broadway10"));

        let disabled = Coupon { enabled: false, ..coupon() };
        assert!(!disabled.is_applicable(now));

        let expired = Coupon { expires_at: Some(now - Duration::days(1)), ..coupon() };
        assert!(!expired.is_applicable(now));

        let expiring_now = Coupon { expires_at: Some(now), ..coupon() };
        assert!(expiring_now.is_applicable(now));

        let used_up = Coupon { usage_limit: Some(5), usage_count: 5, ..coupon() };
        assert!(!used_up.is_applicable(now));

        let one_left = Coupon { usage_limit: Some(5), usage_count: 4, ..coupon() };
        assert!(one_left.is_applicable(now));
    }

    #[test]
    fn test_installment_interest() {
        let three = InstallmentOption {
            quantity: 3,
            amount: dec!(52.50),
            total: Some(dec!(157.50)),
            rate: Some(dec!(5)),
            recommended_message: None,
        };
        assert!(three.has_interest());

        let markup_without_rate = InstallmentOption { rate: None, ..three.clone() };
        assert!(markup_without_rate.has_interest());

        let rounding_only = InstallmentOption {
            quantity: 3,
            amount: dec!(33.33),
            total: Some(dec!(100.00)),
            rate: Some(dec!(0)),
            recommended_message: None,
        };
        assert!(!rounding_only.has_interest());

        let single = InstallmentOption {
            quantity: 1,
            amount: dec!(150),
            total: Some(dec!(160)),
            rate: Some(dec!(5)),
            recommended_message: None,
        };
        assert!(!single.has_interest());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(PaymentStatus::parse("approved"), PaymentStatus::Approved);
        assert_eq!(PaymentStatus::parse("IN_PROCESS"), PaymentStatus::InProcess);
        assert_eq!(PaymentStatus::parse("something_new"), PaymentStatus::Unknown);
        assert!(PaymentStatus::parse("cancelled").is_failure());
    }

    #[test]
    fn test_method_kind_from_gateway_type() {
        assert_eq!(PaymentMethodKind::from_gateway_type("credit_card"), PaymentMethodKind::Credit);
        assert_eq!(PaymentMethodKind::from_gateway_type("bank_transfer"), PaymentMethodKind::Pix);
        assert_eq!(PaymentMethodKind::from_gateway_type("ticket"), PaymentMethodKind::Other);
    }

    #[test]
    fn test_address_guard() {
        let mut address = Address {
            street: "Rua Augusta".to_string(),
            number: "1500".to_string(),
            complement: None,
            neighborhood: "Consolação".to_string(),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
            postal_code: "01304-001".to_string(),
        };
        assert!(address.is_complete());

        address.neighborhood = "  ".to_string();
        assert_eq!(address.missing_fields(), vec!["neighborhood"]);
    }
}
