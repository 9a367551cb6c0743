use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use encore_core::InstallmentOption;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::money::{decimal_from_json, format_brl};

/// What the financing lookup is keyed on. A BIN wins when both are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancingKey {
    Bin(String),
    PaymentMethod(String),
}

/// Anything that can fetch the gateway's financing table.
#[async_trait]
pub trait FinancingSource: Send + Sync {
    async fn financing_table(
        &self,
        amount: Decimal,
        key: &FinancingKey,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Input for an installment lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallmentQuery {
    pub amount: Decimal,
    pub payment_method_id: Option<String>,
    /// Raw BIN or card-number prefix; only the first six digits are used.
    pub bin: Option<String>,
}

impl InstallmentQuery {
    pub fn new(amount: Decimal) -> Self {
        Self { amount, ..Default::default() }
    }

    pub fn with_bin(mut self, bin: &str) -> Self {
        self.bin = Some(bin.to_string());
        self
    }

    pub fn with_payment_method(mut self, payment_method_id: &str) -> Self {
        self.payment_method_id = Some(payment_method_id.to_string());
        self
    }

    /// `None` means there is not enough information to ask the gateway yet.
    pub fn financing_key(&self) -> Option<FinancingKey> {
        if let Some(bin) = self.bin.as_deref().and_then(normalize_bin) {
            return Some(FinancingKey::Bin(bin));
        }
        self.payment_method_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| FinancingKey::PaymentMethod(id.to_string()))
    }
}

/// First six digits of a card number, if it has that many.
pub fn normalize_bin(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).take(6).collect();
    (digits.len() == 6).then_some(digits)
}

/// Read-through installment pricing over the gateway's financing table
pub struct InstallmentEngine {
    source: Arc<dyn FinancingSource>,
}

impl InstallmentEngine {
    pub fn new(source: Arc<dyn FinancingSource>) -> Self {
        Self { source }
    }

    /// Options ordered by installment count. Empty means "cannot offer
    /// installments now": missing card data, a bad amount, or a failed lookup.
    pub async fn get_installments(&self, query: &InstallmentQuery) -> Vec<InstallmentOption> {
        let Some(key) = query.financing_key() else {
            return Vec::new();
        };
        if query.amount <= Decimal::ZERO {
            return Vec::new();
        }

        match self.source.financing_table(query.amount, &key).await {
            Ok(table) => {
                let options = parse_financing_table(&table, query.payment_method_id.as_deref());
                debug!("Financing lookup {:?} returned {} options", key, options.len());
                options
            }
            Err(e) => {
                warn!("Financing lookup {:?} failed: {}", key, e);
                Vec::new()
            }
        }
    }
}

/// Extracts the cost table from a gateway response.
///
/// Accepts either the list form (one entry per payment method, each with
/// `payer_costs`) or a single entry. When a method id is given, its entry is
/// preferred. Rows missing the count or amount, and rows whose total is
/// smaller than the installments add up to, are dropped; duplicates keep the
/// first row seen.
pub fn parse_financing_table(table: &serde_json::Value, payment_method_id: Option<&str>) -> Vec<InstallmentOption> {
    let entries: Vec<&serde_json::Value> = match table {
        serde_json::Value::Array(entries) => entries.iter().collect(),
        serde_json::Value::Object(_) => vec![table],
        _ => Vec::new(),
    };

    let with_costs = || entries.iter().copied().filter(|entry| entry.get("payer_costs").is_some());
    let entry = payment_method_id
        .and_then(|id| with_costs().find(|entry| entry.get("payment_method_id").and_then(|v| v.as_str()) == Some(id)))
        .or_else(|| with_costs().next());

    let Some(costs) = entry.and_then(|e| e.get("payer_costs")).and_then(|c| c.as_array()) else {
        return Vec::new();
    };

    let mut by_quantity: BTreeMap<u32, InstallmentOption> = BTreeMap::new();
    for cost in costs {
        let Some(option) = parse_payer_cost(cost) else {
            continue;
        };
        if !is_consistent(&option) {
            warn!("Dropping inconsistent financing row for {}x", option.quantity);
            continue;
        }
        by_quantity.entry(option.quantity).or_insert(option);
    }

    by_quantity.into_values().collect()
}

fn parse_payer_cost(cost: &serde_json::Value) -> Option<InstallmentOption> {
    let quantity = cost
        .get("installments")
        .and_then(|v| v.as_u64())
        .and_then(|q| u32::try_from(q).ok())
        .filter(|q| *q >= 1)?;
    let amount = cost.get("installment_amount").and_then(decimal_from_json)?;

    Some(InstallmentOption {
        quantity,
        amount,
        total: cost.get("total_amount").and_then(decimal_from_json),
        rate: cost.get("installment_rate").and_then(decimal_from_json),
        recommended_message: cost
            .get("recommended_message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

/// Each installment may be rounded by up to a cent.
fn is_consistent(option: &InstallmentOption) -> bool {
    match option.total {
        Some(total) => {
            let slack = InstallmentOption::INTEREST_TOLERANCE * Decimal::from(option.quantity);
            option.amount * Decimal::from(option.quantity) <= total + slack
        }
        None => true,
    }
}

/// Human label such as `3x de R$ 52,50 com juros (total R$ 157,50)`.
pub fn installment_label(option: &InstallmentOption) -> String {
    let per = format_brl(option.amount);
    if option.has_interest() {
        format!(
            "{}x de {} com juros (total {})",
            option.quantity,
            per,
            format_brl(option.effective_total())
        )
    } else {
        format!("{}x de {} sem juros", option.quantity, per)
    }
}

/// The gateway's own wording when it sent one, otherwise our label.
pub fn display_message(option: &InstallmentOption) -> String {
    option
        .recommended_message
        .clone()
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| installment_label(option))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockSource {
        table: serde_json::Value,
        fail: bool,
        calls: AtomicUsize,
        last_key: Mutex<Option<FinancingKey>>,
    }

    impl MockSource {
        fn new(table: serde_json::Value) -> Arc<Self> {
            Arc::new(Self { table, fail: false, calls: AtomicUsize::new(0), last_key: Mutex::new(None) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { table: json!(null), fail: true, calls: AtomicUsize::new(0), last_key: Mutex::new(None) })
        }
    }

    #[async_trait]
    impl FinancingSource for MockSource {
        async fn financing_table(
            &self,
            _amount: Decimal,
            key: &FinancingKey,
        ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_key.lock().unwrap() = Some(key.clone());
            if self.fail {
                return Err("gateway unavailable".into());
            }
            Ok(self.table.clone())
        }
    }

    fn sample_table() -> serde_json::Value {
        json!([{
            "payment_method_id": "visa",
            "payer_costs": [
                {"installments": 3, "installment_amount": 52.50, "total_amount": 157.50, "installment_rate": 5},
                {"installments": 1, "installment_amount": 150.00, "total_amount": 150.00}
            ]
        }])
    }

    #[tokio::test]
    async fn test_credit_three_installments_with_interest() {
        let source = MockSource::new(sample_table());
        let engine = InstallmentEngine::new(source.clone());

        let options = engine
            .get_installments(&InstallmentQuery::new(dec!(150.00)).with_bin("4111 1111 1111 1111"))
            .await;

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].quantity, 1);
        assert_eq!(options[1].quantity, 3);
        assert!(!options[0].has_interest());
        assert!(options[1].has_interest());
        assert_eq!(options[1].total, Some(dec!(157.50)));
        assert_eq!(*source.last_key.lock().unwrap(), Some(FinancingKey::Bin("411111".to_string())));
    }

    #[tokio::test]
    async fn test_no_card_data_skips_lookup() {
        let source = MockSource::new(sample_table());
        let engine = InstallmentEngine::new(source.clone());

        assert!(engine.get_installments(&InstallmentQuery::new(dec!(100))).await.is_empty());
        assert!(engine.get_installments(&InstallmentQuery::new(dec!(100)).with_bin("41111")).await.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bin_takes_precedence_over_method() {
        let source = MockSource::new(sample_table());
        let engine = InstallmentEngine::new(source.clone());

        let query = InstallmentQuery::new(dec!(100)).with_payment_method("visa").with_bin("411111");
        engine.get_installments(&query).await;
        assert_eq!(*source.last_key.lock().unwrap(), Some(FinancingKey::Bin("411111".to_string())));

        let query = InstallmentQuery::new(dec!(100)).with_payment_method("visa");
        engine.get_installments(&query).await;
        assert_eq!(*source.last_key.lock().unwrap(), Some(FinancingKey::PaymentMethod("visa".to_string())));
    }

    #[tokio::test]
    async fn test_lookup_failure_yields_empty() {
        let engine = InstallmentEngine::new(MockSource::failing());
        let options = engine.get_installments(&InstallmentQuery::new(dec!(100)).with_bin("411111")).await;
        assert!(options.is_empty());
    }

    #[test]
    fn test_parse_discards_incomplete_and_duplicate_rows() {
        let table = json!({
            "payment_method_id": "master",
            "payer_costs": [
                {"installments": 2, "installment_amount": 51.0, "total_amount": 102.0},
                {"installments": 2, "installment_amount": 60.0, "total_amount": 120.0},
                {"installment_amount": 10.0},
                {"installments": 6},
                {"installments": 4, "installment_amount": 30.0, "total_amount": 100.0}
            ]
        });

        let options = parse_financing_table(&table, None);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].amount, dec!(51.0));
    }

    #[test]
    fn test_parse_prefers_matching_method_entry() {
        let table = json!([
            {"payment_method_id": "visa", "payer_costs": [{"installments": 1, "installment_amount": 10}]},
            {"payment_method_id": "master", "payer_costs": [{"installments": 2, "installment_amount": 5}]}
        ]);
        let options = parse_financing_table(&table, Some("master"));
        assert_eq!(options[0].quantity, 2);

        let options = parse_financing_table(&table, Some("elo"));
        assert_eq!(options[0].quantity, 1);
    }

    #[test]
    fn test_labels() {
        let options = parse_financing_table(&sample_table(), None);
        assert!(installment_label(&options[0]).contains("1x de R$"));
        assert!(installment_label(&options[0]).ends_with("sem juros"));
        assert!(installment_label(&options[1]).contains("com juros"));

        let with_message = InstallmentOption {
            recommended_message: Some("3 parcelas de R$ 52,50".to_string()),
            ..options[1].clone()
        };
        assert_eq!(display_message(&with_message), "3 parcelas de R$ 52,50");
    }

    proptest! {
        #[test]
        fn prop_options_sorted_and_consistent(
            rows in proptest::collection::vec((0u32..30, 1i64..100_000, 0i64..5_000_000, proptest::bool::ANY), 0..24)
        ) {
            let costs: Vec<serde_json::Value> = rows
                .iter()
                .map(|(quantity, amount_cents, total_cents, with_total)| {
                    let mut row = json!({
                        "installments": quantity,
                        "installment_amount": Decimal::new(*amount_cents, 2).to_string(),
                    });
                    if *with_total {
                        row["total_amount"] = json!(Decimal::new(*total_cents, 2).to_string());
                    }
                    row
                })
                .collect();
            let options = parse_financing_table(&json!({"payer_costs": costs}), None);

            for pair in options.windows(2) {
                prop_assert!(pair[0].quantity < pair[1].quantity);
            }
            for option in &options {
                prop_assert!(option.quantity >= 1);
                if let Some(total) = option.total {
                    let slack = dec!(0.01) * Decimal::from(option.quantity);
                    prop_assert!(option.amount * Decimal::from(option.quantity) <= total + slack);
                }
            }
        }
    }
}
