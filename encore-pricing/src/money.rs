//! Currency helpers. All arithmetic stays in `Decimal`; formatting is for
//! display only and never parsed back.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rusty_money::{iso, Money};

/// Rounds to cents, half away from zero.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Whole cents, after rounding. `None` only on overflow.
pub fn to_cents(value: Decimal) -> Option<i64> {
    (round_currency(value) * Decimal::ONE_HUNDRED).to_i64()
}

/// Formats an amount in Brazilian Real, e.g. `R$ 1.234,56`.
pub fn format_brl(value: Decimal) -> String {
    let Some(cents) = to_cents(value) else {
        return format!("R$ {}", round_currency(value));
    };
    let rendered = format!("{}", Money::from_minor(cents, iso::BRL));
    match rendered.strip_prefix("R$") {
        Some(rest) if !rest.starts_with(' ') => format!("R$ {}", rest),
        _ => rendered,
    }
}

/// Reads a gateway number, accepting JSON numbers and numeric strings.
pub fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    let text = match value {
        serde_json::Value::Number(number) => number.to_string(),
        serde_json::Value::String(text) => text.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

/// Parses a user- or query-supplied amount; only positive values pass.
pub fn parse_positive_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|amount| *amount > Decimal::ZERO)
}
