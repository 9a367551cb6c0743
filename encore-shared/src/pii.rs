use serde::{Serialize, Deserialize, Serializer};
use std::fmt;

/// A wrapper for sensitive data that masks its value in Debug output and can be customized for Serialization.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Masked<T>(pub T);

impl<T> fmt::Debug for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T> fmt::Display for Masked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "********")
    }
}

impl<T: Serialize> Serialize for Masked<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Masking only applies to formatting; outbound payloads need the real value.
        self.0.serialize(serializer)
    }
}

impl<T> Masked<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Renders a card number for logs: BIN and last four digits, the rest starred.
///
/// Non-digit characters are ignored. Numbers too short to carry both parts are
/// fully masked.
pub fn mask_card_number(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 10 {
        return "*".repeat(digits.len());
    }

    let hidden = digits.len() - 10;
    let mut masked = String::with_capacity(digits.len());
    masked.extend(&digits[..6]);
    masked.push_str(&"*".repeat(hidden));
    masked.extend(&digits[digits.len() - 4..]);
    masked
}
