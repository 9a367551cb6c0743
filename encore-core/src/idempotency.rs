use uuid::Uuid;

/// Header carrying the attempt token on payment creation.
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Returns the caller's key when it is usable, otherwise a fresh token.
///
/// A supplied key is kept verbatim so that retries of the same attempt reach
/// the gateway with the same token. Blank keys, the literals `null` and
/// `undefined` (any case) and keys that could not travel in an HTTP header
/// are replaced.
pub fn resolve_idempotency_key(supplied: Option<&str>) -> String {
    match supplied {
        Some(key) if is_usable(key) => key.to_string(),
        _ => generate(),
    }
}

fn is_usable(key: &str) -> bool {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.eq_ignore_ascii_case("null") || trimmed.eq_ignore_ascii_case("undefined") {
        return false;
    }
    // Visible ASCII plus inner spaces/tabs is what a header value can carry.
    key.bytes().all(|b| b == b'\t' || (b' '..=b'~').contains(&b))
}

fn generate() -> String {
    let token = Uuid::new_v4().to_string();
    tracing::debug!("Generated idempotency key {}", token);
    token
}
