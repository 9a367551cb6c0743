use uuid::Uuid;

/// Broadcast whenever a persisted cart is rewritten.
///
/// Carries no item payload: observers re-read the cart, the same way a
/// browser storage event only names the key that changed.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq, Eq)]
pub struct CartChanged {
    pub cart_id: String,
    /// Writer that produced the change, so a context can ignore its own echo.
    pub origin: Uuid,
    pub revision: u64,
    pub changed_at: i64,
}

impl CartChanged {
    pub fn new(cart_id: &str, origin: Uuid, revision: u64) -> Self {
        Self {
            cart_id: cart_id.to_string(),
            origin,
            revision,
            changed_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_from(&self, origin: Uuid) -> bool {
        self.origin == origin
    }
}
