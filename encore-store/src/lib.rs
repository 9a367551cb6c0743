pub mod app_config;
pub mod cart;
pub mod gateway_http;
pub mod redis_repo;

pub use cart::MemoryCartStore;
pub use gateway_http::HttpGatewayTransport;
pub use redis_repo::{RedisCartStore, RedisReceiptQueue};

use encore_core::{CartItem, CoreError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("duplicate cart item: {0}")]
    DuplicateItem(String),
    #[error("cart item {0} must have quantity 1")]
    InvalidQuantity(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Redis(e) => CoreError::CollaboratorError(e.to_string()),
            StoreError::Serialization(e) => CoreError::InternalError(e.to_string()),
            StoreError::DuplicateItem(id) => CoreError::ValidationError(format!("duplicate cart item {}", id)),
            StoreError::InvalidQuantity(id) => {
                CoreError::ValidationError(format!("cart item {} must have quantity 1", id))
            }
        }
    }
}

/// Cart lines are keyed by product id and each is a single verse: a second
/// line with the same id, or a quantity other than 1, is rejected.
pub(crate) fn validate_lines(items: &[CartItem]) -> Result<(), StoreError> {
    let mut seen = std::collections::HashSet::new();
    for item in items {
        if item.quantity != 1 {
            return Err(StoreError::InvalidQuantity(item.id.clone()));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(StoreError::DuplicateItem(item.id.clone()));
        }
    }
    Ok(())
}
