pub mod models;
pub mod idempotency;
pub mod payment;
pub mod repository;

pub use idempotency::resolve_idempotency_key;
pub use models::{
    Address, CartItem, Coupon, CouponSummary, InstallmentOption, OrderReceipt, PaymentAttempt,
    PaymentInfo, PaymentMethodKind, PaymentStatus,
};
pub use repository::{AddressBook, CartStore, CouponLookup, ReceiptDispatcher};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
    #[error("Collaborator unavailable: {0}")]
    CollaboratorError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
