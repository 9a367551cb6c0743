use async_trait::async_trait;
use encore_shared::models::events::CartChanged;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::models::{Address, CartItem, Coupon, OrderReceipt};
use crate::CoreResult;

/// The persisted cart shared by every browsing context of a shopper.
///
/// Writes are last-write-wins. Other contexts learn about a write through
/// `subscribe`, never by polling.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn items(&self) -> CoreResult<Vec<CartItem>>;

    /// Sum of unit prices. Every line is a single verse.
    async fn total(&self) -> CoreResult<Decimal> {
        let items = self.items().await?;
        Ok(items.iter().map(|item| item.price).sum())
    }

    async fn replace(&self, items: Vec<CartItem>) -> CoreResult<()>;

    async fn clear(&self) -> CoreResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<CartChanged>;
}

/// Address book lookup; only the currently selected address matters here.
#[async_trait]
pub trait AddressBook: Send + Sync {
    async fn selected_address(&self) -> CoreResult<Option<Address>>;
}

/// Coupon lookup by code. The store does not judge validity.
#[async_trait]
pub trait CouponLookup: Send + Sync {
    async fn lookup(&self, code: &str) -> CoreResult<Option<Coupon>>;
}

/// Order persistence and e-mail dispatch after an approved payment.
///
/// A payment id is dispatched at most once; a second `dispatch` for the same
/// id is a no-op.
#[async_trait]
pub trait ReceiptDispatcher: Send + Sync {
    async fn dispatch(&self, receipt: &OrderReceipt) -> CoreResult<()>;

    async fn is_dispatched(&self, payment_id: &str) -> CoreResult<bool>;
}
