use std::sync::Arc;

use async_trait::async_trait;
use encore_core::repository::CartStore;
use encore_core::{CartItem, CoreResult};
use encore_shared::models::events::CartChanged;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::validate_lines;

struct Shared {
    cart_id: String,
    state: RwLock<CartState>,
    tx: broadcast::Sender<CartChanged>,
}

#[derive(Default)]
struct CartState {
    revision: u64,
    items: Vec<CartItem>,
}

/// Process-local cart. Each handle made with `attach` plays the part of a
/// separate browsing context over the same storage.
pub struct MemoryCartStore {
    shared: Arc<Shared>,
    origin: Uuid,
}

impl MemoryCartStore {
    pub fn new(cart_id: &str) -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                cart_id: cart_id.to_string(),
                state: RwLock::new(CartState::default()),
                tx,
            }),
            origin: Uuid::new_v4(),
        }
    }

    /// Another context over the same cart.
    pub fn attach(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            origin: Uuid::new_v4(),
        }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub async fn revision(&self) -> u64 {
        self.shared.state.read().await.revision
    }

    async fn write(&self, items: Vec<CartItem>) -> CoreResult<()> {
        let revision = {
            let mut state = self.shared.state.write().await;
            state.revision += 1;
            state.items = items;
            state.revision
        };
        debug!("Cart {} rewritten at revision {}", self.shared.cart_id, revision);
        // No subscribers is fine.
        let _ = self
            .shared
            .tx
            .send(CartChanged::new(&self.shared.cart_id, self.origin, revision));
        Ok(())
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn items(&self) -> CoreResult<Vec<CartItem>> {
        Ok(self.shared.state.read().await.items.clone())
    }

    async fn replace(&self, items: Vec<CartItem>) -> CoreResult<()> {
        validate_lines(&items)?;
        self.write(items).await
    }

    async fn clear(&self) -> CoreResult<()> {
        self.write(Vec::new()).await
    }

    fn subscribe(&self) -> broadcast::Receiver<CartChanged> {
        self.shared.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn verse(id: &str) -> CartItem {
        CartItem::new(id, "Seasons of Love", "Rent", "musical", dec!(25.00))
    }

    #[tokio::test]
    async fn test_write_propagates_to_other_context() {
        let tab_a = MemoryCartStore::new("shopper-1");
        let tab_b = tab_a.attach();
        let mut changes = tab_b.subscribe();

        tab_a.replace(vec![verse("v1"), verse("v2")]).await.unwrap();

        let change = changes.recv().await.unwrap();
        assert!(change.is_from(tab_a.origin()));
        assert!(!change.is_from(tab_b.origin()));
        assert_eq!(change.revision, 1);
        assert_eq!(tab_b.items().await.unwrap().len(), 2);
        assert_eq!(tab_b.total().await.unwrap(), dec!(50.00));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let tab_a = MemoryCartStore::new("shopper-1");
        let tab_b = tab_a.attach();

        tab_a.replace(vec![verse("v1")]).await.unwrap();
        tab_b.replace(vec![verse("v2"), verse("v3")]).await.unwrap();

        let items = tab_a.items().await.unwrap();
        assert_eq!(items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["v2", "v3"]);
        assert_eq!(tab_a.revision().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let store = MemoryCartStore::new("shopper-1");
        let result = store.replace(vec![verse("v1"), verse("v1")]).await;
        assert!(result.is_err());
        assert!(store.items().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_line_is_a_single_verse() {
        let store = MemoryCartStore::new("shopper-1");
        let doubled = CartItem { quantity: 2, ..verse("v1") };

        let result = store.replace(vec![verse("v2"), doubled]).await;
        assert!(result.is_err());
        assert!(store.items().await.unwrap().is_empty());

        store.replace(vec![verse("v1"), verse("v2")]).await.unwrap();
        assert_eq!(store.total().await.unwrap(), dec!(50.00));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryCartStore::new("shopper-1");
        store.replace(vec![verse("v1")]).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.items().await.unwrap().is_empty());
        assert_eq!(store.total().await.unwrap(), dec!(0));
    }
}
