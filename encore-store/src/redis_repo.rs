use async_trait::async_trait;
use encore_core::repository::{CartStore, ReceiptDispatcher};
use encore_core::{CartItem, CoreResult, OrderReceipt};
use encore_shared::models::events::CartChanged;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{validate_lines, StoreError};

pub const RECEIPT_NAMESPACE: &str = "receipts";

fn cart_key(cart_id: &str) -> String {
    format!("cart:{}", cart_id)
}

fn revision_key(cart_id: &str) -> String {
    format!("cart:{}:revision", cart_id)
}

fn changes_channel(cart_id: &str) -> String {
    format!("cart:{}:changes", cart_id)
}

/// Cart persisted in Redis. Writers publish a `CartChanged` on the cart's
/// channel; every store listening on that cart relays it to its subscribers.
/// The relay task lives as long as the store.
pub struct RedisCartStore {
    client: redis::Client,
    cart_id: String,
    origin: Uuid,
    tx: broadcast::Sender<CartChanged>,
    relay: JoinHandle<()>,
}

impl RedisCartStore {
    pub async fn connect(connection_string: &str, cart_id: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_string)?;
        let (tx, _) = broadcast::channel(64);

        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(changes_channel(cart_id)).await?;

        let relay_tx = tx.clone();
        let channel = changes_channel(cart_id);
        let relay = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable message on {}: {}", channel, e);
                        continue;
                    }
                };
                match serde_json::from_str::<CartChanged>(&payload) {
                    Ok(event) => {
                        let _ = relay_tx.send(event);
                    }
                    Err(e) => warn!("Malformed cart change on {}: {}", channel, e),
                }
            }
            info!("Cart change relay for {} stopped", channel);
        });

        Ok(Self {
            client,
            cart_id: cart_id.to_string(),
            origin: Uuid::new_v4(),
            tx,
            relay,
        })
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    async fn write(&self, items: &[CartItem]) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let revision: u64 = conn.incr(revision_key(&self.cart_id), 1).await?;
        let payload = serde_json::to_string(items)?;
        let event = serde_json::to_string(&CartChanged::new(&self.cart_id, self.origin, revision))?;

        redis::pipe()
            .atomic()
            .set(cart_key(&self.cart_id), payload)
            .ignore()
            .publish(changes_channel(&self.cart_id), event)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        info!("Cart {} persisted at revision {}", self.cart_id, revision);
        Ok(())
    }

    async fn read(&self) -> Result<Vec<CartItem>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(cart_key(&self.cart_id)).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for RedisCartStore {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

#[async_trait]
impl CartStore for RedisCartStore {
    async fn items(&self) -> CoreResult<Vec<CartItem>> {
        Ok(self.read().await?)
    }

    async fn replace(&self, items: Vec<CartItem>) -> CoreResult<()> {
        validate_lines(&items)?;
        Ok(self.write(&items).await?)
    }

    async fn clear(&self) -> CoreResult<()> {
        Ok(self.write(&[]).await?)
    }

    fn subscribe(&self) -> broadcast::Receiver<CartChanged> {
        self.tx.subscribe()
    }
}

/// Hands approved orders to the mail worker through a Redis list. Payment
/// ids already handed over are kept in a set so each is queued once.
#[derive(Clone)]
pub struct RedisReceiptQueue {
    client: redis::Client,
    queue: String,
    dispatched: String,
}

impl RedisReceiptQueue {
    pub fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_namespace(connection_string, RECEIPT_NAMESPACE)
    }

    /// Keys `{namespace}:pending` (list) and `{namespace}:dispatched` (set).
    pub fn with_namespace(connection_string: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            queue: format!("{}:pending", namespace),
            dispatched: format!("{}:dispatched", namespace),
        })
    }

    async fn push(&self, receipt: &OrderReceipt) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(receipt)?;

        let added: i64 = conn.sadd(&self.dispatched, &receipt.payment_id).await?;
        if added == 0 {
            info!("Receipt for payment {} already queued", receipt.payment_id);
            return Ok(());
        }
        if let Err(e) = conn.lpush::<_, _, ()>(&self.queue, payload).await {
            // Let a later visit try again.
            let _: Result<i64, _> = conn.srem(&self.dispatched, &receipt.payment_id).await;
            return Err(e.into());
        }
        info!("Receipt for payment {} queued", receipt.payment_id);
        Ok(())
    }

    async fn contains(&self, payment_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.sismember(&self.dispatched, payment_id).await?)
    }
}

#[async_trait]
impl ReceiptDispatcher for RedisReceiptQueue {
    async fn dispatch(&self, receipt: &OrderReceipt) -> CoreResult<()> {
        Ok(self.push(receipt).await?)
    }

    async fn is_dispatched(&self, payment_id: &str) -> CoreResult<bool> {
        Ok(self.contains(payment_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Tests that need a server read `REDIS_URL` and are skipped without it.
    fn redis_url() -> Option<String> {
        let url = std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        if url.is_none() {
            eprintln!("REDIS_URL not set, skipping");
        }
        url
    }

    fn verse(id: &str) -> CartItem {
        CartItem::new(id, "Wait for It", "Hamilton", "musical", dec!(20.00))
    }

    fn receipt(payment_id: &str) -> OrderReceipt {
        OrderReceipt {
            payment_id: payment_id.to_string(),
            items: vec![verse("v1")],
            total_paid: dec!(20.00),
            coupon_summary: None,
            payment_info: None,
            per_installment: None,
            interest_amount: None,
            issued_at: Utc::now(),
        }
    }

    async fn cleanup(url: &str, keys: &[String]) {
        let client = redis::Client::open(url).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = conn.del(keys).await.unwrap();
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(cart_key("abc"), "cart:abc");
        assert_eq!(revision_key("abc"), "cart:abc:revision");
        assert_eq!(changes_channel("abc"), "cart:abc:changes");
    }

    #[test]
    fn test_bad_url_rejected() {
        assert!(RedisReceiptQueue::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_write_reaches_other_store() {
        let Some(url) = redis_url() else { return };
        let cart_id = format!("test-{}", Uuid::new_v4());
        let tab_a = RedisCartStore::connect(&url, &cart_id).await.unwrap();
        let tab_b = RedisCartStore::connect(&url, &cart_id).await.unwrap();
        let mut changes = tab_b.subscribe();

        tab_a.replace(vec![verse("v1")]).await.unwrap();
        let first = timeout(Duration::from_secs(2), changes.recv()).await.unwrap().unwrap();
        assert!(first.is_from(tab_a.origin()));
        assert_eq!(tab_b.items().await.unwrap(), vec![verse("v1")]);

        tab_b.replace(vec![verse("v2"), verse("v3")]).await.unwrap();
        let second = timeout(Duration::from_secs(2), changes.recv()).await.unwrap().unwrap();
        assert!(second.is_from(tab_b.origin()));
        assert!(second.revision > first.revision);

        let ids: Vec<String> = tab_a.items().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["v2", "v3"]);

        cleanup(&url, &[cart_key(&cart_id), revision_key(&cart_id)]).await;
    }

    #[tokio::test]
    async fn test_dropping_store_stops_relay() {
        let Some(url) = redis_url() else { return };
        let store = RedisCartStore::connect(&url, &format!("test-{}", Uuid::new_v4()))
            .await
            .unwrap();
        let relay = store.relay.abort_handle();
        assert!(!relay.is_finished());

        drop(store);
        timeout(Duration::from_secs(1), async {
            while !relay.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay still running after drop");
    }

    #[tokio::test]
    async fn test_receipt_queued_once() {
        let Some(url) = redis_url() else { return };
        let namespace = format!("test-receipts-{}", Uuid::new_v4());
        let queue = RedisReceiptQueue::with_namespace(&url, &namespace).unwrap();

        assert!(!queue.is_dispatched("77").await.unwrap());
        queue.dispatch(&receipt("77")).await.unwrap();
        queue.dispatch(&receipt("77")).await.unwrap();
        assert!(queue.is_dispatched("77").await.unwrap());

        let client = redis::Client::open(url.as_str()).unwrap();
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let queued: Vec<String> = conn.lrange(&queue.queue, 0, -1).await.unwrap();
        assert_eq!(queued.len(), 1);
        let stored: OrderReceipt = serde_json::from_str(&queued[0]).unwrap();
        assert_eq!(stored.payment_id, "77");
        assert_eq!(stored.total_paid, dec!(20.00));

        cleanup(&url, &[queue.queue.clone(), queue.dispatched.clone()]).await;
    }
}
