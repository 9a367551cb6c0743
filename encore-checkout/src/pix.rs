use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::client::{CheckoutGateway, GatewayResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PixOutcome {
    Approved(GatewayResponse),
    Failed(GatewayResponse),
    /// No terminal status before the wall-clock budget ran out.
    Expired { checks: u32 },
}

/// Polls `payment_id` until it is approved, rejected or cancelled, or until
/// `settings.timeout` elapses.
///
/// One status check at a time: the next tick is only scheduled after the
/// previous answer arrived. Lookup errors are logged and polling goes on.
pub async fn poll_until_settled(
    gateway: Arc<dyn CheckoutGateway>,
    payment_id: String,
    settings: PixSettings,
) -> PixOutcome {
    let checks = AtomicU32::new(0);

    let polling = async {
        loop {
            tokio::time::sleep(settings.interval).await;
            let n = checks.fetch_add(1, Ordering::Relaxed) + 1;

            match gateway.payment_status(&payment_id).await {
                Ok(response) => {
                    let status = response.payment_status();
                    if status.is_approved() {
                        return PixOutcome::Approved(response);
                    }
                    if status.is_failure() {
                        return PixOutcome::Failed(response);
                    }
                    debug!("PIX {} still {:?} after {} checks", payment_id, status, n);
                }
                Err(e) => warn!("PIX status check {} for {} failed: {}", n, payment_id, e),
            }
        }
    };

    let result = tokio::time::timeout(settings.timeout, polling).await;
    match result {
        Ok(outcome) => outcome,
        Err(_) => {
            let checks = checks.load(Ordering::Relaxed);
            info!("PIX {} expired after {} checks", payment_id, checks);
            PixOutcome::Expired { checks }
        }
    }
}

/// A running poller owned by the checkout. Dropping or cancelling it stops
/// the timer, so no poll outlives the screen that started it.
pub struct PixWatch {
    payment_id: String,
    handle: Option<JoinHandle<PixOutcome>>,
}

impl PixWatch {
    pub fn spawn(gateway: Arc<dyn CheckoutGateway>, payment_id: String, settings: PixSettings) -> Self {
        let handle = tokio::spawn(poll_until_settled(gateway, payment_id.clone(), settings));
        Self {
            payment_id,
            handle: Some(handle),
        }
    }

    pub fn payment_id(&self) -> &str {
        &self.payment_id
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Lets another task stop the poller while this one awaits it.
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.handle.as_ref().map(JoinHandle::abort_handle)
    }

    /// Waits for the poller. `None` once it was cancelled or already consumed.
    pub async fn outcome(&mut self) -> Option<PixOutcome> {
        let handle = self.handle.as_mut()?;
        let joined = handle.await;
        self.handle = None;

        match joined {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_cancelled() => {
                debug!("PIX watch for {} was cancelled", self.payment_id);
                None
            }
            Err(e) => {
                warn!("PIX watch for {} panicked: {}", self.payment_id, e);
                None
            }
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Stopped PIX polling for {}", self.payment_id);
        }
    }
}

impl Drop for PixWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
