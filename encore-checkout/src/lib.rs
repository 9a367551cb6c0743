pub mod card;
pub mod client;
pub mod hints;
pub mod landing;
pub mod orchestrator;
pub mod pix;
pub mod session;

#[cfg(test)]
mod testing;

use std::time::Duration;

use encore_core::{CoreError, PaymentMethodKind, PaymentStatus};
use encore_pricing::{ReconcileError, Totals};
use encore_store::app_config::CheckoutConfig;
use serde::{Deserialize, Serialize};

pub use card::{CardInput, CardPipeline, CardResolution, LookupTicket};
pub use client::{CheckoutGateway, GatewayError, GatewayFinancing, GatewayResponse, HttpCheckoutGateway};
pub use landing::{LandingOutcome, RedirectLanding, RedirectParams};
pub use orchestrator::{CardPayment, CheckoutDeps, CheckoutOrchestrator, HostedRedirect, PixCharge, PixSubmission};
pub use pix::{PixOutcome, PixSettings, PixWatch};
pub use session::{CheckoutSession, CheckoutStep};

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Address is missing: {}", .0.join(", "))]
    IncompleteAddress(Vec<&'static str>),

    #[error("No address selected")]
    NoAddress,

    #[error("No payment method chosen")]
    NoPaymentMethod,

    #[error("Installments are only available for credit cards")]
    InstallmentsNotAllowed,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("{0:?} payments cannot be submitted this way")]
    WrongMethod(PaymentMethodKind),

    #[error("No PIX charge is awaiting payment")]
    NoPendingPix,

    #[error("PIX polling was cancelled")]
    Cancelled,

    /// Could not reach the gateway. The same attempt may be resubmitted.
    #[error("Payment service unavailable: {0}")]
    Transport(String),

    #[error("Unexpected gateway response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl CheckoutError {
    /// Errors the shopper can retry without changing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<GatewayError> for CheckoutError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Transport(message) => CheckoutError::Transport(message),
            GatewayError::Status { status, body } if status >= 500 => {
                CheckoutError::Transport(format!("{}: {}", status, body))
            }
            other => CheckoutError::UnexpectedResponse(other.to_string()),
        }
    }
}

/// How a submitted payment ended, from the shopper's point of view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckoutOutcome {
    Success {
        payment_id: String,
        totals: Totals,
    },
    /// The gateway said no. A normal outcome, not an error.
    Failure {
        payment_id: Option<String>,
        status: PaymentStatus,
        status_detail: Option<String>,
        hint: &'static str,
    },
    Pending {
        payment_id: String,
        status: PaymentStatus,
    },
    /// The PIX window closed before the payment was confirmed.
    Expired {
        payment_id: String,
        checks: u32,
    },
}

impl CheckoutOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Return URLs for the hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackUrls {
    pub success: String,
    pub failure: String,
    pub pending: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub pix_poll_interval: Duration,
    pub pix_timeout: Duration,
    /// Run BIN detection for debit cards too.
    pub detect_debit_bins: bool,
    pub back_urls: BackUrls,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            pix_poll_interval: Duration::from_secs(3),
            pix_timeout: Duration::from_secs(600),
            detect_debit_bins: false,
            back_urls: BackUrls {
                success: "http://localhost:3000/checkout/sucesso".to_string(),
                failure: "http://localhost:3000/checkout/falha".to_string(),
                pending: "http://localhost:3000/checkout/pendente".to_string(),
            },
        }
    }
}

impl CheckoutSettings {
    pub fn pix(&self) -> PixSettings {
        PixSettings {
            interval: self.pix_poll_interval,
            timeout: self.pix_timeout,
        }
    }
}

impl From<&CheckoutConfig> for CheckoutSettings {
    fn from(config: &CheckoutConfig) -> Self {
        let base = config.storefront_url.trim_end_matches('/');
        Self {
            pix_poll_interval: Duration::from_secs(config.pix_poll_interval_seconds),
            pix_timeout: Duration::from_secs(config.pix_timeout_seconds),
            detect_debit_bins: config.detect_debit_bins,
            back_urls: BackUrls {
                success: format!("{}/checkout/sucesso", base),
                failure: format!("{}/checkout/falha", base),
                pending: format!("{}/checkout/pendente", base),
            },
        }
    }
}
