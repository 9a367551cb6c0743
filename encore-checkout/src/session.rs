use chrono::{DateTime, Utc};
use encore_core::{Address, CartItem, PaymentMethodKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CheckoutError;

/// Where the shopper is in checkout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutStep {
    Address,
    Payment,
    Processing,
    /// PIX charge issued, waiting for confirmation.
    AwaitingPix,
    /// Handed over to the hosted checkout page.
    Redirected,
    Succeeded,
    Failed,
    Pending,
}

impl CheckoutStep {
    fn name(self) -> String {
        format!("{:?}", self).to_uppercase()
    }
}

/// In-memory checkout state for one shopper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: Uuid,
    pub step: CheckoutStep,
    pub selected_address: Option<Address>,
    pub payment_method: Option<PaymentMethodKind>,
    pub installments: Option<u32>,
    pub cart_snapshot: Vec<CartItem>,
    pub coupon_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    pub fn new(cart_snapshot: Vec<CartItem>, coupon_code: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            step: CheckoutStep::Address,
            selected_address: None,
            payment_method: None,
            installments: None,
            cart_snapshot,
            coupon_code: coupon_code
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition: Address → Payment (address validated)
    pub fn commit_address(&mut self, address: Address) -> Result<(), CheckoutError> {
        if self.step != CheckoutStep::Address {
            return Err(self.invalid(CheckoutStep::Payment));
        }

        let missing = address.missing_fields();
        if !missing.is_empty() {
            return Err(CheckoutError::IncompleteAddress(missing));
        }

        self.selected_address = Some(address);
        self.move_to(CheckoutStep::Payment);
        Ok(())
    }

    /// Transition: Payment/Failed → Address
    pub fn back_to_address(&mut self) -> Result<(), CheckoutError> {
        if !matches!(self.step, CheckoutStep::Payment | CheckoutStep::Failed) {
            return Err(self.invalid(CheckoutStep::Address));
        }
        self.move_to(CheckoutStep::Address);
        Ok(())
    }

    pub fn choose_method(&mut self, method: PaymentMethodKind) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Payment)?;
        if self.payment_method != Some(method) {
            self.installments = None;
        }
        self.payment_method = Some(method);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn choose_installments(&mut self, installments: u32) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Payment)?;
        if self.payment_method != Some(PaymentMethodKind::Credit) && installments != 1 {
            return Err(CheckoutError::InstallmentsNotAllowed);
        }
        if installments == 0 {
            return Err(CheckoutError::InstallmentsNotAllowed);
        }
        self.installments = Some(installments);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Transition: Payment → Processing (address committed, method chosen)
    pub fn begin_processing(&mut self) -> Result<PaymentMethodKind, CheckoutError> {
        if self.step != CheckoutStep::Payment {
            return Err(self.invalid(CheckoutStep::Processing));
        }
        if self.selected_address.is_none() {
            return Err(CheckoutError::NoAddress);
        }
        let method = self.payment_method.ok_or(CheckoutError::NoPaymentMethod)?;
        self.move_to(CheckoutStep::Processing);
        Ok(method)
    }

    /// Transition: Processing → Payment after a retryable error
    pub fn abort_processing(&mut self) {
        if matches!(self.step, CheckoutStep::Processing | CheckoutStep::AwaitingPix) {
            self.move_to(CheckoutStep::Payment);
        }
    }

    /// Transition: Processing → AwaitingPix
    pub fn await_pix(&mut self) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Processing)?;
        self.move_to(CheckoutStep::AwaitingPix);
        Ok(())
    }

    /// Transition: AwaitingPix → Payment (shopper left the QR view)
    pub fn leave_pix(&mut self) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::AwaitingPix)?;
        self.move_to(CheckoutStep::Payment);
        Ok(())
    }

    /// Transition: Processing/AwaitingPix → outcome
    pub fn settle(&mut self, outcome: CheckoutStep) -> Result<(), CheckoutError> {
        let settles = matches!(
            outcome,
            CheckoutStep::Succeeded | CheckoutStep::Failed | CheckoutStep::Pending | CheckoutStep::Redirected
        );
        if !settles || !matches!(self.step, CheckoutStep::Processing | CheckoutStep::AwaitingPix) {
            return Err(self.invalid(outcome));
        }
        self.move_to(outcome);
        Ok(())
    }

    /// Transition: Failed → Payment. Address and items are kept.
    pub fn retry(&mut self) -> Result<(), CheckoutError> {
        self.require_step(CheckoutStep::Failed)?;
        self.move_to(CheckoutStep::Payment);
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.step,
            CheckoutStep::Succeeded | CheckoutStep::Pending | CheckoutStep::Redirected
        )
    }

    fn require_step(&self, expected: CheckoutStep) -> Result<(), CheckoutError> {
        if self.step != expected {
            return Err(CheckoutError::InvalidTransition {
                from: self.step.name(),
                to: expected.name(),
            });
        }
        Ok(())
    }

    fn invalid(&self, to: CheckoutStep) -> CheckoutError {
        CheckoutError::InvalidTransition {
            from: self.step.name(),
            to: to.name(),
        }
    }

    fn move_to(&mut self, step: CheckoutStep) {
        self.step = step;
        self.updated_at = Utc::now();
    }
}
