use std::sync::Arc;

use encore_core::{InstallmentOption, PaymentMethodKind};
use encore_pricing::installments::normalize_bin;
use encore_pricing::{InstallmentEngine, InstallmentQuery};
use encore_shared::mask_card_number;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::client::{CheckoutGateway, GatewayFinancing};

/// Work order for one BIN → method → installments lookup.
///
/// Carries the input version it was issued for; results are only applied
/// while that version is still current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTicket {
    pub version: u64,
    pub bin: String,
    pub amount: Decimal,
    pub kind: PaymentMethodKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardResolution {
    pub version: u64,
    pub payment_method_id: Option<String>,
    pub installments: Vec<InstallmentOption>,
}

/// Card form state as the shopper types.
#[derive(Debug, Clone)]
pub struct CardInput {
    number: String,
    bin: Option<String>,
    amount: Decimal,
    kind: PaymentMethodKind,
    version: u64,
    payment_method_id: Option<String>,
    installments: Vec<InstallmentOption>,
}

impl CardInput {
    pub fn new(amount: Decimal, kind: PaymentMethodKind) -> Self {
        Self {
            number: String::new(),
            bin: None,
            amount,
            kind,
            version: 0,
            payment_method_id: None,
            installments: Vec::new(),
        }
    }

    /// Keystroke in the card number field. Returns a ticket only when the
    /// BIN actually changed to a complete one.
    pub fn on_number_input(&mut self, raw: &str) -> Option<LookupTicket> {
        self.number = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let bin = normalize_bin(&self.number);
        if bin == self.bin {
            return None;
        }

        self.bin = bin;
        self.invalidate();
        self.ticket()
    }

    pub fn on_amount_change(&mut self, amount: Decimal) -> Option<LookupTicket> {
        if amount == self.amount {
            return None;
        }
        self.amount = amount;
        self.invalidate();
        self.ticket()
    }

    pub fn on_kind_change(&mut self, kind: PaymentMethodKind) -> Option<LookupTicket> {
        if kind == self.kind {
            return None;
        }
        self.kind = kind;
        self.invalidate();
        self.ticket()
    }

    /// Applies a finished lookup. Stale results are dropped and `false` returned.
    pub fn apply(&mut self, resolution: CardResolution) -> bool {
        if resolution.version != self.version {
            debug!(
                "Dropping lookup for input version {} (current {})",
                resolution.version, self.version
            );
            return false;
        }
        self.payment_method_id = resolution.payment_method_id;
        self.installments = resolution.installments;
        true
    }

    pub fn bin(&self) -> Option<&str> {
        self.bin.as_deref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn payment_method_id(&self) -> Option<&str> {
        self.payment_method_id.as_deref()
    }

    pub fn installments(&self) -> &[InstallmentOption] {
        &self.installments
    }

    /// Loggable form of the number typed so far.
    pub fn masked_number(&self) -> String {
        mask_card_number(&self.number)
    }

    fn invalidate(&mut self) {
        self.version += 1;
        self.payment_method_id = None;
        self.installments.clear();
    }

    fn ticket(&self) -> Option<LookupTicket> {
        self.bin.as_ref().map(|bin| LookupTicket {
            version: self.version,
            bin: bin.clone(),
            amount: self.amount,
            kind: self.kind,
        })
    }
}

/// Resolves a BIN to a method id such as `visa`.
///
/// `None` means "not enough information": a short BIN, a kind we do not
/// detect, or a failed lookup.
pub async fn detect_payment_method(
    gateway: &dyn CheckoutGateway,
    bin: &str,
    kind: PaymentMethodKind,
    detect_debit_bins: bool,
) -> Option<String> {
    if bin.len() != 6 || !bin.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let detects = match kind {
        PaymentMethodKind::Credit => true,
        PaymentMethodKind::Debit => detect_debit_bins,
        _ => false,
    };
    if !detects {
        return None;
    }

    match gateway.payment_method_for_bin(bin, kind).await {
        Ok(method) => method,
        Err(e) => {
            warn!("BIN lookup for {} failed: {}", bin, e);
            None
        }
    }
}

/// The chained BIN → method → installments lookup.
pub struct CardPipeline {
    gateway: Arc<dyn CheckoutGateway>,
    engine: InstallmentEngine,
    detect_debit_bins: bool,
}

impl CardPipeline {
    pub fn new(gateway: Arc<dyn CheckoutGateway>, detect_debit_bins: bool) -> Self {
        let engine = InstallmentEngine::new(Arc::new(GatewayFinancing(gateway.clone())));
        Self {
            gateway,
            engine,
            detect_debit_bins,
        }
    }

    pub async fn resolve(&self, ticket: LookupTicket) -> CardResolution {
        let payment_method_id =
            detect_payment_method(self.gateway.as_ref(), &ticket.bin, ticket.kind, self.detect_debit_bins).await;

        // Debit is always a single charge.
        let installments = if ticket.kind == PaymentMethodKind::Credit {
            let mut query = InstallmentQuery::new(ticket.amount).with_bin(&ticket.bin);
            if let Some(method) = payment_method_id.as_deref() {
                query = query.with_payment_method(method);
            }
            self.engine.get_installments(&query).await
        } else {
            Vec::new()
        };

        CardResolution {
            version: ticket.version,
            payment_method_id,
            installments,
        }
    }
}
