pub mod money;
pub mod installments;
pub mod reconcile;

pub use installments::{FinancingKey, FinancingSource, InstallmentEngine, InstallmentQuery};
pub use reconcile::{compute_totals, ReconcileError, Totals};
