pub mod pii;
pub mod models;

pub use pii::{mask_card_number, Masked};
