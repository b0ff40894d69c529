//! Contract bindings of the sealed-bid auction ledger.
pub mod alloy;
