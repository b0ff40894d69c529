//! Client-side orchestration of sealed-bid auctions whose state lives on an
//! EVM ledger and whose bids are encrypted by an external service.

pub mod arguments;
pub mod config;
pub mod domain;
pub mod encryption;
pub mod ledger;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod run;

pub use run::{run, start};
