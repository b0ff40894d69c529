//! Initialization of logging and metrics shared by the binaries and the
//! library code of the workspace.
pub mod config;
pub mod metrics;
pub mod tracing;

pub use config::Config;
