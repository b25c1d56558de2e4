//! Observability: structured logging and optional Prometheus counters.
//!
//! - Structured logging with configurable formats (pretty, compact, JSON)
//! - Prometheus counters for mapping outcomes, access decisions and
//!   reconciliations

pub mod metrics;
#[cfg(feature = "server")]
mod tracing_init;

#[cfg(feature = "server")]
pub use tracing_init::*;
