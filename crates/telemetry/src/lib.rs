//! Internal telemetry for the terminal-session gateway.
//!
//! Metrics and health live in process; structured logs go through `tracing`.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
