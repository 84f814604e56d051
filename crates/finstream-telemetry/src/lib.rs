//! Prometheus metrics and structured logging for FinStream.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for connection lifecycle and feed throughput

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
