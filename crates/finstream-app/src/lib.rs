//! FinStream market data sync engine.
//!
//! Wires the state store, the connection manager and telemetry into one
//! event loop:
//! - Configuration from TOML
//! - Engine events applied in arrival order
//! - Periodic performance log

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, MetricsSync};
pub use config::{AppConfig, AuthConfig, StatsConfig};
pub use error::{AppError, AppResult};
