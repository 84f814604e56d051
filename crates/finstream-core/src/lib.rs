//! Core domain types for FinStream market data.
//!
//! This crate provides the data shapes shared by the feed and the connection layer:
//! - `PriceUpdate` / `RawTick` / `EnrichedRecord`: a tick before validation,
//!   after validation, and with display metadata attached
//! - `enrich`: pure derivations (trend, animation, color, formatted strings)
//! - `ErrorRecord` / `NotificationRecord`: entries of the bounded history buffers
//! - `Clock`: time source for everything that reads "now"

pub mod clock;
pub mod enrich;
pub mod error;
pub mod format;
pub mod record;
pub mod tick;

pub use clock::{Clock, ManualClock, SystemClock};
pub use enrich::{animation_state, display_color, enrich, format_tick, trend, validate_tick};
pub use error::{CoreError, CoreResult, ValidationError};
pub use record::{
    parse_timestamp, Context, ErrorCode, ErrorRecord, MarketState, MarketStatus,
    NotificationAction, NotificationPayload, NotificationRecord, Severity,
};
pub use tick::{
    AnimationState, DisplayColor, EnrichedRecord, FormattedPrice, PriceUpdate, RawTick, Trend,
};
