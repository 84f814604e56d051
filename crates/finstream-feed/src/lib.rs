//! Market data state for FinStream.
//!
//! Decodes frames from the price and notification topics and folds them into
//! a single `StateStore`, which owns the enriched records, the selected
//! symbol set, the notification/error history and the throughput window.

pub mod error;
pub mod parser;
pub mod ring;
pub mod store;
pub mod throughput;

pub use error::{FeedError, FeedResult};
pub use parser::{
    decode_notification, decode_price_update, InboundMessage, MessageParser, NOTIFICATION_TOPIC,
    PRICE_TOPIC,
};
pub use ring::RecentBuffer;
pub use store::{PerformanceSnapshot, SharedStore, StateStore, StoreConfig};
pub use throughput::{ThroughputMonitor, MAX_WINDOW_SECS};
