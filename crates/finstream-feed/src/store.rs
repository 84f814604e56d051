//! Authoritative market data state.
//!
//! `StateStore` owns every enriched record, the selected symbol set, the
//! notification and error history and the throughput window. Each mutation
//! completes within one `&mut self` call; readers going through
//! [`SharedStore`] therefore never see a tick whose enrichment is stale or a
//! history buffer mid-trim. Aggregate views are computed on each read.

use crate::ring::RecentBuffer;
use crate::throughput::{ThroughputMonitor, MAX_WINDOW_SECS, THROUGHPUT_WINDOW_SECS};
use chrono::{DateTime, Duration, Utc};
use finstream_core::{
    enrich, validate_tick, Clock, EnrichedRecord, ErrorCode, ErrorRecord, MarketStatus,
    NotificationPayload, NotificationRecord, PriceUpdate, RawTick, SystemClock, ValidationError,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum notifications kept.
pub const NOTIFICATION_CAPACITY: usize = 50;
/// Maximum errors kept.
pub const ERROR_CAPACITY: usize = 20;
/// Notifications older than this are not active.
pub const NOTIFICATION_WINDOW_SECS: u64 = 300;
/// Number of errors in the `recent_errors` view.
pub const RECENT_ERROR_COUNT: usize = 5;
/// Symbols selected at startup.
pub const DEFAULT_SYMBOLS: [&str; 5] = ["AAPL", "GOOGL", "MSFT", "TSLA", "NVDA"];

/// Store handle shared between the connection layer and readers.
pub type SharedStore = Arc<RwLock<StateStore>>;

/// Store sizing and windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Symbols in the selected set at startup.
    #[serde(default = "default_symbols")]
    pub default_symbols: Vec<String>,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_error_capacity")]
    pub error_capacity: usize,
    /// Relevance window for `active_notifications`.
    #[serde(default = "default_notification_window_secs")]
    pub notification_window_secs: u64,
    /// Width of the throughput window.
    #[serde(default = "default_throughput_window_secs")]
    pub throughput_window_secs: u64,
    #[serde(default = "default_recent_error_count")]
    pub recent_error_count: usize,
}

fn default_symbols() -> Vec<String> {
    DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

fn default_notification_capacity() -> usize {
    NOTIFICATION_CAPACITY
}

fn default_error_capacity() -> usize {
    ERROR_CAPACITY
}

fn default_notification_window_secs() -> u64 {
    NOTIFICATION_WINDOW_SECS
}

fn default_throughput_window_secs() -> u64 {
    THROUGHPUT_WINDOW_SECS
}

fn default_recent_error_count() -> usize {
    RECENT_ERROR_COUNT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_symbols: default_symbols(),
            notification_capacity: NOTIFICATION_CAPACITY,
            error_capacity: ERROR_CAPACITY,
            notification_window_secs: NOTIFICATION_WINDOW_SECS,
            throughput_window_secs: THROUGHPUT_WINDOW_SECS,
            recent_error_count: RECENT_ERROR_COUNT,
        }
    }
}

/// Throughput and volume summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub symbol_count: usize,
    pub total_updates: u64,
    pub updates_per_second: f64,
    pub last_update: Option<DateTime<Utc>>,
    pub rejected_updates: u64,
    pub buffered_errors: usize,
    /// Notifications accepted since startup, including evicted ones.
    pub notifications_received: u64,
}

/// Market data state store.
pub struct StateStore {
    /// Symbol -> latest enriched record. The raw tick lives inside the
    /// record, so raw and enriched state share one key set.
    records: HashMap<String, EnrichedRecord>,
    /// Symbols in first-arrival order.
    arrival_order: Vec<String>,
    selected: HashSet<String>,
    notifications: RecentBuffer<NotificationRecord>,
    errors: RecentBuffer<ErrorRecord>,
    throughput: ThroughputMonitor,
    total_updates: u64,
    rejected_updates: u64,
    notifications_received: u64,
    last_update: Option<DateTime<Utc>>,
    market_status: Option<MarketStatus>,
    notification_window: Duration,
    recent_error_count: usize,
    clock: Arc<dyn Clock>,
}

impl StateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: HashMap::new(),
            arrival_order: Vec::new(),
            selected: config.default_symbols.iter().cloned().collect(),
            notifications: RecentBuffer::new(config.notification_capacity),
            errors: RecentBuffer::new(config.error_capacity),
            throughput: ThroughputMonitor::new(config.throughput_window_secs),
            total_updates: 0,
            rejected_updates: 0,
            notifications_received: 0,
            last_update: None,
            market_status: None,
            notification_window: Duration::seconds(
                config.notification_window_secs.min(MAX_WINDOW_SECS) as i64,
            ),
            recent_error_count: config.recent_error_count,
            clock,
        }
    }

    /// Wrap in a [`SharedStore`].
    pub fn shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    // ---- mutation ----

    /// Validate and store a tick.
    ///
    /// On success the symbol's record is replaced as a whole. On failure one
    /// `PriceValidationError` record is appended and price state is left
    /// untouched.
    pub fn ingest_tick(&mut self, update: PriceUpdate) -> Result<&EnrichedRecord, ValidationError> {
        let now = self.clock.now();
        let symbol_hint = update.symbol.clone();

        let tick = match validate_tick(update) {
            Ok(tick) => tick,
            Err(e) => {
                self.rejected_updates += 1;
                let mut record = ErrorRecord::new(
                    ErrorCode::PriceValidationError,
                    format!("Invalid price update: {e}"),
                    now,
                );
                if let Some(symbol) = symbol_hint {
                    record = record.with_context("symbol", symbol);
                }
                self.ingest_error(record);
                return Err(e);
            }
        };

        let previous = self.records.get(&tick.symbol).map(|r| &r.tick);
        let record = enrich(tick, previous, now);
        let symbol = record.tick.symbol.clone();

        debug!(
            symbol = %symbol,
            price = record.tick.price,
            trend = %record.trend,
            "Tick accepted"
        );

        if self.records.insert(symbol.clone(), record).is_none() {
            info!(symbol = %symbol, "New symbol on feed");
            self.arrival_order.push(symbol.clone());
        }
        self.total_updates += 1;
        self.last_update = Some(now);
        self.throughput.record(now);

        Ok(&self.records[&symbol])
    }

    /// Validate and store a notification.
    ///
    /// A notification without type or message is dropped and recorded as a
    /// `MessageParseError`.
    pub fn ingest_notification(
        &mut self,
        payload: NotificationPayload,
    ) -> Result<(), ValidationError> {
        let now = self.clock.now();
        match payload.into_record(now) {
            Ok(record) => {
                info!(
                    kind = %record.kind,
                    severity = record.severity.as_str(),
                    message = %record.message,
                    "Notification received"
                );
                self.notifications.push(record);
                self.notifications_received += 1;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Dropping invalid notification");
                self.ingest_error(ErrorRecord::new(
                    ErrorCode::MessageParseError,
                    format!("Invalid notification: {e}"),
                    now,
                ));
                Err(e)
            }
        }
    }

    /// Replace the current market status.
    pub fn update_market_status(&mut self, status: MarketStatus) {
        info!(
            market = %status.market,
            status = ?status.status,
            "Market status updated"
        );
        self.market_status = Some(status);
    }

    /// Append an error record.
    pub fn ingest_error(&mut self, record: ErrorRecord) {
        warn!(
            code = %record.code,
            message = %record.message,
            "Error recorded"
        );
        self.errors.push(record);
    }

    /// Add `symbol` to the selected set if absent, otherwise remove it.
    /// Returns whether the symbol is selected afterwards.
    pub fn toggle_symbol(&mut self, symbol: &str) -> bool {
        if self.selected.remove(symbol) {
            false
        } else {
            self.selected.insert(symbol.to_string());
            true
        }
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn clear_notifications(&mut self) {
        self.notifications.clear();
    }

    // ---- views ----

    /// Current time as seen by the store.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn enriched(&self, symbol: &str) -> Option<&EnrichedRecord> {
        self.records.get(symbol)
    }

    pub fn raw_tick(&self, symbol: &str) -> Option<&RawTick> {
        self.records.get(symbol).map(|r| &r.tick)
    }

    /// Number of symbols with data.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in first-arrival order.
    pub fn records(&self) -> impl Iterator<Item = &EnrichedRecord> {
        self.arrival_order
            .iter()
            .filter_map(|symbol| self.records.get(symbol))
    }

    pub fn is_selected(&self, symbol: &str) -> bool {
        self.selected.contains(symbol)
    }

    /// Selected symbols, sorted.
    pub fn selected_symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.selected.iter().map(String::as_str).collect();
        symbols.sort_unstable();
        symbols
    }

    /// Records whose symbol is selected, in first-arrival order. Selected
    /// symbols without data are absent.
    pub fn selected(&self) -> Vec<&EnrichedRecord> {
        self.records()
            .filter(|r| self.selected.contains(r.symbol()))
            .collect()
    }

    /// Records with positive change, highest change percent first.
    pub fn gainers(&self) -> Vec<&EnrichedRecord> {
        let mut out: Vec<&EnrichedRecord> = self.records().filter(|r| r.change() > 0.0).collect();
        out.sort_by(|a, b| b.change_percent().total_cmp(&a.change_percent()));
        out
    }

    /// Records with negative change, lowest change percent first.
    pub fn losers(&self) -> Vec<&EnrichedRecord> {
        let mut out: Vec<&EnrichedRecord> = self.records().filter(|r| r.change() < 0.0).collect();
        out.sort_by(|a, b| a.change_percent().total_cmp(&b.change_percent()));
        out
    }

    /// All buffered notifications, newest first.
    pub fn notifications(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.notifications.iter()
    }

    /// Notifications stamped within the relevance window ending now.
    pub fn active_notifications(&self) -> Vec<&NotificationRecord> {
        let cutoff = self.clock.now() - self.notification_window;
        self.notifications
            .iter()
            .filter(|n| n.timestamp > cutoff)
            .collect()
    }

    /// All buffered errors, newest first.
    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    /// The newest few errors.
    pub fn recent_errors(&self) -> Vec<&ErrorRecord> {
        self.errors.iter().take(self.recent_error_count).collect()
    }

    pub fn last_error(&self) -> Option<&ErrorRecord> {
        self.errors.newest()
    }

    pub fn market_status(&self) -> Option<&MarketStatus> {
        self.market_status.as_ref()
    }

    pub fn performance_snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            symbol_count: self.records.len(),
            total_updates: self.total_updates,
            updates_per_second: self.throughput.rate(self.clock.now()),
            last_update: self.last_update,
            rejected_updates: self.rejected_updates,
            buffered_errors: self.errors.len(),
            notifications_received: self.notifications_received,
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("symbols", &self.records.len())
            .field("selected", &self.selected.len())
            .field("notifications", &self.notifications.len())
            .field("errors", &self.errors.len())
            .field("total_updates", &self.total_updates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finstream_core::{AnimationState, DisplayColor, ManualClock, MarketState, Severity, Trend};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T14:30:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn test_store() -> (StateStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = StateStore::with_clock(StoreConfig::default(), clock.clone());
        (store, clock)
    }

    fn update(symbol: &str, price: f64, change: f64, change_percent: f64) -> PriceUpdate {
        PriceUpdate::new(symbol, price, change, change_percent)
    }

    #[test]
    fn test_second_tick_scenario() {
        let (mut store, _clock) = test_store();
        store.ingest_tick(update("AAPL", 150.0, 0.0, 0.0)).unwrap();
        let record = store
            .ingest_tick(update("AAPL", 152.30, 2.30, 1.53))
            .unwrap()
            .clone();

        assert_eq!(record.trend, Trend::Up);
        assert_eq!(record.display_color, DisplayColor::Gain);
        assert_eq!(record.formatted.change, "+$2.30");
        assert_eq!(record.formatted.change_percent, "+1.53%");
        assert_eq!(record.previous_price, Some(150.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_trend_follows_accepted_ticks_only() {
        let (mut store, _clock) = test_store();
        store.ingest_tick(update("MSFT", 400.0, 0.0, 0.0)).unwrap();
        // Rejected tick must not become the predecessor.
        assert!(store.ingest_tick(update("MSFT", f64::NAN, 0.0, 0.0)).is_err());
        let record = store.ingest_tick(update("MSFT", 399.0, -1.0, -0.25)).unwrap();

        assert_eq!(record.trend, Trend::Down);
        assert_eq!(record.animation_state, AnimationState::FlashRed);
        assert_eq!(record.previous_price, Some(400.0));
    }

    #[test]
    fn test_first_tick_per_symbol_is_unknown() {
        let (mut store, _clock) = test_store();
        store.ingest_tick(update("AAPL", 150.0, 1.0, 0.5)).unwrap();
        let record = store.ingest_tick(update("GOOGL", 140.0, 1.0, 0.5)).unwrap();
        assert_eq!(record.trend, Trend::Unknown);
        assert_eq!(record.animation_state, AnimationState::Idle);
    }

    #[test]
    fn test_invalid_tick_leaves_state_and_records_one_error() {
        let (mut store, _clock) = test_store();
        store.ingest_tick(update("AAPL", 150.0, 0.0, 0.0)).unwrap();
        let before = store.enriched("AAPL").cloned();

        let mut missing_symbol = update("AAPL", 151.0, 0.0, 0.0);
        missing_symbol.symbol = None;
        let bad = [
            update("AAPL", f64::INFINITY, 0.0, 0.0),
            update("AAPL", 151.0, f64::NAN, 0.0),
            missing_symbol,
            PriceUpdate::default(),
        ];

        for (i, tick) in bad.into_iter().enumerate() {
            assert!(store.ingest_tick(tick).is_err());
            assert_eq!(store.errors().count(), i + 1);
            assert_eq!(store.len(), 1);
            assert_eq!(store.enriched("AAPL").cloned(), before);
        }

        let newest = store.last_error().unwrap();
        assert_eq!(newest.code, ErrorCode::PriceValidationError);
        let snapshot = store.performance_snapshot();
        assert_eq!(snapshot.total_updates, 1);
        assert_eq!(snapshot.rejected_updates, 4);
    }

    #[test]
    fn test_raw_and_enriched_share_keys() {
        let (mut store, _clock) = test_store();
        for (i, symbol) in ["AAPL", "TSLA", "AAPL", "NVDA"].iter().enumerate() {
            store
                .ingest_tick(update(symbol, 100.0 + i as f64, 0.0, 0.0))
                .unwrap();
        }
        for symbol in ["AAPL", "TSLA", "NVDA"] {
            assert_eq!(store.raw_tick(symbol).map(|t| t.symbol.as_str()), Some(symbol));
            assert!(store.enriched(symbol).is_some());
        }
        assert!(store.raw_tick("MSFT").is_none());
        assert!(store.enriched("MSFT").is_none());
        assert_eq!(store.raw_tick("AAPL").unwrap().price, 102.0);
    }

    #[test]
    fn test_selected_view_and_toggle() {
        let (mut store, _clock) = test_store();
        assert!(store.is_selected("AAPL"));
        assert_eq!(
            store.selected_symbols(),
            vec!["AAPL", "GOOGL", "MSFT", "NVDA", "TSLA"]
        );

        store.ingest_tick(update("AMZN", 180.0, 0.0, 0.0)).unwrap();
        store.ingest_tick(update("AAPL", 150.0, 0.0, 0.0)).unwrap();
        let selected: Vec<&str> = store.selected().iter().map(|r| r.symbol()).collect();
        assert_eq!(selected, vec!["AAPL"]);

        assert!(store.toggle_symbol("AMZN"));
        assert!(!store.toggle_symbol("AAPL"));
        let selected: Vec<&str> = store.selected().iter().map(|r| r.symbol()).collect();
        assert_eq!(selected, vec!["AMZN"]);

        // Membership does not touch stored records.
        assert!(store.enriched("AAPL").is_some());
    }

    #[test]
    fn test_gainers_and_losers() {
        let (mut store, _clock) = test_store();
        store.ingest_tick(update("AAPL", 150.0, 2.0, 1.3)).unwrap();
        store.ingest_tick(update("MSFT", 400.0, 12.0, 3.1)).unwrap();
        store.ingest_tick(update("TSLA", 180.0, -3.0, -1.6)).unwrap();
        store.ingest_tick(update("NVDA", 900.0, -40.0, -4.2)).unwrap();
        store.ingest_tick(update("GOOGL", 140.0, 0.0, 0.0)).unwrap();

        let gainers: Vec<&str> = store.gainers().iter().map(|r| r.symbol()).collect();
        let losers: Vec<&str> = store.losers().iter().map(|r| r.symbol()).collect();
        assert_eq!(gainers, vec!["MSFT", "AAPL"]);
        assert_eq!(losers, vec!["NVDA", "TSLA"]);
        assert!(gainers.iter().all(|g| !losers.contains(g)));
    }

    #[test]
    fn test_notification_buffer_cap() {
        let (mut store, _clock) = test_store();
        for i in 0..60 {
            let payload = NotificationPayload::new("INFO", &format!("n{i}"), Severity::Info);
            store.ingest_notification(payload).unwrap();
        }
        let messages: Vec<&str> = store.notifications().map(|n| n.message.as_str()).collect();
        assert_eq!(messages.len(), NOTIFICATION_CAPACITY);
        assert_eq!(messages[0], "n59");
        assert_eq!(messages[49], "n10");
        assert_eq!(store.performance_snapshot().notifications_received, 60);
    }

    #[test]
    fn test_error_buffer_cap_and_recent() {
        let (mut store, _clock) = test_store();
        let now = store.now();
        for i in 0..25 {
            store.ingest_error(ErrorRecord::new(ErrorCode::NetworkError, format!("e{i}"), now));
        }
        assert_eq!(store.errors().count(), ERROR_CAPACITY);
        let recent: Vec<&str> = store
            .recent_errors()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(recent, vec!["e24", "e23", "e22", "e21", "e20"]);

        store.clear_errors();
        assert!(store.recent_errors().is_empty());
    }

    #[test]
    fn test_invalid_notification_is_dropped() {
        let (mut store, _clock) = test_store();
        let payload = NotificationPayload::new("", "hello", Severity::Info);
        assert!(store.ingest_notification(payload).is_err());
        assert_eq!(store.notifications().count(), 0);
        assert_eq!(store.last_error().unwrap().code, ErrorCode::MessageParseError);
        assert_eq!(store.performance_snapshot().notifications_received, 0);
    }

    #[test]
    fn test_market_status_is_replaced() {
        let (mut store, _clock) = test_store();
        assert!(store.market_status().is_none());

        let mut status = MarketStatus {
            market: "NYSE".to_string(),
            status: MarketState::PreMarket,
            next_open: Some(t0()),
            next_close: None,
            timezone: "America/New_York".to_string(),
        };
        store.update_market_status(status.clone());
        status.status = MarketState::Open;
        status.next_open = None;
        store.update_market_status(status);

        let current = store.market_status().unwrap();
        assert_eq!(current.status, MarketState::Open);
        assert_eq!(current.next_open, None);
    }

    #[test]
    fn test_active_notifications_window() {
        let (mut store, clock) = test_store();
        let old = NotificationPayload::new("A", "old", Severity::Info)
            .with_timestamp(t0() - Duration::minutes(10));
        let fresh = NotificationPayload::new("B", "fresh", Severity::Warning)
            .with_timestamp(t0() - Duration::minutes(1));
        store.ingest_notification(old).unwrap();
        store.ingest_notification(fresh).unwrap();

        let active: Vec<&str> = store
            .active_notifications()
            .iter()
            .map(|n| n.message.as_str())
            .collect();
        assert_eq!(active, vec!["fresh"]);

        // Relative to read time, not ingest time.
        clock.advance(Duration::minutes(5));
        assert!(store.active_notifications().is_empty());
        assert_eq!(store.notifications().count(), 2);

        store.clear_notifications();
        assert_eq!(store.notifications().count(), 0);
    }

    #[test]
    fn test_performance_snapshot() {
        let (mut store, clock) = test_store();
        assert_eq!(store.performance_snapshot().last_update, None);

        for i in 0..20 {
            store
                .ingest_tick(update("AAPL", 150.0 + i as f64, 0.0, 0.0))
                .unwrap();
            clock.advance(Duration::milliseconds(250));
        }
        store.ingest_tick(update("TSLA", 180.0, 0.0, 0.0)).unwrap();

        let snapshot = store.performance_snapshot();
        assert_eq!(snapshot.symbol_count, 2);
        assert_eq!(snapshot.total_updates, 21);
        assert!((snapshot.updates_per_second - 2.1).abs() < 1e-9);
        assert_eq!(snapshot.last_update, Some(t0() + Duration::seconds(5)));

        clock.advance(Duration::seconds(11));
        assert_eq!(store.performance_snapshot().updates_per_second, 0.0);
    }

    #[test]
    fn test_store_config_partial_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"default_symbols": ["AMZN"]}"#).unwrap();
        assert_eq!(config.default_symbols, vec!["AMZN".to_string()]);
        assert_eq!(config.notification_capacity, NOTIFICATION_CAPACITY);
        assert_eq!(config.notification_window_secs, 300);

        let store = StateStore::new(config);
        assert!(store.is_selected("AMZN"));
        assert!(!store.is_selected("AAPL"));
    }

    #[test]
    fn test_oversized_notification_window_is_clamped() {
        let clock = Arc::new(ManualClock::new(t0()));
        let config = StoreConfig {
            notification_window_secs: u64::MAX,
            throughput_window_secs: u64::MAX,
            ..Default::default()
        };
        let mut store = StateStore::with_clock(config, clock);
        let payload = NotificationPayload::new("A", "day old", Severity::Info)
            .with_timestamp(t0() - Duration::hours(23));
        store.ingest_notification(payload).unwrap();
        assert_eq!(store.active_notifications().len(), 1);
    }
}
