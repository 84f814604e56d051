//! Price tick data shapes.
//!
//! `PriceUpdate` is a frame from the price topic as it arrives: every field is
//! optional so that incomplete ticks reach validation instead of failing to
//! decode. `RawTick` is a tick that passed validation, and `EnrichedRecord`
//! carries the display metadata derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Price update as received from the broadcaster.
///
/// Numbers may arrive as JSON numbers or numeric strings. The broadcaster's
/// own field names (`high`, `low`, `timestamp`, `source`, `processedAt`) are
/// accepted as aliases.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub change: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub change_percent: Option<f64>,
    #[serde(default, alias = "high", deserialize_with = "lenient_f64")]
    pub day_high: Option<f64>,
    #[serde(default, alias = "low", deserialize_with = "lenient_f64")]
    pub day_low: Option<f64>,
    #[serde(default, alias = "timestamp", deserialize_with = "lenient_string")]
    pub source_timestamp: Option<String>,
    #[serde(default, alias = "source", deserialize_with = "lenient_string")]
    pub source_id: Option<String>,
    #[serde(default, alias = "processedAt", deserialize_with = "lenient_string")]
    pub ingest_timestamp: Option<String>,
}

impl PriceUpdate {
    /// Convenience constructor for a complete update.
    pub fn new(symbol: &str, price: f64, change: f64, change_percent: f64) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            price: Some(price),
            change: Some(change),
            change_percent: Some(change_percent),
            day_high: Some(price),
            day_low: Some(price),
            ..Default::default()
        }
    }

    /// Set day high/low.
    pub fn with_range(mut self, day_high: f64, day_low: f64) -> Self {
        self.day_high = Some(day_high);
        self.day_low = Some(day_low);
        self
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// A validated tick. Built by [`crate::validate_tick`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTick {
    pub symbol: String,
    pub price: f64,
    /// Change versus previous close.
    pub change: f64,
    /// Whole-number percentage (1.45 means 1.45%).
    pub change_percent: f64,
    pub day_high: f64,
    pub day_low: f64,
    pub source_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub ingest_timestamp: String,
}

/// Price direction versus the previous accepted tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Neutral,
    Unknown,
}

/// Visual pulse requested by the most recent update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnimationState {
    Idle,
    Updating,
    FlashGreen,
    FlashRed,
}

/// Color class of a record, from the tick's own change field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayColor {
    Gain,
    Loss,
    Neutral,
    Warning,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Neutral => write!(f, "neutral"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::fmt::Display for AnimationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Updating => write!(f, "updating"),
            Self::FlashGreen => write!(f, "flash-green"),
            Self::FlashRed => write!(f, "flash-red"),
        }
    }
}

/// Pre-formatted display strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedPrice {
    /// e.g. `$150.25`
    pub price: String,
    /// e.g. `+$2.15`, `-$1.20`
    pub change: String,
    /// e.g. `+1.45%`, `-0.82%`
    pub change_percent: String,
    pub high: String,
    pub low: String,
}

/// A tick together with its derived display metadata.
///
/// Replaced as a whole on every accepted tick for its symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub tick: RawTick,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_price: Option<f64>,
    pub trend: Trend,
    pub animation_state: AnimationState,
    pub display_color: DisplayColor,
    /// Local receipt time.
    pub last_updated: DateTime<Utc>,
    pub formatted: FormattedPrice,
}

impl EnrichedRecord {
    pub fn symbol(&self) -> &str {
        &self.tick.symbol
    }

    pub fn change(&self) -> f64 {
        self.tick.change
    }

    pub fn change_percent(&self) -> f64 {
        self.tick.change_percent
    }
}
