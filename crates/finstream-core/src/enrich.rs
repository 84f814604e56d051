//! Tick validation and display derivations.
//!
//! All functions here are pure. `trend` and `animation_state` compare the
//! price against the previous accepted tick for the same symbol, while
//! `display_color` only looks at the tick's own `change` (versus previous
//! close). The two can disagree and are kept independent.

use crate::error::ValidationError;
use crate::format::{format_percent, format_signed_usd, format_usd};
use crate::tick::{
    AnimationState, DisplayColor, EnrichedRecord, FormattedPrice, PriceUpdate, RawTick, Trend,
};
use chrono::{DateTime, Utc};

/// Validate an inbound update into a `RawTick`.
///
/// Requires a non-empty symbol and finite price, change, change percent and
/// day range. Price must not be negative.
pub fn validate_tick(update: PriceUpdate) -> Result<RawTick, ValidationError> {
    let symbol = update
        .symbol
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingSymbol)?;

    let price = require_finite("price", update.price)?;
    if price < 0.0 {
        return Err(ValidationError::NegativePrice(price));
    }

    Ok(RawTick {
        symbol,
        price,
        change: require_finite("change", update.change)?,
        change_percent: require_finite("changePercent", update.change_percent)?,
        day_high: require_finite("dayHigh", update.day_high)?,
        day_low: require_finite("dayLow", update.day_low)?,
        source_timestamp: update.source_timestamp.unwrap_or_default(),
        source_id: update.source_id,
        ingest_timestamp: update.ingest_timestamp.unwrap_or_default(),
    })
}

fn require_finite(field: &'static str, value: Option<f64>) -> Result<f64, ValidationError> {
    match value {
        None => Err(ValidationError::MissingField(field)),
        Some(v) if !v.is_finite() => Err(ValidationError::NonFinite { field, value: v }),
        Some(v) => Ok(v),
    }
}

/// Direction of the price versus the previous tick.
pub fn trend(current: &RawTick, previous: Option<&RawTick>) -> Trend {
    let Some(previous) = previous else {
        return Trend::Unknown;
    };
    if current.price > previous.price {
        Trend::Up
    } else if current.price < previous.price {
        Trend::Down
    } else {
        Trend::Neutral
    }
}

/// Pulse for this update cycle. There is no decay timer: the value holds
/// until the next tick for the symbol recomputes it.
pub fn animation_state(current: &RawTick, previous: Option<&RawTick>) -> AnimationState {
    match trend(current, previous) {
        Trend::Unknown => AnimationState::Idle,
        Trend::Up => AnimationState::FlashGreen,
        Trend::Down => AnimationState::FlashRed,
        Trend::Neutral => AnimationState::Updating,
    }
}

/// Color class from the tick's own change field.
pub fn display_color(tick: &RawTick) -> DisplayColor {
    if tick.change > 0.0 {
        DisplayColor::Gain
    } else if tick.change < 0.0 {
        DisplayColor::Loss
    } else {
        DisplayColor::Neutral
    }
}

/// Display strings. `change_percent` is a whole-number percentage and is
/// scaled to a ratio before percent formatting.
pub fn format_tick(tick: &RawTick) -> FormattedPrice {
    FormattedPrice {
        price: format_usd(tick.price),
        change: format_signed_usd(tick.change),
        change_percent: format_percent(tick.change_percent / 100.0),
        high: format_usd(tick.day_high),
        low: format_usd(tick.day_low),
    }
}

/// Build the enriched record for `tick`, given the previous accepted tick for
/// the same symbol.
pub fn enrich(
    tick: RawTick,
    previous: Option<&RawTick>,
    received_at: DateTime<Utc>,
) -> EnrichedRecord {
    EnrichedRecord {
        previous_price: previous.map(|p| p.price),
        trend: trend(&tick, previous),
        animation_state: animation_state(&tick, previous),
        display_color: display_color(&tick),
        last_updated: received_at,
        formatted: format_tick(&tick),
        tick,
    }
}
