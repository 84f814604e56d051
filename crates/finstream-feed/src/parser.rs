//! Frame decoding for the price and notification topics.
//!
//! A body must be a JSON object. Beyond that, price frames decode leniently
//! (see `PriceUpdate`) so that a tick with a missing or garbled field is
//! rejected by validation rather than as a parse error.

use crate::error::{FeedError, FeedResult};
use finstream_core::{NotificationPayload, PriceUpdate};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Destination carrying price ticks.
pub const PRICE_TOPIC: &str = "/topic/stocks/prices";
/// Destination carrying system notifications.
pub const NOTIFICATION_TOPIC: &str = "/topic/system/notifications";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Price(PriceUpdate),
    Notification(NotificationPayload),
}

/// Decode a price topic body.
pub fn decode_price_update(body: &str) -> FeedResult<PriceUpdate> {
    decode_object(body)
}

/// Decode a notification topic body.
pub fn decode_notification(body: &str) -> FeedResult<NotificationPayload> {
    decode_object(body)
}

fn decode_object<T: DeserializeOwned>(body: &str) -> FeedResult<T> {
    let value: Value = serde_json::from_str(body)?;
    if !value.is_object() {
        return Err(FeedError::InvalidData(format!(
            "expected JSON object, got {}",
            json_kind(&value)
        )));
    }
    Ok(serde_json::from_value(value)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Routes frames to a decoder by destination.
#[derive(Debug, Clone)]
pub struct MessageParser {
    price_topic: String,
    notification_topic: String,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::with_topics(PRICE_TOPIC, NOTIFICATION_TOPIC)
    }

    pub fn with_topics(price_topic: &str, notification_topic: &str) -> Self {
        Self {
            price_topic: price_topic.to_string(),
            notification_topic: notification_topic.to_string(),
        }
    }

    /// Destinations to subscribe to, price topic first.
    pub fn topics(&self) -> [&str; 2] {
        [self.price_topic.as_str(), self.notification_topic.as_str()]
    }

    /// Decode a frame. Returns `Ok(None)` for destinations this parser does
    /// not handle.
    pub fn parse(&self, destination: &str, body: &str) -> FeedResult<Option<InboundMessage>> {
        if destination == self.price_topic {
            decode_price_update(body).map(|u| Some(InboundMessage::Price(u)))
        } else if destination == self.notification_topic {
            decode_notification(body).map(|n| Some(InboundMessage::Notification(n)))
        } else {
            debug!(destination, "Ignoring frame for unknown destination");
            Ok(None)
        }
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}
