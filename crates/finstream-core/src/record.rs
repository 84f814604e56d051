//! Error and notification history records.

use crate::error::{CoreError, CoreResult, ValidationError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form structured context attached to a record.
pub type Context = serde_json::Map<String, Value>;

/// Error taxonomy for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    TransportConnectionFailed,
    TransportAuthenticationFailed,
    MessageParseError,
    PriceValidationError,
    NetworkError,
    CredentialExpired,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportConnectionFailed => "TRANSPORT_CONNECTION_FAILED",
            Self::TransportAuthenticationFailed => "TRANSPORT_AUTHENTICATION_FAILED",
            Self::MessageParseError => "MESSAGE_PARSE_ERROR",
            Self::PriceValidationError => "PRICE_VALIDATION_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Whether the caller should refresh credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::TransportAuthenticationFailed | Self::CredentialExpired
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the error history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub code: ErrorCode,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

impl ErrorRecord {
    pub fn new(code: ErrorCode, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            code,
            message: message.into(),
            timestamp,
            context: None,
        }
    }

    /// Attach one context entry.
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(Context::new)
            .insert(key.to_string(), value.into());
        self
    }
}

/// Notification severity for UI styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Success,
    /// Also taken for unknown values.
    #[default]
    #[serde(other)]
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Success => "success",
        }
    }
}

/// Optional action button attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub label: String,
    pub handler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Context>,
}

/// Notification as received on the notification topic.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NotificationPayload {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub action: Option<NotificationAction>,
    /// Unrecognised fields, kept as context.
    #[serde(flatten)]
    pub extra: Context,
}

impl NotificationPayload {
    pub fn new(kind: &str, message: &str, severity: Severity) -> Self {
        Self {
            kind: Some(kind.to_string()),
            message: Some(message.to_string()),
            severity: Some(severity),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(Value::String(timestamp.to_rfc3339()));
        self
    }

    /// Validate type and message; the timestamp falls back to `received_at`
    /// when absent or unparseable.
    pub fn into_record(
        self,
        received_at: DateTime<Utc>,
    ) -> Result<NotificationRecord, ValidationError> {
        let kind = non_empty(self.kind).ok_or(ValidationError::MissingField("type"))?;
        let message = non_empty(self.message).ok_or(ValidationError::MissingField("message"))?;
        let timestamp = self
            .timestamp
            .as_ref()
            .and_then(|v| parse_timestamp(v).ok())
            .unwrap_or(received_at);

        Ok(NotificationRecord {
            kind,
            message,
            severity: self.severity.unwrap_or_default(),
            timestamp,
            action: self.action,
            context: (!self.extra.is_empty()).then_some(self.extra),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// One entry of the notification history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

/// Trading session state of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketState {
    Open,
    Closed,
    PreMarket,
    AfterHours,
    Holiday,
}

/// Latest known status of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    pub market: String,
    pub status: MarketState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_open: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_close: Option<DateTime<Utc>>,
    pub timezone: String,
}

/// Parse a wire timestamp: RFC 3339, naive ISO-8601 (taken as UTC), or epoch
/// milliseconds.
pub fn parse_timestamp(value: &Value) -> CoreResult<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Ok(naive.and_utc());
            }
            s.parse::<i64>()
                .ok()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .ok_or_else(|| CoreError::InvalidTimestamp(s.clone()))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| CoreError::InvalidTimestamp(n.to_string())),
        other => Err(CoreError::InvalidTimestamp(other.to_string())),
    }
}
