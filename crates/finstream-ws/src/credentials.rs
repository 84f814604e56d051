//! Credential capability.

use chrono::{DateTime, Utc};
use tracing::warn;

/// Supplies the bearer token used in connect headers.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, if logged in.
    fn bearer_token(&self) -> Option<String>;

    /// Whether the current token is still valid.
    fn is_authenticated(&self) -> bool;

    /// Called when the transport rejected the credential. Refreshing it is
    /// up to the implementor.
    fn on_authentication_failed(&self) {}
}

/// A fixed token with an optional expiry.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            expires_at: None,
        }
    }

    /// No token at all.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone().filter(|t| !t.is_empty())
    }

    fn is_authenticated(&self) -> bool {
        self.bearer_token().is_some() && self.expires_at.map_or(true, |exp| Utc::now() < exp)
    }

    fn on_authentication_failed(&self) {
        warn!("Credential rejected by server; a new token is required");
    }
}
