// src/ingest/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::item::RawPost;

/// Listing order requested from the upstream feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    Hot,
    New,
    Rising,
    Top,
}

impl SortMode {
    pub const ALL: [SortMode; 4] = [SortMode::Hot, SortMode::New, SortMode::Rising, SortMode::Top];

    pub fn as_str(self) -> &'static str {
        match self {
            SortMode::Hot => "hot",
            SortMode::New => "new",
            SortMode::Rising => "rising",
            SortMode::Top => "top",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which items survive ingestion with respect to the adult-content flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentSafety {
    /// Drop items flagged as adult content.
    #[default]
    Safe,
    Unrestricted,
}

impl ContentSafety {
    pub fn allows(self, over_18: bool) -> bool {
        match self {
            ContentSafety::Safe => !over_18,
            ContentSafety::Unrestricted => true,
        }
    }
}

/// One request to the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub channel: String,
    pub sort: SortMode,
    pub limit: u32,
}

/// Raw transport outcome: status + body. Network-level failures are `Err`.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Raw fetch transport to the upstream feed API. One call = one attempt.
#[async_trait::async_trait]
pub trait FeedTransport: Send + Sync {
    async fn get(&self, req: &FeedRequest) -> Result<TransportResponse>;
    fn name(&self) -> &'static str;
}

/// Success envelope: `{ success, posts, error? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedEnvelope {
    pub success: bool,
    #[serde(default)]
    pub posts: Vec<RawPost>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error envelope carried by non-2xx responses. All fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub retry_after: Option<f64>,
    #[serde(default)]
    pub circuit_breaker_open: bool,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorEnvelope {
    /// Tolerant parse: an unreadable body yields an empty envelope.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    pub fn message(&self) -> Option<&str> {
        self.user_message.as_deref().or(self.error.as_deref())
    }

    /// Explicit "temporarily throttling" signal on a 503.
    pub fn is_throttling(&self) -> bool {
        self.circuit_breaker_open
            || self
                .message()
                .map(|m| m.to_ascii_lowercase().contains("temporarily"))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_reads_camel_case_fields() {
        let e = ErrorEnvelope::parse(
            r#"{"rateLimited":true,"retryAfter":7,"userMessage":"Slow down"}"#,
        );
        assert_eq!(e.retry_after, Some(7.0));
        assert_eq!(e.message(), Some("Slow down"));
        assert!(!e.is_throttling());
    }

    #[test]
    fn garbage_body_yields_empty_envelope() {
        let e = ErrorEnvelope::parse("<html>502</html>");
        assert!(e.retry_after.is_none() && !e.is_throttling());
    }

    #[test]
    fn safe_mode_drops_adult_items() {
        assert!(!ContentSafety::Safe.allows(true));
        assert!(ContentSafety::Safe.allows(false));
        assert!(ContentSafety::Unrestricted.allows(true));
    }
}
