// src/ingest/client.rs
//! Fetch client: one bounded request per attempt, status interpretation,
//! bounded retries with increasing delay, payload → raw items.
//!
//! Status policy per attempt (`max_retries` = 2 → 3 attempts):
//! - 2xx + valid envelope → items.
//! - 503 with a throttling signal → empty result now, no retry.
//! - 429 → sleep `min(retry_after × attempt, 15s)` and retry; on the last
//!   attempt surface [`FetchError::RateLimited`].
//! - 403 → empty result, no retry.
//! - anything else (incl. timeouts and malformed bodies) → sleep
//!   `2s × attempt` and retry; on the last attempt an empty result.

use metrics::counter;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::types::{
    ContentSafety, ErrorEnvelope, FeedEnvelope, FeedRequest, FeedTransport, SortMode,
};
use crate::item::Item;

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;
const MAX_RETRY_AFTER_SECS: u64 = 15;
const PROGRESSIVE_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited by upstream: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },
    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),
}

/// How an ingestion failure feeds the backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    RateLimited,
    Throttled,
    Generic,
}

impl FetchError {
    pub fn class(&self) -> FailureClass {
        match self {
            FetchError::RateLimited { .. } => FailureClass::RateLimited,
            FetchError::InvalidRequest(_) => FailureClass::Generic,
        }
    }
}

/// What the upstream told us, independent of how many items came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamSignal {
    Ok,
    /// 503 with an explicit throttling signal.
    Throttled,
    /// 403 for this channel this cycle.
    Blocked,
    /// Retries exhausted on network/server/payload errors.
    Degraded,
}

impl UpstreamSignal {
    pub fn failure_class(self) -> Option<FailureClass> {
        match self {
            UpstreamSignal::Ok => None,
            UpstreamSignal::Throttled => Some(FailureClass::Throttled),
            UpstreamSignal::Blocked | UpstreamSignal::Degraded => Some(FailureClass::Generic),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub items: Vec<Item>,
    pub signal: UpstreamSignal,
    pub attempts: u32,
    pub deduped: usize,
    pub filtered_unsafe: usize,
    pub last_error: Option<String>,
}

impl FetchOutcome {
    fn empty(signal: UpstreamSignal, attempts: u32, last_error: Option<String>) -> Self {
        Self {
            items: Vec::new(),
            signal,
            attempts,
            deduped: 0,
            filtered_unsafe: 0,
            last_error,
        }
    }
}

/// Stateless apart from its configuration; every call is independent.
#[derive(Clone)]
pub struct FetchClient {
    transport: Arc<dyn FeedTransport>,
    limit: u32,
    max_retries: u32,
    timeout: Duration,
    safety: ContentSafety,
}

impl FetchClient {
    pub fn new(transport: Arc<dyn FeedTransport>, safety: ContentSafety) -> Self {
        Self {
            transport,
            limit: 25,
            max_retries: 2,
            timeout: Duration::from_secs(15),
            safety,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs.max(1));
        self
    }

    /// Items only. See [`FetchClient::fetch_with_signal`].
    pub async fn fetch(
        &self,
        channel: &str,
        sort: SortMode,
        known_ids: &HashSet<String>,
    ) -> Result<Vec<Item>, FetchError> {
        self.fetch_with_signal(channel, sort, known_ids)
            .await
            .map(|o| o.items)
    }

    pub async fn fetch_with_signal(
        &self,
        channel: &str,
        sort: SortMode,
        known_ids: &HashSet<String>,
    ) -> Result<FetchOutcome, FetchError> {
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(FetchError::InvalidRequest("empty channel".into()));
        }
        let req = FeedRequest {
            channel: channel.to_string(),
            sort,
            limit: self.limit,
        };

        let total = self.max_retries + 1;
        let mut last_error: Option<String> = None;

        for attempt in 1..=total {
            let is_last = attempt == total;

            let resp = match tokio::time::timeout(self.timeout, self.transport.get(&req)).await {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => {
                    last_error = Some(format!("network: {e:#}"));
                    tracing::warn!(target: "ingest", transport = self.transport.name(), channel, attempt, error = ?e, "fetch network error");
                    if is_last {
                        break;
                    }
                    self.progressive_delay(attempt).await;
                    continue;
                }
                Err(_) => {
                    last_error = Some(format!("timeout after {}s", self.timeout.as_secs()));
                    tracing::warn!(target: "ingest", transport = self.transport.name(), channel, attempt, "fetch timed out");
                    if is_last {
                        break;
                    }
                    self.progressive_delay(attempt).await;
                    continue;
                }
            };

            match resp.status {
                _ if resp.is_success() => match serde_json::from_str::<FeedEnvelope>(&resp.body) {
                    Ok(env) if env.success => {
                        return Ok(self.build_outcome(env, known_ids, attempt));
                    }
                    Ok(env) => {
                        last_error = Some(format!(
                            "upstream reported failure: {}",
                            env.error.as_deref().unwrap_or("unknown")
                        ));
                    }
                    Err(e) => {
                        last_error = Some(format!("malformed payload: {e}"));
                    }
                },
                503 => {
                    let env = ErrorEnvelope::parse(&resp.body);
                    if env.is_throttling() {
                        let msg = env.message().unwrap_or("temporarily throttling").to_string();
                        tracing::info!(target: "ingest", channel, attempt, message = %msg, "upstream throttling; skipping cycle");
                        return Ok(FetchOutcome::empty(UpstreamSignal::Throttled, attempt, Some(msg)));
                    }
                    last_error = Some("HTTP 503".into());
                }
                429 => {
                    let env = ErrorEnvelope::parse(&resp.body);
                    let wait = retry_after_wait(env.retry_after, attempt);
                    let message = env
                        .message()
                        .unwrap_or("Too many requests, please wait a moment")
                        .to_string();
                    if is_last {
                        counter!("pipeline_fetch_errors_total").increment(1);
                        return Err(FetchError::RateLimited {
                            message,
                            retry_after_secs: wait.as_secs(),
                        });
                    }
                    tracing::warn!(target: "ingest", channel, attempt, wait_secs = wait.as_secs(), "rate limited; waiting before retry");
                    counter!("pipeline_fetch_retries_total").increment(1);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                403 => {
                    tracing::warn!(target: "ingest", channel, "access denied; skipping channel this cycle");
                    return Ok(FetchOutcome::empty(
                        UpstreamSignal::Blocked,
                        attempt,
                        Some("HTTP 403".into()),
                    ));
                }
                other => {
                    last_error = Some(format!("HTTP {other}"));
                }
            }

            tracing::warn!(target: "ingest", transport = self.transport.name(), channel, attempt, error = ?last_error, "fetch attempt failed");
            if is_last {
                break;
            }
            self.progressive_delay(attempt).await;
        }

        counter!("pipeline_fetch_errors_total").increment(1);
        Ok(FetchOutcome::empty(UpstreamSignal::Degraded, total, last_error))
    }

    async fn progressive_delay(&self, attempt: u32) {
        counter!("pipeline_fetch_retries_total").increment(1);
        tokio::time::sleep(Duration::from_secs(PROGRESSIVE_DELAY_SECS * attempt as u64)).await;
    }

    fn build_outcome(&self, env: FeedEnvelope, known_ids: &HashSet<String>, attempt: u32) -> FetchOutcome {
        let total = env.posts.len();
        let mut seen: HashSet<String> = HashSet::with_capacity(total);
        let mut deduped = 0usize;
        let mut filtered_unsafe = 0usize;
        let mut items = Vec::with_capacity(total);

        for post in env.posts {
            if post.id.trim().is_empty() {
                deduped += 1;
                continue;
            }
            if known_ids.contains(&post.id) || !seen.insert(post.id.clone()) {
                deduped += 1;
                continue;
            }
            if !self.safety.allows(post.over_18) {
                filtered_unsafe += 1;
                continue;
            }
            items.push(Item::from_raw(post));
        }

        counter!("pipeline_items_fetched_total").increment(items.len() as u64);
        counter!("pipeline_items_deduped_total").increment(deduped as u64);
        counter!("pipeline_items_filtered_unsafe_total").increment(filtered_unsafe as u64);

        FetchOutcome {
            items,
            signal: UpstreamSignal::Ok,
            attempts: attempt,
            deduped,
            filtered_unsafe,
            last_error: None,
        }
    }
}

/// Wait before retrying a 429: server hint (default 5s) scaled by attempt, capped at 15s.
pub fn retry_after_wait(retry_after: Option<f64>, attempt: u32) -> Duration {
    let base = retry_after
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| v.ceil() as u64)
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    Duration::from_secs((base * attempt.max(1) as u64).min(MAX_RETRY_AFTER_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_scales_with_attempt_and_caps() {
        assert_eq!(retry_after_wait(Some(5.0), 1), Duration::from_secs(5));
        assert_eq!(retry_after_wait(Some(5.0), 2), Duration::from_secs(10));
        assert_eq!(retry_after_wait(Some(5.0), 3), Duration::from_secs(15));
        assert_eq!(retry_after_wait(Some(60.0), 1), Duration::from_secs(15));
        assert_eq!(retry_after_wait(None, 2), Duration::from_secs(10));
        assert_eq!(retry_after_wait(Some(-1.0), 1), Duration::from_secs(5));
    }

    #[test]
    fn signal_classification() {
        assert_eq!(UpstreamSignal::Ok.failure_class(), None);
        assert_eq!(
            UpstreamSignal::Throttled.failure_class(),
            Some(FailureClass::Throttled)
        );
        assert_eq!(
            UpstreamSignal::Blocked.failure_class(),
            Some(FailureClass::Generic)
        );
        let e = FetchError::RateLimited {
            message: "x".into(),
            retry_after_secs: 5,
        };
        assert_eq!(e.class(), FailureClass::RateLimited);
    }
}
