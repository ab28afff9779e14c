// tests/fetch_client.rs
//
// Fetch client retry and status policy against a scripted transport.
// Time is paused so sleeps advance instantly and elapsed time is exact.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio::time::Instant;

use feed_pulse::ingest::types::FeedRequest;
use feed_pulse::ingest::{
    ContentSafety, FeedTransport, FetchClient, FetchError, SortMode, TransportResponse,
    UpstreamSignal,
};

enum Reply {
    Status(u16, String),
    NetworkError,
    Hang,
}

struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<FeedRequest>>,
}

impl ScriptedTransport {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl FeedTransport for ScriptedTransport {
    async fn get(&self, req: &FeedRequest) -> Result<TransportResponse> {
        self.calls.lock().unwrap().push(req.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Reply::Status(code, body)) => Ok(TransportResponse::new(code, body)),
            Some(Reply::NetworkError) => Err(anyhow!("connection refused")),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(TransportResponse::new(200, "{}"))
            }
            None => Ok(TransportResponse::new(500, "")),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

fn post(id: &str, over_18: bool) -> serde_json::Value {
    json!({
        "id": id,
        "title": "Hello &amp; welcome",
        "selftext": "",
        "author": "someone",
        "subreddit": "technology",
        "url": "https://example.com",
        "score": 10,
        "num_comments": 3,
        "upvote_ratio": 0.9,
        "created_utc": 1_700_000_000.0,
        "domain": "example.com",
        "over_18": over_18
    })
}

fn ok(posts: Vec<serde_json::Value>) -> Reply {
    Reply::Status(200, json!({ "success": true, "posts": posts }).to_string())
}

fn rate_limited(retry_after: u64) -> Reply {
    Reply::Status(
        429,
        json!({ "rateLimited": true, "retryAfter": retry_after, "userMessage": "Too many requests" })
            .to_string(),
    )
}

fn client(t: &Arc<ScriptedTransport>) -> FetchClient {
    FetchClient::new(t.clone(), ContentSafety::Safe)
}

#[tokio::test(start_paused = true)]
async fn rate_limited_twice_then_succeeds_after_scaled_waits() {
    let t = ScriptedTransport::new(vec![rate_limited(5), rate_limited(5), ok(vec![post("a1", false)])]);
    let start = Instant::now();

    let items = client(&t)
        .fetch("technology", SortMode::Hot, &HashSet::new())
        .await
        .expect("third attempt succeeds");

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "a1");
    assert_eq!(items[0].title, "Hello & welcome");
    assert_eq!(t.calls(), 3);
    // 5s after attempt 1, 10s after attempt 2.
    assert_eq!(start.elapsed(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn rate_limit_wait_is_capped_at_fifteen_seconds() {
    let t = ScriptedTransport::new(vec![rate_limited(60), ok(vec![post("a1", false)])]);
    let start = Instant::now();
    client(&t)
        .fetch("technology", SortMode::New, &HashSet::new())
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn rate_limited_on_every_attempt_surfaces_error() {
    let t = ScriptedTransport::new(vec![rate_limited(5), rate_limited(5), rate_limited(5)]);
    let err = client(&t)
        .fetch("technology", SortMode::Hot, &HashSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::RateLimited { .. }), "got {err:?}");
    assert_eq!(t.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn forbidden_returns_empty_without_retry() {
    let t = ScriptedTransport::new(vec![Reply::Status(403, "{}".into()), ok(vec![post("a1", false)])]);
    let start = Instant::now();

    let out = client(&t)
        .fetch_with_signal("technology", SortMode::Top, &HashSet::new())
        .await
        .unwrap();

    assert!(out.items.is_empty());
    assert_eq!(out.signal, UpstreamSignal::Blocked);
    assert_eq!(t.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn throttling_503_returns_empty_immediately() {
    let t = ScriptedTransport::new(vec![Reply::Status(
        503,
        json!({ "circuitBreakerOpen": true, "userMessage": "Service temporarily unavailable" })
            .to_string(),
    )]);

    let out = client(&t)
        .fetch_with_signal("technology", SortMode::Hot, &HashSet::new())
        .await
        .unwrap();

    assert!(out.items.is_empty());
    assert_eq!(out.signal, UpstreamSignal::Throttled);
    assert_eq!(t.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn network_errors_retry_with_progressive_delay_then_degrade() {
    let t = ScriptedTransport::new(vec![Reply::NetworkError, Reply::NetworkError, Reply::NetworkError]);
    let start = Instant::now();

    let out = client(&t)
        .fetch_with_signal("technology", SortMode::Hot, &HashSet::new())
        .await
        .unwrap();

    assert!(out.items.is_empty());
    assert_eq!(out.signal, UpstreamSignal::Degraded);
    assert_eq!(out.attempts, 3);
    assert!(out.last_error.unwrap().contains("connection refused"));
    // 2s after attempt 1, 4s after attempt 2.
    assert_eq!(start.elapsed(), Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn hung_request_is_cut_off_by_timeout() {
    let t = ScriptedTransport::new(vec![Reply::Hang, ok(vec![post("a1", false)])]);
    let start = Instant::now();

    let items = client(&t)
        .with_timeout(15)
        .fetch("technology", SortMode::Hot, &HashSet::new())
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    // 15s timeout + 2s progressive delay.
    assert_eq!(start.elapsed(), Duration::from_secs(17));
}

#[tokio::test(start_paused = true)]
async fn unsuccessful_envelope_is_retried_like_a_server_error() {
    let bad = || Reply::Status(200, json!({ "success": false, "error": "upstream down" }).to_string());
    let t = ScriptedTransport::new(vec![bad(), bad(), bad()]);

    let out = client(&t)
        .fetch_with_signal("technology", SortMode::Hot, &HashSet::new())
        .await
        .unwrap();

    assert_eq!(out.signal, UpstreamSignal::Degraded);
    assert_eq!(t.calls(), 3);
    assert!(out.last_error.unwrap().contains("upstream down"));
}

#[tokio::test]
async fn dedups_against_known_ids_and_filters_adult_content() {
    let t = ScriptedTransport::new(vec![ok(vec![
        post("a1", false),
        post("a2", false),
        post("a2", false),
        post("a3", true),
    ])]);
    let known: HashSet<String> = ["a1".to_string()].into_iter().collect();

    let out = client(&t)
        .fetch_with_signal("technology", SortMode::Rising, &known)
        .await
        .unwrap();

    let ids: Vec<_> = out.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["a2"]);
    assert_eq!(out.deduped, 2);
    assert_eq!(out.filtered_unsafe, 1);
    assert!(out
        .items
        .iter()
        .all(|i| i.status() == feed_pulse::ProcessingStatus::Raw));
}

#[tokio::test]
async fn unrestricted_safety_keeps_adult_items() {
    let t = ScriptedTransport::new(vec![ok(vec![post("a3", true)])]);
    let items = FetchClient::new(t.clone(), ContentSafety::Unrestricted)
        .fetch("technology", SortMode::Hot, &HashSet::new())
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn request_carries_channel_sort_and_limit() {
    let t = ScriptedTransport::new(vec![ok(vec![])]);
    FetchClient::new(t.clone(), ContentSafety::Safe)
        .with_limit(10)
        .fetch(" science ", SortMode::Top, &HashSet::new())
        .await
        .unwrap();
    let calls = t.calls.lock().unwrap();
    assert_eq!(
        calls[0],
        FeedRequest {
            channel: "science".into(),
            sort: SortMode::Top,
            limit: 10
        }
    );
}

#[tokio::test]
async fn empty_channel_is_rejected() {
    let t = ScriptedTransport::new(vec![]);
    let err = client(&t)
        .fetch("  ", SortMode::Hot, &HashSet::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidRequest(_)));
    assert_eq!(t.calls(), 0);
}
