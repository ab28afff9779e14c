// src/ingest/http.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::FeedConfig;
use crate::ingest::types::{FeedRequest, FeedTransport, TransportResponse};

/// reqwest-backed transport against the upstream feed API.
///
/// `GET {base_url}?subreddit=<channel>&limit=<n>&sort=<mode>`
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(cfg: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("building feed http client")?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, req: &FeedRequest) -> Result<TransportResponse> {
        let limit = req.limit.to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("subreddit", req.channel.as_str()),
                ("limit", limit.as_str()),
                ("sort", req.sort.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("feed http get() for {}", req.channel))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.context("feed http .text()")?;
        Ok(TransportResponse { status, body })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
