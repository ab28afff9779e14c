//! Persistence collaborator: published items, per-stage metrics, system events.
//!
//! Writes are best-effort from the pipeline's point of view; callers log and
//! drop errors.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

use crate::item::Item;
use crate::stages::StageKind;

#[derive(Debug, Clone, Serialize)]
pub struct PublishedRecord {
    pub item: Item,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageMetricRecord {
    pub stage: StageKind,
    pub duration_ms: f64,
    pub metrics: BTreeMap<String, f64>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Stop,
    FetchError,
    StageError,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemEvent {
    pub kind: EventKind,
    pub details: serde_json::Value,
    pub ts: DateTime<Utc>,
}

impl SystemEvent {
    pub fn new(kind: EventKind, details: serde_json::Value) -> Self {
        Self {
            kind,
            details,
            ts: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
pub trait PipelineStore: Send + Sync {
    async fn record_published(&self, rec: &PublishedRecord) -> Result<()>;
    async fn record_stage_metric(&self, rec: &StageMetricRecord) -> Result<()>;
    async fn record_event(&self, ev: &SystemEvent) -> Result<()>;
}

/// Logs records through `tracing` and keeps nothing.
#[derive(Debug, Default, Clone)]
pub struct LogStore;

#[async_trait::async_trait]
impl PipelineStore for LogStore {
    async fn record_published(&self, rec: &PublishedRecord) -> Result<()> {
        tracing::info!(target: "store", id = %rec.item.id, channel = %rec.item.channel, "published");
        Ok(())
    }

    async fn record_stage_metric(&self, rec: &StageMetricRecord) -> Result<()> {
        tracing::debug!(target: "store", stage = %rec.stage, duration_ms = rec.duration_ms, metrics = ?rec.metrics, "stage metric");
        Ok(())
    }

    async fn record_event(&self, ev: &SystemEvent) -> Result<()> {
        tracing::info!(target: "store", kind = ?ev.kind, details = %ev.details, "system event");
        Ok(())
    }
}

/// Append-only JSON lines under one directory:
/// `published.jsonl`, `stage_metrics.jsonl`, `events.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating store dir {}", self.dir.display()))?;
        let mut line = serde_json::to_vec(value).context("serializing store record")?;
        line.push(b'\n');
        let path = self.dir.join(file);
        let mut f = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        f.write_all(&line)
            .await
            .with_context(|| format!("appending to {}", path.display()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PipelineStore for JsonlStore {
    async fn record_published(&self, rec: &PublishedRecord) -> Result<()> {
        self.append("published.jsonl", rec).await
    }

    async fn record_stage_metric(&self, rec: &StageMetricRecord) -> Result<()> {
        self.append("stage_metrics.jsonl", rec).await
    }

    async fn record_event(&self, ev: &SystemEvent) -> Result<()> {
        self.append("events.jsonl", ev).await
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub published: Mutex<Vec<PublishedRecord>>,
    pub stage_metrics: Mutex<Vec<StageMetricRecord>>,
    pub events: Mutex<Vec<SystemEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_ids(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.item.id.clone())
            .collect()
    }

    pub fn event_kinds(&self) -> Vec<EventKind> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.kind)
            .collect()
    }
}

#[async_trait::async_trait]
impl PipelineStore for MemoryStore {
    async fn record_published(&self, rec: &PublishedRecord) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rec.clone());
        Ok(())
    }

    async fn record_stage_metric(&self, rec: &StageMetricRecord) -> Result<()> {
        self.stage_metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rec.clone());
        Ok(())
    }

    async fn record_event(&self, ev: &SystemEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ev.clone());
        Ok(())
    }
}
