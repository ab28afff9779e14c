//! # Pipeline orchestrator
//!
//! Owns the working set, the published buffer and the three stages behind a
//! single mutex, and drives two independent tokio tasks:
//!
//! - **ingestion**: pick a (channel, sort), fetch, append to the working set,
//!   then sleep `ingest_interval × backoff multiplier`.
//! - **publish**: every `publish_interval`, run enrich → score → schedule once
//!   over whatever waits at each status, then publish at most one due item.
//!
//! The mutex is never held across an `.await`; network I/O and store writes
//! happen outside it. Stage failures mark the stage unhealthy for the tick and
//! leave items where they are.

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel_weights::ChannelWeights;
use crate::config::PipelineConfig;
use crate::ingest::{
    FailureClass, FeedTransport, FetchClient, HttpTransport, IngestBackoff, RandomSelector,
    SortMode, SourceSelector, UpstreamSignal,
};
use crate::item::{known_ids, Item, ItemArena, ProcessingStatus, PublishedBuffer};
use crate::stages::{
    EnrichmentStage, HotReloadWeights, SchedulerStage, ScoringStage, StageError, StageKind,
};
use crate::store::{EventKind, PipelineStore, PublishedRecord, StageMetricRecord, SystemEvent};

/// Emitted once per published item.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedItem {
    pub item: Item,
    pub published_at: DateTime<Utc>,
    pub is_new: bool,
}

pub type PublishCallback = Arc<dyn Fn(&PublishedItem) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct StageHealth {
    pub stage: StageKind,
    /// Items still waiting at this stage's input status after the last run.
    pub queue_depth: usize,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: f64,
}

impl StageHealth {
    fn new(stage: StageKind) -> Self {
        Self {
            stage,
            queue_depth: 0,
            healthy: true,
            last_error: None,
            last_run: None,
            last_duration_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    pub stages: Vec<StageHealth>,
    pub counts: BTreeMap<String, usize>,
    pub working_set: usize,
    pub published_buffer: usize,
    pub consecutive_errors: u32,
    pub backoff_multiplier: f64,
    pub status_message: Option<String>,
}

/// What one ingestion cycle did.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub channel: Option<String>,
    pub sort: Option<SortMode>,
    pub inserted: usize,
    pub evicted: usize,
    pub signal: Option<UpstreamSignal>,
    pub failure: Option<FailureClass>,
    pub error: Option<String>,
    pub next_delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct StageRunReport {
    pub enriched: usize,
    pub scored: usize,
    pub scheduled: usize,
    pub dropped_for_diversity: usize,
    pub failures: Vec<(StageKind, String)>,
}

struct PipelineState {
    arena: ItemArena,
    published: PublishedBuffer,
    enrichment: EnrichmentStage,
    scoring: ScoringStage,
    scheduler: SchedulerStage,
    health: BTreeMap<StageKind, StageHealth>,
    backoff: IngestBackoff,
    selector: Box<dyn SourceSelector>,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    channels: Vec<String>,
    client: FetchClient,
    store: Arc<dyn PipelineStore>,
    on_publish: Option<PublishCallback>,
    weights: Option<HotReloadWeights>,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        transport: Arc<dyn FeedTransport>,
        store: Arc<dyn PipelineStore>,
    ) -> Result<Self> {
        cfg.validate()?;
        crate::metrics::describe_pipeline_metrics();

        let client = FetchClient::new(transport, cfg.content_safety)
            .with_limit(cfg.feed.limit)
            .with_retries(cfg.feed.max_retries)
            .with_timeout(cfg.feed.timeout_secs);

        let weights = cfg
            .scoring
            .weights_path
            .as_deref()
            .map(|p| HotReloadWeights::new(p, cfg.scoring.weights));
        if let Some(hot) = &weights {
            tracing::info!(target: "pipeline", path = %hot.path().display(), "scoring weights reload from file");
        }

        let state = PipelineState {
            arena: ItemArena::with_cap(cfg.max_working_set),
            published: PublishedBuffer::with_retention_secs(cfg.published_retention_secs),
            enrichment: EnrichmentStage::new(),
            scoring: ScoringStage::new(
                cfg.scoring.half_life_hours,
                cfg.scoring.weights,
                cfg.channel_weights_path
                    .as_deref()
                    .map(ChannelWeights::load_from_file)
                    .unwrap_or_else(ChannelWeights::default_seed),
            ),
            scheduler: SchedulerStage::new(cfg.scheduling.clone()),
            health: StageKind::ALL
                .iter()
                .map(|k| (*k, StageHealth::new(*k)))
                .collect(),
            backoff: IngestBackoff::default(),
            selector: Box::new(RandomSelector),
        };

        Ok(Self {
            channels: cfg.clean_channels(),
            cfg,
            client,
            store,
            on_publish: None,
            weights,
            state: Mutex::new(state),
        })
    }

    /// Wire the reqwest transport from `cfg.feed`.
    pub fn from_config(cfg: PipelineConfig, store: Arc<dyn PipelineStore>) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&cfg.feed)?);
        Self::new(cfg, transport, store)
    }

    pub fn with_selector(self, selector: Box<dyn SourceSelector>) -> Self {
        self.lock().selector = selector;
        self
    }

    pub fn with_publish_callback(mut self, cb: PublishCallback) -> Self {
        self.on_publish = Some(cb);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---------------------------------------------------------------------
    // Ingestion
    // ---------------------------------------------------------------------

    /// One ingestion cycle. Never fails; failures feed the backoff policy.
    pub async fn ingest_once(&self) -> IngestReport {
        let base = Duration::from_millis(self.cfg.ingest_interval_ms);

        let (pick, known) = {
            let mut st = self.lock();
            let pick = st.selector.next(&self.channels);
            (pick, known_ids(&st.arena, &st.published))
        };
        let Some((channel, sort)) = pick else {
            return IngestReport {
                channel: None,
                sort: None,
                inserted: 0,
                evicted: 0,
                signal: None,
                failure: None,
                error: Some("no channel to ingest from".into()),
                next_delay: base,
            };
        };

        let result = self.client.fetch_with_signal(&channel, sort, &known).await;

        let mut report = IngestReport {
            channel: Some(channel.clone()),
            sort: Some(sort),
            inserted: 0,
            evicted: 0,
            signal: None,
            failure: None,
            error: None,
            next_delay: base,
        };

        match result {
            Ok(outcome) => {
                report.signal = Some(outcome.signal);
                report.error = outcome.last_error.clone();
                let (inserted, evicted) = self.ingest_items(outcome.items);
                report.inserted = inserted;
                report.evicted = evicted;
                report.failure = outcome.signal.failure_class();
            }
            Err(e) => {
                report.failure = Some(e.class());
                report.error = Some(e.to_string());
            }
        }

        let (delay, multiplier, consecutive) = {
            let mut st = self.lock();
            match report.failure {
                None => st.backoff.record_success(),
                Some(class) => st.backoff.record_failure(class),
            }
            (
                st.backoff.next_delay(base),
                st.backoff.multiplier(),
                st.backoff.consecutive_errors(),
            )
        };
        report.next_delay = delay;
        gauge!("pipeline_backoff_multiplier").set(multiplier);

        match report.failure {
            None => tracing::info!(
                target: "pipeline",
                channel = %channel,
                sort = %sort,
                inserted = report.inserted,
                evicted = report.evicted,
                "ingest cycle"
            ),
            Some(class) => {
                tracing::warn!(
                    target: "pipeline",
                    channel = %channel,
                    sort = %sort,
                    ?class,
                    consecutive,
                    multiplier,
                    next_delay_ms = delay.as_millis() as u64,
                    error = ?report.error,
                    "ingest cycle degraded"
                );
                self.emit_event(SystemEvent::new(
                    EventKind::FetchError,
                    serde_json::json!({
                        "channel": channel,
                        "sort": sort.as_str(),
                        "class": format!("{class:?}"),
                        "error": report.error,
                        "consecutive_errors": consecutive,
                        "backoff_multiplier": multiplier,
                    }),
                ))
                .await;
            }
        }

        report
    }

    /// Append raw items to the working set. Items whose id is already known
    /// (working set or published buffer) or whose status is not `Raw` are skipped.
    /// Returns `(inserted, evicted)`.
    pub fn ingest_items(&self, items: Vec<Item>) -> (usize, usize) {
        let mut st = self.lock();
        let fresh: Vec<Item> = items
            .into_iter()
            .filter(|it| it.status() == ProcessingStatus::Raw && !st.published.contains(&it.id))
            .collect();
        let (inserted, evicted) = st.arena.insert_all(fresh);
        if !evicted.is_empty() {
            tracing::debug!(target: "pipeline", evicted = evicted.len(), "working set over cap; dropped oldest");
        }
        gauge!("pipeline_working_set_size").set(st.arena.len() as f64);
        (inserted, evicted.len())
    }

    // ---------------------------------------------------------------------
    // Stages + publishing
    // ---------------------------------------------------------------------

    /// Run enrich → score → schedule once at `now`.
    pub async fn run_stages_at(&self, now: DateTime<Utc>) -> StageRunReport {
        let (report, metrics, events) = self.run_stages_locked(now);
        for rec in metrics {
            if let Err(e) = self.store.record_stage_metric(&rec).await {
                tracing::warn!(target: "store", stage = %rec.stage, error = %e, "stage metric write failed");
            }
        }
        for ev in events {
            self.emit_event(ev).await;
        }
        report
    }

    fn run_stages_locked(
        &self,
        now: DateTime<Utc>,
    ) -> (StageRunReport, Vec<StageMetricRecord>, Vec<SystemEvent>) {
        let now_unix = now.timestamp();
        let now_ms = now.timestamp_millis();
        let mut report = StageRunReport::default();
        let mut metrics = Vec::with_capacity(3);
        let mut events = Vec::new();

        // File I/O stays outside the state lock.
        let fresh_weights = self.weights.as_ref().map(HotReloadWeights::current);

        let mut st = self.lock();
        if let Some(w) = fresh_weights {
            st.scoring.set_weights(w);
        }
        st.published.prune(now_ms);

        for stage in StageKind::ALL {
            let input = st.arena.with_status(stage.input_status());
            let input_len = input.len();
            let t0 = Instant::now();
            let mut extra: BTreeMap<String, f64> = BTreeMap::new();

            let result: Result<usize, StageError> = match stage {
                StageKind::Enrichment => st
                    .enrichment
                    .enrich(input, now_unix)
                    .and_then(|out| Ok(st.arena.apply(out)?)),
                StageKind::Scoring => st
                    .scoring
                    .score(input, now_unix)
                    .and_then(|out| Ok(st.arena.apply(out)?)),
                StageKind::Scheduling => {
                    let mut recent = st.published.items();
                    recent.extend(st.arena.with_status(ProcessingStatus::Scheduled));
                    let state = &mut *st;
                    state
                        .scheduler
                        .plan(input, &recent, now)
                        .and_then(|plan| {
                            extra.insert(
                                "dropped_for_diversity".into(),
                                plan.dropped_for_diversity.len() as f64,
                            );
                            extra.insert("deferred".into(), plan.deferred.len() as f64);
                            report.dropped_for_diversity = plan.dropped_for_diversity.len();
                            Ok(state.arena.apply(plan.scheduled)?)
                        })
                }
            };

            let elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
            let depth = st.arena.count_status(stage.input_status());
            let health = st
                .health
                .entry(stage)
                .or_insert_with(|| StageHealth::new(stage));
            health.queue_depth = depth;
            health.last_run = Some(now);
            health.last_duration_ms = elapsed_ms;

            histogram!("pipeline_stage_duration_ms", "stage" => stage.as_str()).record(elapsed_ms);
            gauge!("pipeline_queue_depth", "stage" => stage.as_str()).set(depth as f64);

            let output = match result {
                Ok(n) => {
                    health.healthy = true;
                    health.last_error = None;
                    n
                }
                Err(e) => {
                    let msg = e.to_string();
                    health.healthy = false;
                    health.last_error = Some(msg.clone());
                    counter!("pipeline_stage_failures_total", "stage" => stage.as_str())
                        .increment(1);
                    tracing::warn!(target: "pipeline", %stage, error = %msg, "stage failed; items stay for retry");
                    events.push(SystemEvent::new(
                        EventKind::StageError,
                        serde_json::json!({ "stage": stage.as_str(), "error": msg }),
                    ));
                    report.failures.push((stage, msg));
                    0
                }
            };

            match stage {
                StageKind::Enrichment => report.enriched = output,
                StageKind::Scoring => report.scored = output,
                StageKind::Scheduling => report.scheduled = output,
            }

            if input_len > 0 {
                extra.insert("input".into(), input_len as f64);
                extra.insert("output".into(), output as f64);
                extra.insert("queue_depth".into(), depth as f64);
                metrics.push(StageMetricRecord {
                    stage,
                    duration_ms: elapsed_ms,
                    metrics: extra,
                    ts: now,
                });
            }
        }

        gauge!("pipeline_working_set_size").set(st.arena.len() as f64);
        (report, metrics, events)
    }

    /// Publish the earliest due scheduled item, if any.
    pub async fn publish_due_at(&self, now: DateTime<Utc>) -> Option<PublishedItem> {
        let now_ms = now.timestamp_millis();
        let item = {
            let mut st = self.lock();
            let mut item = st.arena.next_due(now_ms)?.clone();
            if let Err(e) = item.advance_to(ProcessingStatus::Published) {
                tracing::warn!(target: "pipeline", id = %item.id, error = %e, "cannot publish; keeping item");
                return None;
            }
            st.arena.remove(&item.id)?;
            item.published_at = Some(now_ms);
            st.published.push(item.clone(), now_ms);
            gauge!("pipeline_working_set_size").set(st.arena.len() as f64);
            item
        };

        counter!("pipeline_items_published_total").increment(1);
        tracing::info!(
            target: "pipeline",
            id = %item.id,
            channel = %item.channel,
            priority = item.priority_score.unwrap_or_default(),
            "published"
        );

        let published = PublishedItem {
            item,
            published_at: now,
            is_new: true,
        };

        if let Some(cb) = &self.on_publish {
            cb(&published);
        }

        let rec = PublishedRecord {
            item: published.item.clone(),
            published_at: published.published_at,
        };
        if let Err(e) = self.store.record_published(&rec).await {
            tracing::warn!(target: "store", id = %rec.item.id, error = %e, "published item write failed");
        }

        Some(published)
    }

    /// One publish-loop tick: stages, then at most one publication.
    pub async fn publish_tick_at(&self, now: DateTime<Utc>) -> Option<PublishedItem> {
        self.run_stages_at(now).await;
        self.publish_due_at(now).await
    }

    pub async fn publish_tick(&self) -> Option<PublishedItem> {
        self.publish_tick_at(Utc::now()).await
    }

    async fn emit_event(&self, ev: SystemEvent) {
        if let Err(e) = self.store.record_event(&ev).await {
            tracing::warn!(target: "store", kind = ?ev.kind, error = %e, "system event write failed");
        }
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn snapshot(&self) -> PipelineSnapshot {
        let st = self.lock();
        let counts = ProcessingStatus::ALL
            .iter()
            .filter(|s| **s != ProcessingStatus::Published)
            .map(|s| (s.as_str().to_string(), st.arena.count_status(*s)))
            .collect();
        PipelineSnapshot {
            stages: st.health.values().cloned().collect(),
            counts,
            working_set: st.arena.len(),
            published_buffer: st.published.len(),
            consecutive_errors: st.backoff.consecutive_errors(),
            backoff_multiplier: st.backoff.multiplier(),
            status_message: st.backoff.status_message().map(str::to_string),
        }
    }

    pub fn stage_health(&self, stage: StageKind) -> Option<StageHealth> {
        self.lock().health.get(&stage).cloned()
    }

    /// Newest first.
    pub fn recent_published(&self, n: usize) -> Vec<Item> {
        self.lock().published.last_n(n)
    }

    pub fn item(&self, id: &str) -> Option<Item> {
        self.lock().arena.get(id).cloned()
    }

    pub fn working_set_ids(&self) -> HashSet<String> {
        self.lock().arena.ids().cloned().collect()
    }

    pub fn status_message(&self) -> Option<String> {
        self.lock().backoff.status_message().map(str::to_string)
    }

    // ---------------------------------------------------------------------
    // Loops
    // ---------------------------------------------------------------------

    /// Record a start event and spawn both loops.
    pub async fn start(self: Arc<Self>) -> PipelineHandle {
        self.emit_event(SystemEvent::new(
            EventKind::Start,
            serde_json::json!({
                "channels": self.channels,
                "publish_interval_ms": self.cfg.publish_interval_ms,
                "ingest_interval_ms": self.cfg.ingest_interval_ms,
            }),
        ))
        .await;
        tracing::info!(target: "pipeline", channels = self.channels.len(), "pipeline started");

        let (tx, rx) = watch::channel(false);
        let ingest = tokio::spawn(ingest_loop(self.clone(), rx.clone()));
        let publish = tokio::spawn(publish_loop(self.clone(), rx));
        PipelineHandle {
            pipeline: self,
            shutdown: tx,
            ingest,
            publish,
        }
    }
}

async fn ingest_loop(p: Arc<Pipeline>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        // An in-flight fetch is not interrupted; it is bounded by its own timeout.
        let report = p.ingest_once().await;
        tokio::select! {
            _ = tokio::time::sleep(report.next_delay) => {}
            _ = stop_requested(&mut shutdown) => break,
        }
    }
    tracing::debug!(target: "pipeline", "ingest loop stopped");
}

async fn publish_loop(p: Arc<Pipeline>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(p.cfg.publish_interval_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                p.publish_tick().await;
            }
            _ = stop_requested(&mut shutdown) => break,
        }
    }
    tracing::debug!(target: "pipeline", "publish loop stopped");
}

/// Resolves once `true` is sent. A dropped sender never resolves, so the
/// loops outlive a handle that was dropped without `stop`.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Running pipeline. Dropping it without `stop` leaves the loops running.
pub struct PipelineHandle {
    pipeline: Arc<Pipeline>,
    shutdown: watch::Sender<bool>,
    ingest: JoinHandle<()>,
    publish: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Signal both loops, wait for them to exit, record a stop event.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.ingest.await {
            tracing::warn!(target: "pipeline", error = %e, "ingest loop join failed");
        }
        if let Err(e) = self.publish.await {
            tracing::warn!(target: "pipeline", error = %e, "publish loop join failed");
        }
        let snap = self.pipeline.snapshot();
        self.pipeline
            .emit_event(SystemEvent::new(
                EventKind::Stop,
                serde_json::json!({
                    "working_set": snap.working_set,
                    "published_buffer": snap.published_buffer,
                }),
            ))
            .await;
        tracing::info!(target: "pipeline", "pipeline stopped");
    }
}
