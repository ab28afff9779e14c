//! Release planning: diversity filter, category interleaving, slot assignment.
//!
//! 1. Interleave: group by primary category, each group by priority desc,
//!    then round-robin across groups.
//! 2. Diversity: walking that order, a candidate is dropped when its channel
//!    already has `max_per_channel_per_hour` items in the trailing hour
//!    (published or pending), counting candidates accepted earlier in the
//!    same pass. At most `max_batch` are accepted; the rest are deferred.
//! 3. Slots: on the scheduler's first pass the first `immediate_slots` items
//!    go out right away (`now`, `now+2s`, `now+4s`). Every other slot is at
//!    least `min_interval_minutes` after the previous one, and a later pass
//!    starts no earlier than `now + base interval`.
//!
//! Items not scheduled in a pass keep their `Scored` status.

use chrono::{DateTime, Timelike, Utc};
use std::collections::{HashMap, VecDeque};

use crate::config::SchedulingConfig;
use crate::item::{Category, Item, ProcessingStatus};
use crate::stages::{expect_status, StageError};

const HOUR_MS: i64 = 3_600_000;
const MINUTE_MS: i64 = 60_000;
const MIN_VARIABILITY: i32 = -3;
const MAX_VARIABILITY: i32 = 5;

#[derive(Debug, Clone)]
pub struct SchedulerStage {
    cfg: SchedulingConfig,
    /// Latest slot handed out so far (epoch ms).
    last_slot_ms: Option<i64>,
}

/// Result of one planning pass.
#[derive(Debug, Clone, Default)]
pub struct SchedulePlan {
    /// Newly scheduled items in release order.
    pub scheduled: Vec<Item>,
    /// Ids dropped by the diversity filter this pass.
    pub dropped_for_diversity: Vec<String>,
    /// Ids that passed the filter but did not fit in this batch.
    pub deferred: Vec<String>,
}

impl SchedulerStage {
    pub fn new(cfg: SchedulingConfig) -> Self {
        Self {
            cfg,
            last_slot_ms: None,
        }
    }

    pub fn config(&self) -> &SchedulingConfig {
        &self.cfg
    }

    pub fn last_slot_ms(&self) -> Option<i64> {
        self.last_slot_ms
    }

    /// Schedule `Scored` items against the recent publication history.
    pub fn schedule(
        &mut self,
        items: Vec<Item>,
        recent: &[Item],
        now: DateTime<Utc>,
    ) -> Result<Vec<Item>, StageError> {
        self.plan(items, recent, now).map(|p| p.scheduled)
    }

    pub fn plan(
        &mut self,
        items: Vec<Item>,
        recent: &[Item],
        now: DateTime<Utc>,
    ) -> Result<SchedulePlan, StageError> {
        for it in &items {
            expect_status(it, ProcessingStatus::Scored)?;
        }
        let now_ms = now.timestamp_millis();

        let (ordered, dropped, deferred) =
            self.diversity_filter(interleave(items), recent, now_ms);
        let deferred: Vec<String> = deferred.into_iter().map(|it| it.id).collect();

        let base = self.base_interval_minutes(now.hour());
        // Only the first pass that assigns anything gets the startup burst.
        let burst = self.last_slot_ms.is_none();
        let spacing_ms = self.cfg.immediate_spacing_secs as i64 * 1000;

        let mut prev: Option<i64> = None;
        let mut scheduled = Vec::with_capacity(ordered.len());
        for (i, mut it) in ordered.into_iter().enumerate() {
            let slot = if burst && i < self.cfg.immediate_slots {
                now_ms + i as i64 * spacing_ms
            } else if let Some(p) = prev {
                p + self.interval_minutes(&it, base) as i64 * MINUTE_MS
            } else {
                self.next_available_slot(now_ms, base)
            };
            prev = Some(slot);

            it.scheduled_at = Some(slot);
            it.advance_to(ProcessingStatus::Scheduled)?;
            scheduled.push(it);
        }

        if let Some(p) = prev {
            self.last_slot_ms = Some(self.last_slot_ms.map_or(p, |l| l.max(p)));
            tracing::debug!(
                target: "scheduler",
                count = scheduled.len(),
                dropped = dropped.len(),
                deferred = deferred.len(),
                base_interval_min = base,
                last_slot_ms = p,
                "release plan extended"
            );
        }

        Ok(SchedulePlan {
            scheduled,
            dropped_for_diversity: dropped,
            deferred,
        })
    }

    /// Split candidates into (kept, dropped ids, deferred), preserving input
    /// order. Once `max_batch` items are kept the rest are deferred without
    /// using up their channel's budget.
    pub fn diversity_filter(
        &self,
        candidates: Vec<Item>,
        recent: &[Item],
        now_ms: i64,
    ) -> (Vec<Item>, Vec<String>, Vec<Item>) {
        let cutoff = now_ms - HOUR_MS;
        let mut per_channel: HashMap<String, usize> = HashMap::new();
        for r in recent {
            let at = r.published_at.or(r.scheduled_at);
            if at.is_some_and(|t| t >= cutoff) {
                *per_channel.entry(r.channel.to_lowercase()).or_default() += 1;
            }
        }

        let cap = self.cfg.max_per_channel_per_hour;
        let mut kept = Vec::with_capacity(candidates.len().min(self.cfg.max_batch));
        let mut dropped = Vec::new();
        let mut deferred = Vec::new();
        for it in candidates {
            let n = per_channel.entry(it.channel.to_lowercase()).or_default();
            if *n >= cap {
                dropped.push(it.id);
            } else if kept.len() >= self.cfg.max_batch {
                deferred.push(it);
            } else {
                *n += 1;
                kept.push(it);
            }
        }
        (kept, dropped, deferred)
    }

    pub fn is_peak_hour(&self, hour_utc: u32) -> bool {
        self.cfg.peak_hours_utc.contains(&hour_utc)
    }

    pub fn base_interval_minutes(&self, hour_utc: u32) -> u32 {
        if self.is_peak_hour(hour_utc) {
            self.cfg.peak_interval_minutes
        } else {
            self.cfg.off_peak_interval_minutes
        }
    }

    /// Gap before `it`, in minutes, within `[min_interval, max_interval]`.
    pub fn interval_minutes(&self, it: &Item, base: u32) -> u32 {
        let raw = base as i64 + variability_minutes(it) as i64;
        let lo = self.cfg.min_interval_minutes.max(1) as i64;
        let hi = (self.cfg.max_interval_minutes as i64).max(lo);
        raw.clamp(lo, hi) as u32
    }

    /// Never earlier than `now + base`, nor than `last slot + min interval`.
    pub fn next_available_slot(&self, now_ms: i64, base: u32) -> i64 {
        let from_now = now_ms + base as i64 * MINUTE_MS;
        match self.last_slot_ms {
            Some(last) => {
                from_now.max(last + self.cfg.min_interval_minutes.max(1) as i64 * MINUTE_MS)
            }
            None => from_now,
        }
    }
}

/// Per-item adjustment in minutes: high priority and news go sooner,
/// entertainment later, plus a small id-derived jitter.
pub fn variability_minutes(it: &Item) -> i32 {
    let mut v = id_jitter(&it.id);
    let p = it.priority_score.unwrap_or(0.0);
    if p >= 0.8 {
        v -= 2;
    } else if p >= 0.6 {
        v -= 1;
    }
    if it.has_category(Category::News) {
        v -= 1;
    }
    if it.has_category(Category::Entertainment) {
        v += 2;
    }
    v.clamp(MIN_VARIABILITY, MAX_VARIABILITY)
}

/// Stable −1, 0 or +1 derived from the id bytes.
fn id_jitter(id: &str) -> i32 {
    let sum: u32 = id.bytes().map(u32::from).sum();
    (sum % 3) as i32 - 1
}

/// Round-robin across primary categories; groups ordered by their best item.
pub fn interleave(items: Vec<Item>) -> Vec<Item> {
    let total = items.len();
    let mut groups: HashMap<Category, Vec<Item>> = HashMap::new();
    for it in items {
        groups.entry(it.primary_category()).or_default().push(it);
    }

    let mut queues: Vec<(Category, VecDeque<Item>)> = groups
        .into_iter()
        .map(|(cat, mut v)| {
            v.sort_by(|a, b| {
                b.priority_score
                    .unwrap_or(0.0)
                    .total_cmp(&a.priority_score.unwrap_or(0.0))
                    .then_with(|| a.id.cmp(&b.id))
            });
            (cat, VecDeque::from(v))
        })
        .collect();
    queues.sort_by(|(ca, a), (cb, b)| {
        let pa = a.front().and_then(|i| i.priority_score).unwrap_or(0.0);
        let pb = b.front().and_then(|i| i.priority_score).unwrap_or(0.0);
        pb.total_cmp(&pa).then_with(|| ca.cmp(cb))
    });

    let mut out = Vec::with_capacity(total);
    while out.len() < total {
        for (_, q) in queues.iter_mut() {
            if let Some(it) = q.pop_front() {
                out.push(it);
            }
        }
    }
    out
}
