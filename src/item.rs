//! # Item model
//! The single entity flowing through the pipeline, its processing state
//! machine, and the two in-memory collections that own items:
//!
//! - [`ItemArena`]: the working set of not-yet-published items, keyed by id,
//!   capped (oldest dropped first).
//! - [`PublishedBuffer`]: short-retention record of published items used for
//!   diversity checks and the read-only published feed.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Processing status. Ordered: `Raw < Enriched < Scored < Scheduled < Published`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Raw,
    Enriched,
    Scored,
    Scheduled,
    Published,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 5] = [
        ProcessingStatus::Raw,
        ProcessingStatus::Enriched,
        ProcessingStatus::Scored,
        ProcessingStatus::Scheduled,
        ProcessingStatus::Published,
    ];

    /// The only status reachable from `self`. `None` for the terminal state.
    pub const fn next(self) -> Option<ProcessingStatus> {
        match self {
            ProcessingStatus::Raw => Some(ProcessingStatus::Enriched),
            ProcessingStatus::Enriched => Some(ProcessingStatus::Scored),
            ProcessingStatus::Scored => Some(ProcessingStatus::Scheduled),
            ProcessingStatus::Scheduled => Some(ProcessingStatus::Published),
            ProcessingStatus::Published => None,
        }
    }

    /// Transition table: exactly one step forward.
    pub fn can_transition_to(self, to: ProcessingStatus) -> bool {
        matches!(
            (self, to),
            (ProcessingStatus::Raw, ProcessingStatus::Enriched)
                | (ProcessingStatus::Enriched, ProcessingStatus::Scored)
                | (ProcessingStatus::Scored, ProcessingStatus::Scheduled)
                | (ProcessingStatus::Scheduled, ProcessingStatus::Published)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Raw => "raw",
            ProcessingStatus::Enriched => "enriched",
            ProcessingStatus::Scored => "scored",
            ProcessingStatus::Scheduled => "scheduled",
            ProcessingStatus::Published => "published",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("item {id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub id: String,
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Technology,
    News,
    Entertainment,
    Education,
    General,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Technology => "technology",
            Category::News => "news",
            Category::Entertainment => "entertainment",
            Category::Education => "education",
            Category::General => "general",
        }
    }
}

/// Post as delivered by the upstream feed. Every field except `id` is tolerant
/// of absence so a sparse payload still yields an item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    #[serde(default)]
    pub upvote_ratio: f64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub over_18: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    /// Source channel (subreddit-equivalent).
    pub channel: String,
    pub url: String,
    pub score: i64,
    pub num_comments: u64,
    pub upvote_ratio: f64,
    /// Unix seconds.
    pub created_utc: i64,
    pub domain: String,
    pub is_video: bool,
    pub thumbnail: Option<String>,
    pub over_18: bool,

    status: ProcessingStatus,
    pub sentiment: Option<Sentiment>,
    pub categories: Vec<Category>,
    pub quality_score: Option<f64>,
    pub engagement_score: Option<f64>,
    pub priority_score: Option<f64>,
    /// Epoch ms.
    pub scheduled_at: Option<i64>,
    /// Epoch ms.
    pub published_at: Option<i64>,
}

impl Item {
    /// A fresh item at `Raw`.
    pub fn new(id: impl Into<String>, channel: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            body: String::new(),
            author: String::new(),
            channel: channel.into(),
            url: String::new(),
            score: 0,
            num_comments: 0,
            upvote_ratio: 0.0,
            created_utc: 0,
            domain: String::new(),
            is_video: false,
            thumbnail: None,
            over_18: false,
            status: ProcessingStatus::Raw,
            sentiment: None,
            categories: Vec::new(),
            quality_score: None,
            engagement_score: None,
            priority_score: None,
            scheduled_at: None,
            published_at: None,
        }
    }

    pub fn from_raw(post: RawPost) -> Self {
        let mut it = Item::new(
            post.id,
            post.subreddit,
            crate::ingest::normalize_text(&post.title),
        );
        it.body = crate::ingest::normalize_text(&post.selftext);
        it.author = post.author;
        it.url = post.url;
        it.score = post.score;
        it.num_comments = post.num_comments;
        it.upvote_ratio = if post.upvote_ratio.is_finite() {
            post.upvote_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        it.created_utc = if post.created_utc.is_finite() {
            post.created_utc as i64
        } else {
            0
        };
        it.domain = post.domain;
        it.is_video = post.is_video;
        it.thumbnail = post.thumbnail;
        it.over_18 = post.over_18;
        it
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Move one step forward. Anything else is rejected and leaves the item untouched.
    pub fn advance_to(&mut self, to: ProcessingStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        match to {
            ProcessingStatus::Scheduled if self.priority_score.is_none() => {
                return Err(TransitionError {
                    id: self.id.clone(),
                    from: self.status,
                    to,
                })
            }
            ProcessingStatus::Published if self.scheduled_at.is_none() => {
                return Err(TransitionError {
                    id: self.id.clone(),
                    from: self.status,
                    to,
                })
            }
            _ => {}
        }
        self.status = to;
        Ok(())
    }

    /// Primary category used for interleaving (first tag, `General` if none).
    pub fn primary_category(&self) -> Category {
        self.categories.first().copied().unwrap_or(Category::General)
    }

    pub fn has_category(&self, c: Category) -> bool {
        self.categories.contains(&c)
    }

    pub fn age_hours(&self, now_unix: i64) -> f64 {
        (now_unix - self.created_utc).max(0) as f64 / 3600.0
    }
}

/// Working set: items keyed by id, insertion order kept for capping.
#[derive(Debug)]
pub struct ItemArena {
    items: HashMap<String, Item>,
    order: VecDeque<String>,
    cap: usize,
}

impl ItemArena {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            items: HashMap::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.get(id)
    }

    /// Insert new items; ids already present are skipped. Returns
    /// `(inserted, evicted_ids)`; eviction drops the oldest items over the cap.
    pub fn insert_all(&mut self, incoming: Vec<Item>) -> (usize, Vec<String>) {
        let mut inserted = 0;
        for it in incoming {
            if self.items.contains_key(&it.id) {
                continue;
            }
            self.order.push_back(it.id.clone());
            self.items.insert(it.id.clone(), it);
            inserted += 1;
        }

        let mut evicted = Vec::new();
        while self.items.len() > self.cap {
            match self.order.pop_front() {
                Some(id) => {
                    if self.items.remove(&id).is_some() {
                        evicted.push(id);
                    }
                }
                None => break,
            }
        }
        (inserted, evicted)
    }

    /// Clones of all items currently at `status`, in insertion order.
    pub fn with_status(&self, status: ProcessingStatus) -> Vec<Item> {
        self.order
            .iter()
            .filter_map(|id| self.items.get(id))
            .filter(|it| it.status() == status)
            .cloned()
            .collect()
    }

    pub fn count_status(&self, status: ProcessingStatus) -> usize {
        self.items.values().filter(|it| it.status() == status).count()
    }

    /// Replace items in place by id. Each replacement must be a legal forward
    /// step from the stored item; otherwise nothing is applied.
    pub fn apply(&mut self, updated: Vec<Item>) -> Result<usize, TransitionError> {
        for it in &updated {
            if let Some(cur) = self.items.get(&it.id) {
                if !cur.status().can_transition_to(it.status()) {
                    return Err(TransitionError {
                        id: it.id.clone(),
                        from: cur.status(),
                        to: it.status(),
                    });
                }
            }
        }
        let mut n = 0;
        for it in updated {
            if let Some(slot) = self.items.get_mut(&it.id) {
                *slot = it;
                n += 1;
            }
        }
        Ok(n)
    }

    /// Earliest scheduled item that is due at `now_ms`.
    pub fn next_due(&self, now_ms: i64) -> Option<&Item> {
        self.items
            .values()
            .filter(|it| it.status() == ProcessingStatus::Scheduled)
            .filter(|it| it.scheduled_at.is_some_and(|t| t <= now_ms))
            .min_by_key(|it| (it.scheduled_at, it.id.clone()))
    }

    pub fn remove(&mut self, id: &str) -> Option<Item> {
        let it = self.items.remove(id)?;
        self.order.retain(|x| x != id);
        Some(it)
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.items.keys()
    }
}

/// Published items retained for a bounded window (default one hour).
#[derive(Debug)]
pub struct PublishedBuffer {
    buf: VecDeque<Item>,
    retention_ms: i64,
}

impl PublishedBuffer {
    pub fn with_retention_secs(secs: u64) -> Self {
        Self {
            buf: VecDeque::new(),
            retention_ms: (secs as i64).saturating_mul(1000),
        }
    }

    /// Record a published item and discard entries older than the window.
    pub fn push(&mut self, item: Item, now_ms: i64) {
        self.buf.push_back(item);
        self.prune(now_ms);
    }

    pub fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.retention_ms;
        while let Some(front) = self.buf.front() {
            if front.published_at.unwrap_or(i64::MIN) < cutoff {
                self.buf.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.buf.iter().any(|it| it.id == id)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn items(&self) -> Vec<Item> {
        self.buf.iter().cloned().collect()
    }

    /// Newest first.
    pub fn last_n(&self, n: usize) -> Vec<Item> {
        self.buf.iter().rev().take(n).cloned().collect()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.buf.iter().map(|it| &it.id)
    }
}

/// Ids known to either collection; used by the fetch dedup step.
pub fn known_ids(arena: &ItemArena, published: &PublishedBuffer) -> HashSet<String> {
    arena.ids().chain(published.ids()).cloned().collect()
}
