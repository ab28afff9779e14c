// src/config.rs
//! Pipeline configuration.
//!
//! Lookup order for [`PipelineConfig::load_default`]:
//! 1) `$PIPELINE_CONFIG_PATH`
//! 2) `config/pipeline.toml`
//! 3) `config/pipeline.json`
//! 4) built-in defaults
//!
//! Every field has a default, so a config file only needs the keys it overrides.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::ContentSafety;
use crate::stages::weights::ScoringWeights;

pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const DEFAULT_PIPELINE_CONFIG_TOML: &str = "config/pipeline.toml";
pub const DEFAULT_PIPELINE_CONFIG_JSON: &str = "config/pipeline.json";

fn default_channels() -> Vec<String> {
    [
        "technology",
        "worldnews",
        "science",
        "programming",
        "futurology",
        "todayilearned",
        "movies",
        "explainlikeimfive",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_max_working_set() -> usize {
    500
}
fn default_publish_interval_ms() -> u64 {
    3_000
}
fn default_ingest_interval_ms() -> u64 {
    30_000
}
fn default_published_retention_secs() -> u64 {
    3_600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default)]
    pub content_safety: ContentSafety,
    /// Working-set cap; oldest items are dropped beyond it.
    #[serde(default = "default_max_working_set")]
    pub max_working_set: usize,
    #[serde(default = "default_publish_interval_ms")]
    pub publish_interval_ms: u64,
    /// Base delay between ingestion cycles, scaled by the backoff multiplier.
    #[serde(default = "default_ingest_interval_ms")]
    pub ingest_interval_ms: u64,
    #[serde(default = "default_published_retention_secs")]
    pub published_retention_secs: u64,
    /// Optional JSON override for the per-channel weight table.
    #[serde(default)]
    pub channel_weights_path: Option<PathBuf>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            content_safety: ContentSafety::default(),
            max_working_set: default_max_working_set(),
            publish_interval_ms: default_publish_interval_ms(),
            ingest_interval_ms: default_ingest_interval_ms(),
            published_retention_secs: default_published_retention_secs(),
            channel_weights_path: None,
            feed: FeedConfig::default(),
            scoring: ScoringConfig::default(),
            scheduling: SchedulingConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000/api/reddit".to_string()
}
fn default_limit() -> u32 {
    25
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    2
}
fn default_user_agent() -> String {
    concat!("feed-pulse/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Hard per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            limit: default_limit(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_half_life_hours() -> f64 {
    6.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_half_life_hours")]
    pub half_life_hours: f64,
    #[serde(default)]
    pub weights: ScoringWeights,
    /// Optional JSON file with weights, re-read whenever its mtime changes.
    #[serde(default)]
    pub weights_path: Option<PathBuf>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life_hours: default_half_life_hours(),
            weights: ScoringWeights::default(),
            weights_path: None,
        }
    }
}

fn default_peak_hours() -> BTreeSet<u32> {
    (13..=21).collect()
}
fn default_peak_interval() -> u32 {
    3
}
fn default_off_peak_interval() -> u32 {
    6
}
fn default_min_interval() -> u32 {
    2
}
fn default_max_interval() -> u32 {
    10
}
fn default_per_channel_cap() -> usize {
    3
}
fn default_max_batch() -> usize {
    10
}
fn default_immediate_slots() -> usize {
    3
}
fn default_immediate_spacing_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// UTC hours (0..=23) that use the peak interval.
    #[serde(default = "default_peak_hours")]
    pub peak_hours_utc: BTreeSet<u32>,
    #[serde(default = "default_peak_interval")]
    pub peak_interval_minutes: u32,
    #[serde(default = "default_off_peak_interval")]
    pub off_peak_interval_minutes: u32,
    #[serde(default = "default_min_interval")]
    pub min_interval_minutes: u32,
    #[serde(default = "default_max_interval")]
    pub max_interval_minutes: u32,
    /// Diversity cap: same-channel items allowed in the trailing hour.
    #[serde(default = "default_per_channel_cap")]
    pub max_per_channel_per_hour: usize,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Items released right away on the scheduler's first pass. Tunable UX knob.
    #[serde(default = "default_immediate_slots")]
    pub immediate_slots: usize,
    #[serde(default = "default_immediate_spacing_secs")]
    pub immediate_spacing_secs: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            peak_hours_utc: default_peak_hours(),
            peak_interval_minutes: default_peak_interval(),
            off_peak_interval_minutes: default_off_peak_interval(),
            min_interval_minutes: default_min_interval(),
            max_interval_minutes: default_max_interval(),
            max_per_channel_per_hour: default_per_channel_cap(),
            max_batch: default_max_batch(),
            immediate_slots: default_immediate_slots(),
            immediate_spacing_secs: default_immediate_spacing_secs(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit path. Supports TOML or JSON (by extension, then by sniffing).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing pipeline config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using env var + fallbacks (see module docs).
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_PIPELINE_CONFIG_PATH} points to non-existent path"));
            }
        }
        for p in [DEFAULT_PIPELINE_CONFIG_TOML, DEFAULT_PIPELINE_CONFIG_JSON] {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels.iter().all(|c| c.trim().is_empty()) {
            bail!("channels must not be empty");
        }
        if self.publish_interval_ms == 0 || self.ingest_interval_ms == 0 {
            bail!("publish/ingest intervals must be > 0");
        }
        if self.max_working_set == 0 {
            bail!("max_working_set must be > 0");
        }
        if !(self.scoring.half_life_hours.is_finite() && self.scoring.half_life_hours > 0.0) {
            bail!("scoring.half_life_hours must be > 0");
        }
        let s = &self.scheduling;
        if s.min_interval_minutes > s.max_interval_minutes {
            bail!(
                "scheduling.min_interval_minutes ({}) > max_interval_minutes ({})",
                s.min_interval_minutes,
                s.max_interval_minutes
            );
        }
        if s.peak_hours_utc.iter().any(|h| *h > 23) {
            bail!("scheduling.peak_hours_utc entries must be 0..=23");
        }
        if s.max_batch == 0 {
            bail!("scheduling.max_batch must be > 0");
        }
        Ok(())
    }

    /// Channels trimmed, de-duplicated, empty entries removed.
    pub fn clean_channels(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.channels
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.to_ascii_lowercase()))
            .collect()
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<PipelineConfig> {
    match hint_ext {
        "toml" => return Ok(toml::from_str(s)?),
        "json" => return Ok(serde_json::from_str(s)?),
        _ => {}
    }
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported pipeline config format: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
channels = ["technology", "news"]
content_safety = "unrestricted"

[scheduling]
max_per_channel_per_hour = 1
"#,
        )
        .unwrap();
        assert_eq!(cfg.channels.len(), 2);
        assert_eq!(cfg.content_safety, ContentSafety::Unrestricted);
        assert_eq!(cfg.scheduling.max_per_channel_per_hour, 1);
        assert_eq!(cfg.scheduling.max_batch, 10);
        assert_eq!(cfg.publish_interval_ms, 3_000);
        assert_eq!(cfg.feed.timeout_secs, 15);
        cfg.validate().unwrap();
    }

    #[test]
    fn bundled_config_file_parses_and_validates() {
        let cfg = parse_config(include_str!("../config/pipeline.toml"), "toml").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.scheduling.peak_hours_utc, default_peak_hours());
        assert_eq!(cfg.scoring.weights, ScoringWeights::default());
    }

    #[test]
    fn json_is_sniffed_without_extension() {
        let cfg = parse_config(r#"{"ingest_interval_ms": 1000}"#, "").unwrap();
        assert_eq!(cfg.ingest_interval_ms, 1000);
    }

    #[test]
    fn validate_rejects_inverted_intervals() {
        let mut cfg = PipelineConfig::default();
        cfg.scheduling.min_interval_minutes = 12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn clean_channels_dedups_case_insensitively() {
        let cfg = PipelineConfig {
            channels: vec![" Technology".into(), "technology".into(), "".into(), "news".into()],
            ..PipelineConfig::default()
        };
        assert_eq!(cfg.clean_channels(), vec!["Technology".to_string(), "news".into()]);
    }
}
