//! # Channel Weights
//!
//! Per-channel multiplier applied to the priority score. Values sit roughly
//! in `0.75..=1.2`; channels not in the table get `1.0`.
//!
//! - Case-insensitive lookup; `r/` prefixes, dashes and underscores are normalized away.
//! - Aliases map alternative names to a canonical channel.
//! - Optional JSON override file with the same shape as the built-in seed.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

const MIN_WEIGHT: f64 = 0.5;
const MAX_WEIGHT: f64 = 1.5;

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelWeights {
    #[serde(default = "default_default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_weight() -> f64 {
    1.0
}

impl Default for ChannelWeights {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl ChannelWeights {
    /// Load from a JSON file. Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<Self>(&s)
                .map(Self::normalized)
                .unwrap_or_else(|_| Self::default_seed()),
            Err(_) => Self::default_seed(),
        }
    }

    fn normalized(self) -> Self {
        Self {
            default_weight: self.default_weight,
            weights: self
                .weights
                .into_iter()
                .map(|(k, v)| (normalize(&k), v))
                .collect(),
            aliases: self
                .aliases
                .into_iter()
                .map(|(k, v)| (normalize(&k), normalize(&v)))
                .collect(),
        }
    }

    /// Alias → exact → default.
    pub fn weight_for(&self, channel: &str) -> f64 {
        let c = normalize(channel);

        if let Some(canon) = self.aliases.get(&c) {
            if let Some(&w) = self.weights.get(canon) {
                return clamp_weight(w);
            }
        }
        if let Some(&w) = self.weights.get(&c) {
            return clamp_weight(w);
        }
        clamp_weight(self.default_weight)
    }

    pub(crate) fn default_seed() -> Self {
        let mut weights = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("worldnews", 1.2),
            ("news", 1.15),
            ("technology", 1.1),
            ("science", 1.1),
            ("programming", 1.05),
            ("futurology", 1.0),
            ("explainlikeimfive", 1.0),
            ("todayilearned", 0.95),
            ("gaming", 0.9),
            ("movies", 0.9),
            ("askreddit", 0.85),
            ("pics", 0.8),
            ("funny", 0.75),
        ] {
            weights.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("world news", "worldnews"),
            ("tech", "technology"),
            ("eli5", "explainlikeimfive"),
            ("til", "todayilearned"),
            ("ask reddit", "askreddit"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_weight: 1.0,
            weights,
            aliases,
        }
    }
}

/// Lowercase, drop a leading `r/`, turn separators into spaces, collapse spaces.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();
    if let Some(rest) = out.strip_prefix("/r/").or_else(|| out.strip_prefix("r/")) {
        out = rest.to_string();
    }
    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_weight(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(MIN_WEIGHT, MAX_WEIGHT)
    } else {
        1.0
    }
}
