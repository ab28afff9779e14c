//! Scoring weights with optional hot-reload from a JSON file.
//!
//! JSON shape (any key may be omitted):
//! {
//!   "engagement": 0.4,
//!   "recency": 0.3,
//!   "quality": 0.3
//! }
//!
//! On each `current()` call we check the file's modified time and reload if changed.
//! Weights need not sum to 1; the priority score is clamped afterwards.

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::RwLock,
    time::SystemTime,
};

fn default_engagement() -> f64 {
    0.4
}
fn default_recency() -> f64 {
    0.3
}
fn default_quality() -> f64 {
    0.3
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_engagement")]
    pub engagement: f64,
    #[serde(default = "default_recency")]
    pub recency: f64,
    #[serde(default = "default_quality")]
    pub quality: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            engagement: default_engagement(),
            recency: default_recency(),
            quality: default_quality(),
        }
    }
}

impl ScoringWeights {
    /// Negative or non-finite weights are treated as 0.
    pub fn sanitized(self) -> Self {
        fn s(x: f64) -> f64 {
            if x.is_finite() {
                x.max(0.0)
            } else {
                0.0
            }
        }
        Self {
            engagement: s(self.engagement),
            recency: s(self.recency),
            quality: s(self.quality),
        }
    }
}

/// Hot-reload wrapper: reloads when the file mtime changes; keeps the last good
/// weights when the file is missing or unreadable.
#[derive(Debug)]
pub struct HotReloadWeights {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    weights: ScoringWeights,
    last_modified: Option<SystemTime>,
}

impl HotReloadWeights {
    pub fn new(path: &Path, initial: ScoringWeights) -> Self {
        Self {
            path: path.to_path_buf(),
            inner: RwLock::new(State {
                weights: initial.sanitized(),
                last_modified: None,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest weights, reloading if the file changed.
    pub fn current(&self) -> ScoringWeights {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return self.read_state().weights,
        };

        {
            let guard = self.read_state();
            if guard.last_modified == Some(mtime) {
                return guard.weights;
            }
        }

        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        // Double-check in case another reader reloaded meanwhile.
        if guard.last_modified != Some(mtime) {
            match load_weights_file(&self.path) {
                Ok(w) => {
                    tracing::info!(target: "pipeline", path = %self.path.display(), ?w, "scoring weights reloaded");
                    guard.weights = w.sanitized();
                    guard.last_modified = Some(mtime);
                }
                Err(e) => {
                    tracing::warn!(target: "pipeline", path = %self.path.display(), error = %e, "scoring weights reload failed; keeping previous");
                }
            }
        }
        guard.weights
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Load weights directly (no caching).
pub fn load_weights_file(path: &Path) -> io::Result<ScoringWeights> {
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Write, thread, time::Duration};

    #[test]
    fn loads_and_hot_reloads() {
        let tmpdir = tempfile::tempdir().unwrap();
        let path = tmpdir.path().join("weights.json");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"engagement":0.6,"recency":0.2}}"#).unwrap();
            f.sync_all().unwrap();
        }

        let hot = HotReloadWeights::new(&path, ScoringWeights::default());
        let w1 = hot.current();
        assert!((w1.engagement - 0.6).abs() < f64::EPSILON);
        assert!((w1.recency - 0.2).abs() < f64::EPSILON);
        assert!((w1.quality - 0.3).abs() < f64::EPSILON);

        // Ensure different mtime (coarse filesystem granularity).
        thread::sleep(Duration::from_millis(1100));

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, r#"{{"engagement":1.0,"recency":1.0,"quality":-2.0}}"#).unwrap();
            f.sync_all().unwrap();
        }

        let w2 = hot.current();
        assert_eq!(
            w2,
            ScoringWeights {
                engagement: 1.0,
                recency: 1.0,
                quality: 0.0
            }
        );
    }

    #[test]
    fn missing_file_keeps_initial() {
        let hot = HotReloadWeights::new(Path::new("/definitely/not/here.json"), ScoringWeights::default());
        assert_eq!(hot.current(), ScoringWeights::default());
    }
}
