//! Priority scoring.
//!
//! ```text
//! recency    = e^(−0.693 × age_h / half_life_h)
//! engagement = min(engagement_score / 1000, 1)
//! quality    = quality_score (0.5 when absent)
//! base       = engagement×w_e + recency×w_r + quality×w_q
//! bonus      = 1 + 0.10·tech + 0.15·news + 0.05·education + 0.05·positive
//! priority   = clamp(base × bonus × channel_weight, 0, 1)
//! ```

use crate::channel_weights::ChannelWeights;
use crate::item::{Category, Item, ProcessingStatus, Sentiment};
use crate::stages::weights::ScoringWeights;
use crate::stages::{expect_status, finite, StageError};

const LN_2: f64 = 0.693;

#[derive(Debug, Clone)]
pub struct ScoringStage {
    half_life_hours: f64,
    weights: ScoringWeights,
    channels: ChannelWeights,
}

impl ScoringStage {
    pub fn new(half_life_hours: f64, weights: ScoringWeights, channels: ChannelWeights) -> Self {
        Self {
            half_life_hours: if half_life_hours.is_finite() && half_life_hours > 0.0 {
                half_life_hours
            } else {
                6.0
            },
            weights: weights.sanitized(),
            channels,
        }
    }

    pub fn set_weights(&mut self, weights: ScoringWeights) {
        self.weights = weights.sanitized();
    }

    pub fn weights(&self) -> ScoringWeights {
        self.weights
    }

    /// Score a batch of `Enriched` items; output sorted by priority, highest first.
    pub fn score(&self, items: Vec<Item>, now_unix: i64) -> Result<Vec<Item>, StageError> {
        let mut out = Vec::with_capacity(items.len());
        for mut it in items {
            expect_status(&it, ProcessingStatus::Enriched)?;
            let p = finite(&it.id, "priority_score", self.priority_for(&it, now_unix))?;
            it.priority_score = Some(p);
            it.advance_to(ProcessingStatus::Scored)?;
            out.push(it);
        }
        out.sort_by(|a, b| {
            b.priority_score
                .unwrap_or(0.0)
                .total_cmp(&a.priority_score.unwrap_or(0.0))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    pub fn priority_for(&self, it: &Item, now_unix: i64) -> f64 {
        let recency = recency_score(it.age_hours(now_unix), self.half_life_hours);
        let engagement = (it.engagement_score.unwrap_or(0.0) / 1000.0).clamp(0.0, 1.0);
        let quality = it.quality_score.unwrap_or(0.5).clamp(0.0, 1.0);

        let base = engagement * self.weights.engagement
            + recency * self.weights.recency
            + quality * self.weights.quality;

        let raw = base * bonus_multiplier(it) * self.channels.weight_for(&it.channel);
        if raw.is_nan() {
            return raw;
        }
        raw.clamp(0.0, 1.0)
    }
}

/// Half-life exponential decay in (0, 1]; strictly decreasing in age.
pub fn recency_score(age_hours: f64, half_life_hours: f64) -> f64 {
    (-LN_2 * age_hours.max(0.0) / half_life_hours).exp()
}

pub fn bonus_multiplier(it: &Item) -> f64 {
    let mut m = 1.0;
    if it.has_category(Category::Technology) {
        m += 0.10;
    }
    if it.has_category(Category::News) {
        m += 0.15;
    }
    if it.has_category(Category::Education) {
        m += 0.05;
    }
    if it.sentiment == Some(Sentiment::Positive) {
        m += 0.05;
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn stage() -> ScoringStage {
        ScoringStage::new(6.0, ScoringWeights::default(), ChannelWeights::default_seed())
    }

    fn enriched(id: &str, channel: &str, age_secs: i64) -> Item {
        let mut it = Item::new(id, channel, "Headline");
        it.created_utc = NOW - age_secs;
        it.quality_score = Some(0.6);
        it.engagement_score = Some(300.0);
        it.sentiment = Some(Sentiment::Neutral);
        it.categories = vec![Category::General];
        it.advance_to(ProcessingStatus::Enriched).unwrap();
        it
    }

    #[test]
    fn recency_is_strictly_decreasing() {
        let mut prev = recency_score(0.0, 6.0);
        assert!((prev - 1.0).abs() < 1e-12);
        for h in 1..48 {
            let r = recency_score(h as f64, 6.0);
            assert!(r < prev);
            prev = r;
        }
        assert!((recency_score(6.0, 6.0) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn older_item_scores_lower_all_else_equal() {
        let s = stage();
        let young = enriched("a", "technology", 600);
        let old = enriched("b", "technology", 6 * 3600);
        assert!(s.priority_for(&young, NOW) > s.priority_for(&old, NOW));
    }

    #[test]
    fn bonuses_stack() {
        let mut it = enriched("a", "x", 0);
        it.categories = vec![Category::Technology, Category::News, Category::Education];
        it.sentiment = Some(Sentiment::Positive);
        assert!((bonus_multiplier(&it) - 1.35).abs() < 1e-12);
    }

    #[test]
    fn output_sorted_by_priority() {
        let out = stage()
            .score(
                vec![
                    enriched("low", "funny", 40 * 3600),
                    enriched("high", "worldnews", 0),
                ],
                NOW,
            )
            .unwrap();
        assert_eq!(out[0].id, "high");
        assert!(out[0].priority_score > out[1].priority_score);
        assert!(out.iter().all(|it| it.status() == ProcessingStatus::Scored));
    }

    #[test]
    fn oversized_weights_are_clamped() {
        let s = ScoringStage::new(
            6.0,
            ScoringWeights {
                engagement: 5.0,
                recency: 5.0,
                quality: 5.0,
            },
            ChannelWeights::default_seed(),
        );
        let p = s.priority_for(&enriched("a", "worldnews", 0), NOW);
        assert_eq!(p, 1.0);
    }

    #[test]
    fn missing_quality_defaults_to_half() {
        let s = ScoringStage::new(
            6.0,
            ScoringWeights {
                engagement: 0.0,
                recency: 0.0,
                quality: 1.0,
            },
            ChannelWeights::default_seed(),
        );
        let mut it = enriched("a", "unknownchannel", 0);
        it.quality_score = None;
        assert!((s.priority_for(&it, NOW) - 0.5).abs() < 1e-12);
    }
}
