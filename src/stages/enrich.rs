// src/stages/enrich.rs
//! Enrichment: sentiment, topic categories, quality score, engagement score.
//! Reads only item fields; `now` is passed in.

use crate::item::{Category, Item, ProcessingStatus};
use crate::sentiment::SentimentAnalyzer;
use crate::stages::{expect_status, finite, StageError};

const TECHNOLOGY_KEYWORDS: &[&str] = &[
    "technology",
    "tech",
    "programming",
    "software",
    "computer",
    "gadget",
    "futurology",
    "coding",
    "developer",
    "artificial intelligence",
    "machine learning",
];
const NEWS_KEYWORDS: &[&str] = &[
    "news",
    "politics",
    "breaking",
    "report",
    "election",
    "government",
];
const ENTERTAINMENT_KEYWORDS: &[&str] = &[
    "movie",
    "film",
    "gaming",
    "game",
    "music",
    "television",
    "funny",
    "celebrity",
];
const EDUCATION_KEYWORDS: &[&str] = &[
    "explainlikeimfive",
    "todayilearned",
    "askscience",
    "science",
    "learn",
    "education",
    "history",
    "study",
];

const TRUSTED_DOMAINS: &[&str] = &[
    "github.com",
    "arstechnica.com",
    "bbc.com",
    "bbc.co.uk",
    "reuters.com",
    "apnews.com",
    "npr.org",
    "nytimes.com",
    "theguardian.com",
    "wikipedia.org",
    "nature.com",
    "techcrunch.com",
    "theverge.com",
    "wired.com",
];

const EMOJI_SPAM_MARKERS: &[&str] = &["🔥", "💯", "🚨", "‼", "😱", "💰", "👇", "!!!"];

const ENGAGEMENT_CAP: f64 = 1000.0;
const ENGAGEMENT_DECAY_PER_HOUR: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub struct EnrichmentStage {
    analyzer: SentimentAnalyzer,
}

impl EnrichmentStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enrich a batch of `Raw` items. All-or-nothing: on error no item is returned.
    pub fn enrich(&self, items: Vec<Item>, now_unix: i64) -> Result<Vec<Item>, StageError> {
        let mut out = Vec::with_capacity(items.len());
        for mut it in items {
            expect_status(&it, ProcessingStatus::Raw)?;
            finite(&it.id, "upvote_ratio", it.upvote_ratio)?;

            let text = format!("{} {}", it.title, it.body);
            it.sentiment = Some(self.analyzer.classify(&text));
            it.categories = categorize(&it.channel, &it.title);
            it.quality_score = Some(finite(&it.id, "quality_score", quality_score(&it))?);
            it.engagement_score = Some(finite(
                &it.id,
                "engagement_score",
                engagement_score(&it, now_unix),
            )?);

            it.advance_to(ProcessingStatus::Enriched)?;
            out.push(it);
        }
        Ok(out)
    }
}

/// Substring match of channel and title against the four keyword groups.
/// Never empty: no match yields `[General]`.
pub fn categorize(channel: &str, title: &str) -> Vec<Category> {
    let hay = format!("{} {}", channel, title).to_lowercase();
    let mut cats = Vec::new();
    for (cat, words) in [
        (Category::Technology, TECHNOLOGY_KEYWORDS),
        (Category::News, NEWS_KEYWORDS),
        (Category::Entertainment, ENTERTAINMENT_KEYWORDS),
        (Category::Education, EDUCATION_KEYWORDS),
    ] {
        if words.iter().any(|w| hay.contains(w)) {
            cats.push(cat);
        }
    }
    if cats.is_empty() {
        cats.push(Category::General);
    }
    cats
}

/// Heuristic quality in [0,1], starting from 0.5.
pub fn quality_score(it: &Item) -> f64 {
    let title = it.title.as_str();
    let title_len = title.chars().count();
    let mut q: f64 = 0.5;

    if title_len > 10 && title_len < 100 {
        q += 0.10;
    }
    if title.chars().next().is_some_and(char::is_uppercase) {
        q += 0.05;
    }
    if !title.contains("URGENT") && !title.contains("BREAKING") {
        q += 0.05;
    }
    if it.body.chars().count() > 100 {
        q += 0.10;
    }
    if it.num_comments > 5 {
        q += 0.10;
    }
    if it.upvote_ratio > 0.8 {
        q += 0.10;
    }
    if is_trusted_domain(&it.domain) {
        q += 0.10;
    }
    if EMOJI_SPAM_MARKERS.iter().any(|m| title.contains(m)) {
        q -= 0.10;
    }
    if is_all_caps(title) {
        q -= 0.20;
    }

    q.clamp(0.0, 1.0)
}

/// `min((score + 2 × comments) × e^(−0.1 × age_h), 1000)`, never negative.
pub fn engagement_score(it: &Item, now_unix: i64) -> f64 {
    let decay = (-ENGAGEMENT_DECAY_PER_HOUR * it.age_hours(now_unix)).exp();
    let raw = (it.score as f64 + 2.0 * it.num_comments as f64).max(0.0);
    (raw * decay).clamp(0.0, ENGAGEMENT_CAP)
}

fn is_trusted_domain(domain: &str) -> bool {
    let d = domain.trim().to_ascii_lowercase();
    let d = d.strip_prefix("www.").unwrap_or(&d);
    TRUSTED_DOMAINS
        .iter()
        .any(|t| d == *t || d.ends_with(&format!(".{t}")))
}

fn is_all_caps(title: &str) -> bool {
    title.chars().any(char::is_alphabetic) && !title.chars().any(char::is_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Sentiment;

    const NOW: i64 = 1_700_000_000;

    fn raw(title: &str) -> Item {
        let mut it = Item::new("t1", "technology", title);
        it.created_utc = NOW - 3600;
        it
    }

    #[test]
    fn enriches_breakthrough_item() {
        let mut it = raw("Amazing new AI breakthrough");
        it.score = 120;
        it.num_comments = 40;
        it.upvote_ratio = 0.95;
        let out = EnrichmentStage::new().enrich(vec![it], NOW).unwrap();
        let e = &out[0];
        assert_eq!(e.status(), ProcessingStatus::Enriched);
        assert_eq!(e.sentiment, Some(Sentiment::Positive));
        assert!(e.categories.contains(&Category::Technology));
        assert!(e.quality_score.unwrap() > 0.7);
        let eng = e.engagement_score.unwrap();
        assert!((eng - 200.0 * (-0.1f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn unmatched_item_is_general() {
        assert_eq!(categorize("aww", "Look at this dog"), vec![Category::General]);
        let both = categorize("science", "New report on coding bootcamps");
        assert_eq!(
            both,
            vec![Category::Technology, Category::News, Category::Education]
        );
    }

    #[test]
    fn quality_stays_in_unit_interval_for_adversarial_titles() {
        let long = "x".repeat(500);
        for title in ["", "URGENT!!! 🔥🔥 BUY NOW 💯", "a", long.as_str(), "BREAKING 😱"] {
            let q = quality_score(&raw(title));
            assert!((0.0..=1.0).contains(&q), "title {title:?} -> {q}");
        }
        let mut best = raw("A perfectly reasonable headline");
        best.body = "b".repeat(200);
        best.num_comments = 100;
        best.upvote_ratio = 0.99;
        best.domain = "www.github.com".into();
        assert_eq!(quality_score(&best), 1.0);
    }

    #[test]
    fn all_caps_and_emoji_are_penalized() {
        let calm = quality_score(&raw("Markets close higher today"));
        let loud = quality_score(&raw("MARKETS CLOSE HIGHER TODAY 🔥"));
        assert!(loud < calm);
        assert!((calm - loud - 0.30).abs() < 1e-9);
    }

    #[test]
    fn engagement_is_capped_and_non_negative() {
        let mut viral = raw("x");
        viral.created_utc = NOW;
        viral.score = 50_000;
        assert_eq!(engagement_score(&viral, NOW), 1000.0);

        let mut buried = raw("x");
        buried.score = -40;
        assert_eq!(engagement_score(&buried, NOW), 0.0);
    }

    #[test]
    fn rejects_non_raw_input() {
        let mut it = raw("Title here");
        it.advance_to(ProcessingStatus::Enriched).unwrap();
        assert!(EnrichmentStage::new().enrich(vec![it], NOW).is_err());
    }

    #[test]
    fn corrupt_upvote_ratio_fails_the_whole_batch() {
        let good = raw("A fine title");
        let mut bad = raw("Another title");
        bad.id = "bad".into();
        bad.upvote_ratio = f64::NAN;
        let err = EnrichmentStage::new().enrich(vec![good, bad], NOW).unwrap_err();
        assert!(err.to_string().contains("bad"), "{err}");
    }
}
