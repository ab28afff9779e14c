//! Keyword-count sentiment: compare how many words of a fixed positive list
//! and a fixed negative list occur (case-insensitive substring) in the text.
//! Ties, including zero/zero, are neutral.

use crate::item::Sentiment;

const POSITIVE_WORDS: &[&str] = &[
    "amazing",
    "awesome",
    "great",
    "excellent",
    "good",
    "love",
    "best",
    "breakthrough",
    "success",
    "win",
    "happy",
    "wonderful",
    "fantastic",
    "incredible",
    "brilliant",
    "beautiful",
    "record",
    "improve",
];

const NEGATIVE_WORDS: &[&str] = &[
    "terrible",
    "awful",
    "bad",
    "hate",
    "worst",
    "fail",
    "disaster",
    "crisis",
    "death",
    "dead",
    "war",
    "attack",
    "tragic",
    "horrible",
    "scandal",
    "crash",
    "collapse",
    "lawsuit",
];

#[derive(Debug, Clone, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Returns `(positive_hits, negative_hits)`.
    pub fn counts(&self, text: &str) -> (usize, usize) {
        let lower = text.to_lowercase();
        let pos = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
        let neg = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
        (pos, neg)
    }

    pub fn classify(&self, text: &str) -> Sentiment {
        let (pos, neg) = self.counts(text);
        match pos.cmp(&neg) {
            std::cmp::Ordering::Greater => Sentiment::Positive,
            std::cmp::Ordering::Less => Sentiment::Negative,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_negative_and_ties() {
        let a = SentimentAnalyzer::new();
        assert_eq!(a.classify("Amazing new AI breakthrough"), Sentiment::Positive);
        assert_eq!(a.classify("Market CRASH triggers crisis"), Sentiment::Negative);
        assert_eq!(a.classify("Great game, terrible referee"), Sentiment::Neutral);
        assert_eq!(a.classify(""), Sentiment::Neutral);
    }
}
