// src/ingest/selector.rs
//! Pluggable choice of (channel, sort mode) for each ingestion cycle.

use rand::seq::IndexedRandom;
use std::collections::VecDeque;

use crate::ingest::types::SortMode;

pub trait SourceSelector: Send {
    /// Pick the next channel + sort. `None` when there is nothing to pick from.
    fn next(&mut self, channels: &[String]) -> Option<(String, SortMode)>;
}

/// Uniform random channel and sort mode.
#[derive(Debug, Default, Clone)]
pub struct RandomSelector;

impl SourceSelector for RandomSelector {
    fn next(&mut self, channels: &[String]) -> Option<(String, SortMode)> {
        let mut rng = rand::rng();
        let channel = channels.choose(&mut rng)?.clone();
        let sort = *SortMode::ALL.choose(&mut rng)?;
        Some((channel, sort))
    }
}

/// Deterministic sequence, repeated once exhausted. Ignores the channel list.
#[derive(Debug, Clone)]
pub struct ScriptedSelector {
    script: Vec<(String, SortMode)>,
    queue: VecDeque<(String, SortMode)>,
}

impl ScriptedSelector {
    pub fn new<I, S>(script: I) -> Self
    where
        I: IntoIterator<Item = (S, SortMode)>,
        S: Into<String>,
    {
        let script: Vec<(String, SortMode)> =
            script.into_iter().map(|(c, s)| (c.into(), s)).collect();
        Self {
            queue: script.iter().cloned().collect(),
            script,
        }
    }
}

impl SourceSelector for ScriptedSelector {
    fn next(&mut self, _channels: &[String]) -> Option<(String, SortMode)> {
        if self.queue.is_empty() {
            self.queue = self.script.iter().cloned().collect();
        }
        self.queue.pop_front()
    }
}
