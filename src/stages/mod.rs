// src/stages/mod.rs
//! Processing stages. Each is a synchronous batch transform over items at one
//! status that returns the same items advanced by exactly one status.
//!
//! Order inside a publish tick: enrich → score → schedule.

pub mod enrich;
pub mod scheduler;
pub mod scoring;
pub mod weights;

pub use enrich::EnrichmentStage;
pub use scheduler::SchedulerStage;
pub use scoring::ScoringStage;
pub use weights::{HotReloadWeights, ScoringWeights};

use serde::Serialize;
use std::fmt;

use crate::item::{Item, ProcessingStatus, TransitionError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("item {id}: {field} is not a finite number ({value})")]
    InvalidScore {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("item {id}: expected status {expected}, found {found}")]
    UnexpectedStatus {
        id: String,
        expected: ProcessingStatus,
        found: ProcessingStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Enrichment,
    Scoring,
    Scheduling,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Enrichment, StageKind::Scoring, StageKind::Scheduling];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Enrichment => "enrichment",
            StageKind::Scoring => "scoring",
            StageKind::Scheduling => "scheduling",
        }
    }

    /// Status of the items this stage consumes.
    pub fn input_status(self) -> ProcessingStatus {
        match self {
            StageKind::Enrichment => ProcessingStatus::Raw,
            StageKind::Scoring => ProcessingStatus::Enriched,
            StageKind::Scheduling => ProcessingStatus::Scored,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn expect_status(item: &Item, expected: ProcessingStatus) -> Result<(), StageError> {
    if item.status() != expected {
        return Err(StageError::UnexpectedStatus {
            id: item.id.clone(),
            expected,
            found: item.status(),
        });
    }
    Ok(())
}

pub(crate) fn finite(id: &str, field: &'static str, value: f64) -> Result<f64, StageError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(StageError::InvalidScore {
            id: id.to_string(),
            field,
            value,
        })
    }
}
