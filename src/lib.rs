// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod channel_weights;
pub mod config;
pub mod ingest;
pub mod item;
pub mod metrics;
pub mod orchestrator;
pub mod sentiment;
pub mod stages;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::PipelineConfig;
pub use crate::item::{Item, ProcessingStatus};
pub use crate::orchestrator::{Pipeline, PipelineHandle, PipelineSnapshot, PublishedItem};
pub use crate::store::{JsonlStore, LogStore, MemoryStore, PipelineStore};
