// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod classify;
pub mod config;
pub mod fetch;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::classify::{is_devrel_job, JobClassifier};
pub use crate::merge::{MergeEngine, MergeStats};
pub use crate::model::{Resource, ResourceBundle, ResourceKind};
pub use crate::orchestrator::{Orchestrator, RawBundle};
pub use crate::pipeline::Aggregator;
