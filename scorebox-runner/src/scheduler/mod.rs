//! Scheduler layer for the runner
//!
//! This layer drives scoring runs from start to finish: the per-file state
//! machine, the batch pipeline and the controller that fans a batch out to
//! one shared deployment.

pub mod batch;
pub mod error;
pub mod orchestrator;

pub use error::JobError;
pub use orchestrator::{BatchSummary, Collaborators, Orchestrator};
