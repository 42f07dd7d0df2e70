//! Run orchestration services.
//!
//! # Responsibility
//! - Compose feed loading, store acquisition and reconciliation into one run.
//! - Bound every run phase and translate failures into `SyncError`.

pub mod sync_service;

pub use sync_service::{RunOutcome, RunPhase, SyncError, SyncJob, SyncService};
