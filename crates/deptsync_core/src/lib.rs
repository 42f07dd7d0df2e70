//! Employee-department reconciliation core.
//! Reads the association feed on a schedule and adds missing links to the
//! directory store without touching existing state.

pub mod config;
pub mod db;
pub mod feed;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod scheduler;
pub mod service;

pub use config::{ConfigError, SyncConfig};
pub use feed::{load_feed, FeedError, FeedLoad};
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::association::{AssociationLink, EmployeeDepartment};
pub use model::directory::{
    Department, DepartmentId, Employee, EmployeeId, ModelValidationError, TenantId,
};
pub use reconcile::{
    MissingReferenceWarning, ReconcileError, Reconciler, ReconciliationReport, TenantMismatch,
    TenantPolicy,
};
pub use repo::association_store::{AssociationStore, SqliteAssociationStore};
pub use repo::directory_repo::{
    DirectoryRepository, RepoError, RepoResult, SqliteDirectoryRepository,
};
pub use scheduler::{execute_logged_run, Scheduler, SchedulerHandle, SchedulerState, SchedulerStats};
pub use service::{RunOutcome, RunPhase, SyncError, SyncJob, SyncService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
