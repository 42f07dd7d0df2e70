//! Feed-to-store reconciliation.
//!
//! # Responsibility
//! - Validate candidate links against the directory and stage missing ones.
//! - Summarize each run in a `ReconciliationReport`.
//!
//! # Invariants
//! - Additive only: existing links are never deleted or rewritten.
//! - Candidates are processed sequentially in feed order.
//! - A run either commits all of its creations or none of them.

pub mod reconciler;
pub mod report;

pub use reconciler::{ReconcileError, Reconciler, TenantPolicy};
pub use report::{MissingReferenceWarning, ReconciliationReport, TenantMismatch};
