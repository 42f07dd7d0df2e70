//! Domain model shared by the store adapter and the reconciler.
//!
//! # Responsibility
//! - Define directory entities (employees, departments) read by id.
//! - Define candidate links parsed from the feed and persisted join rows.
//!
//! # Invariants
//! - Candidate links are ephemeral; only `EmployeeDepartment` is persisted.

pub mod association;
pub mod directory;
